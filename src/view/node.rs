use super::{BindEnv, ResourceViewer, ViewContext, ViewerBuilder};
use crate::model::ResourceKind;

/// A single node, as named by `context.node`.
pub fn viewer(env: &BindEnv, context: ViewContext) -> ResourceViewer {
    ViewerBuilder::new(ResourceKind::Nodes)
        .context(context)
        .build(env)
}
