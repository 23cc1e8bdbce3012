use anyhow::Result;
use crossterm::event::KeyEvent;

use super::extenders::LogsExtender;
use super::{BindEnv, Extender, ResourceViewer, ViewContext, ViewerBuilder};
use crate::app::{App, AppCommand};
use crate::keys::{ActionOpts, Key, KeyAction, KeyActions};
use crate::model::ResourceKind;

/// Containers of the pod named by `context.pod_path`.
pub fn viewer(env: &BindEnv, context: ViewContext) -> ResourceViewer {
    ViewerBuilder::new(ResourceKind::Containers)
        .layer(LogsExtender)
        .layer(ContainerExtender)
        .context(context)
        .build(env)
}

pub struct ContainerExtender;

impl Extender for ContainerExtender {
    fn name(&self) -> &'static str {
        "container"
    }

    fn bind_keys(
        &self,
        _kind: ResourceKind,
        actions: &mut KeyActions<App>,
        env: &BindEnv,
    ) -> Result<()> {
        if env.read_only {
            return Ok(());
        }
        actions.bulk([
            (
                Key::char('s'),
                KeyAction::new("Shell", ActionOpts::dangerous(), |app: &mut App, key| {
                    explicit_target(app, key, |path, container| AppCommand::Shell {
                        path,
                        container,
                    })
                }),
            ),
            (
                Key::char('a'),
                KeyAction::new("Attach", ActionOpts::dangerous(), |app: &mut App, key| {
                    explicit_target(app, key, |path, container| AppCommand::Attach {
                        path,
                        container,
                    })
                }),
            ),
        ]);
        Ok(())
    }
}

fn explicit_target(
    app: &mut App,
    key: KeyEvent,
    command: impl FnOnce(String, Option<String>) -> AppCommand,
) -> Option<KeyEvent> {
    let Some(view) = app.active_view() else {
        return Some(key);
    };
    let (Some(path), Some(container)) = (view.context().pod_path.clone(), view.selected_path())
    else {
        return Some(key);
    };
    app.queue(command(path, Some(container)));
    None
}

#[cfg(test)]
mod tests {
    use super::viewer;
    use crate::keys::Key;
    use crate::view::{BindEnv, ViewContext};

    #[test]
    fn container_view_has_shell_attach_and_logs() {
        let view = viewer(
            &BindEnv::default(),
            ViewContext {
                pod_path: Some("ns/web".to_string()),
                ..ViewContext::default()
            },
        );
        assert_eq!(view.layer_names(), vec!["browser", "logs", "container"]);
        for key in [Key::char('s'), Key::char('a'), Key::char('l')] {
            assert!(view.actions().contains(&key));
        }
        assert!(!view.actions().contains(&Key::ctrl('d')));
        assert_eq!(view.title(), "Containers(ns/web)");
    }
}
