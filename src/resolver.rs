//! Picks which container of a pod an interactive operation targets.

use anyhow::Result;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::warn;

use crate::k8s::Cluster;

pub const DEFAULT_CONTAINER_ANNOTATION: &str = "kubectl.kubernetes.io/default-container";

const SIDECAR_RESTART_POLICY: &str = "Always";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TargetRole {
    Regular,
    Init,
    Ephemeral,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SubTarget {
    pub name: String,
    pub role: TargetRole,
    /// Init containers that keep running alongside the regular ones.
    pub persistent: bool,
}

impl SubTarget {
    pub fn regular(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: TargetRole::Regular,
            persistent: false,
        }
    }

    pub fn init(name: impl Into<String>, persistent: bool) -> Self {
        Self {
            name: name.into(),
            role: TargetRole::Init,
            persistent,
        }
    }

    pub fn ephemeral(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: TargetRole::Ephemeral,
            persistent: false,
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct CompositeTargets {
    pub annotations: BTreeMap<String, String>,
    pub targets: Vec<SubTarget>,
}

impl CompositeTargets {
    pub fn from_pod(pod: &Pod) -> Self {
        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let mut targets = Vec::new();
        if let Some(spec) = pod.spec.as_ref() {
            targets.extend(
                spec.containers
                    .iter()
                    .map(|container| SubTarget::regular(container.name.clone())),
            );
            targets.extend(spec.init_containers.iter().flatten().map(|container| {
                SubTarget::init(
                    container.name.clone(),
                    container.restart_policy.as_deref() == Some(SIDECAR_RESTART_POLICY),
                )
            }));
            targets.extend(
                spec.ephemeral_containers
                    .iter()
                    .flatten()
                    .map(|container| SubTarget::ephemeral(container.name.clone())),
            );
        }
        Self {
            annotations,
            targets,
        }
    }

    /// The annotated default, ignored when it names no known target.
    pub fn default_target(&self) -> Option<&str> {
        let name = self.annotations.get(DEFAULT_CONTAINER_ANNOTATION)?;
        if self.targets.iter().any(|target| &target.name == name) {
            Some(name.as_str())
        } else {
            warn!(container = %name, "default container annotation names no container");
            None
        }
    }

    /// Default first, then regular, ephemeral and init targets. Init targets
    /// only count when persistent unless `all_init` is set.
    pub fn eligible(&self, all_init: bool) -> Vec<String> {
        let mut names = Vec::<String>::new();
        let mut push = |name: &str| {
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        };

        if let Some(default) = self.default_target() {
            push(default);
        }
        for role in [TargetRole::Regular, TargetRole::Ephemeral, TargetRole::Init] {
            for target in self.targets.iter().filter(|target| target.role == role) {
                if role == TargetRole::Init && !(all_init || target.persistent) {
                    continue;
                }
                push(&target.name);
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ResolveOptions {
    pub all_init: bool,
    pub skip_default: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Resolution {
    /// Proceed against this target. Blank when the pod lists no eligible target.
    Target(String),
    Pick(Vec<String>),
}

pub fn resolve(
    composite: &CompositeTargets,
    explicit: Option<&str>,
    options: ResolveOptions,
) -> Resolution {
    if let Some(explicit) = explicit.filter(|name| !name.is_empty()) {
        return Resolution::Target(explicit.to_string());
    }
    if !options.skip_default
        && let Some(default) = composite.default_target()
    {
        return Resolution::Target(default.to_string());
    }

    let mut eligible = composite.eligible(options.all_init);
    match eligible.len() {
        0 => Resolution::Target(String::new()),
        1 => Resolution::Target(eligible.remove(0)),
        _ => Resolution::Pick(eligible),
    }
}

/// Resolves a target for the pod at `path`, fetching it only when no
/// explicit target was given.
pub async fn resolve_for<C>(
    cluster: &C,
    path: &str,
    explicit: Option<&str>,
    options: ResolveOptions,
) -> Result<Resolution>
where
    C: Cluster + ?Sized,
{
    if let Some(explicit) = explicit.filter(|name| !name.is_empty()) {
        return Ok(Resolution::Target(explicit.to_string()));
    }
    let pod = cluster.fetch_pod(path).await?;
    Ok(resolve(&CompositeTargets::from_pod(&pod), None, options))
}
