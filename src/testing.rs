//! Builders and fakes shared by unit tests.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Local;
use k8s_openapi::api::core::v1::{Container, EphemeralContainer, Node, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::k8s::{
    CONTAINER_HEADERS, Cluster, NODE_HEADERS, POD_HEADERS, container_rows, headers, node_row,
    pod_phase, pod_row,
};
use crate::model::{NamespaceScope, ResourceKind, TableData, UsageSnapshot, namespaced};
use crate::session::TerminalControl;
use crate::view::ViewContext;

pub struct PodBuilder {
    pod: Pod,
}

pub fn pod(namespace: &str, name: &str) -> PodBuilder {
    PodBuilder {
        pod: Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec::default()),
            status: Some(PodStatus::default()),
        },
    }
}

impl PodBuilder {
    fn spec(&mut self) -> &mut PodSpec {
        self.pod.spec.get_or_insert_with(PodSpec::default)
    }

    pub fn container(mut self, name: &str) -> Self {
        self.spec().containers.push(Container {
            name: name.to_string(),
            ..Container::default()
        });
        self
    }

    pub fn init(mut self, name: &str) -> Self {
        self.spec()
            .init_containers
            .get_or_insert_with(Vec::new)
            .push(Container {
                name: name.to_string(),
                ..Container::default()
            });
        self
    }

    pub fn sidecar(mut self, name: &str) -> Self {
        self.spec()
            .init_containers
            .get_or_insert_with(Vec::new)
            .push(Container {
                name: name.to_string(),
                restart_policy: Some("Always".to_string()),
                ..Container::default()
            });
        self
    }

    pub fn ephemeral(mut self, name: &str) -> Self {
        self.spec()
            .ephemeral_containers
            .get_or_insert_with(Vec::new)
            .push(EphemeralContainer {
                name: name.to_string(),
                ..EphemeralContainer::default()
            });
        self
    }

    pub fn annotation(mut self, key: &str, value: &str) -> Self {
        self.pod
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn node(mut self, node: &str) -> Self {
        self.spec().node_name = Some(node.to_string());
        self
    }

    pub fn node_selector(mut self, key: &str, value: &str) -> Self {
        self.spec()
            .node_selector
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn phase(mut self, phase: &str) -> Self {
        self.pod
            .status
            .get_or_insert_with(PodStatus::default)
            .phase = Some(phase.to_string());
        self
    }

    pub fn terminating(mut self) -> Self {
        self.pod.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        self
    }

    pub fn build(self) -> Pod {
        self.pod
    }
}

pub fn node(name: &str, labels: &[(&str, &str)]) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                labels
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect(),
            ),
            ..ObjectMeta::default()
        },
        ..Node::default()
    }
}

#[derive(Default)]
pub struct FakeCluster {
    pods: Mutex<BTreeMap<String, Pod>>,
    nodes: BTreeMap<String, Node>,
    failing_deletes: HashSet<String>,
    deleted: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeCluster {
    pub fn with_pod(self, pod: Pod) -> Self {
        let path = format!(
            "{}/{}",
            pod.metadata.namespace.clone().unwrap_or_default(),
            pod.metadata.name.clone().unwrap_or_default()
        );
        if let Ok(mut pods) = self.pods.lock() {
            pods.insert(path, pod);
        }
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes
            .insert(node.metadata.name.clone().unwrap_or_default(), node);
        self
    }

    pub fn failing_delete(mut self, path: &str) -> Self {
        self.failing_deletes.insert(path.to_string());
        self
    }

    /// Holds deletes and sanitizes until the returned semaphore hands out a permit.
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    async fn pass_gate(&self) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        Ok(())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    pub fn pod_paths(&self) -> Vec<String> {
        self.pods
            .lock()
            .map(|pods| pods.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn fetch_pod(&self, path: &str) -> Result<Pod> {
        let pods = self.pods.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        match pods.get(path) {
            Some(pod) => Ok(pod.clone()),
            None => bail!("pods \"{path}\" not found"),
        }
    }

    async fn fetch_node(&self, name: &str) -> Result<Node> {
        match self.nodes.get(name) {
            Some(node) => Ok(node.clone()),
            None => bail!("nodes \"{name}\" not found"),
        }
    }

    async fn fetch_table(
        &self,
        kind: ResourceKind,
        scope: &NamespaceScope,
        context: &ViewContext,
    ) -> Result<TableData> {
        let (names, rows) = match kind {
            ResourceKind::Pods => {
                let namespace = context.namespace.as_deref().or(scope.namespace());
                let pods = self.pods.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
                let rows = pods
                    .iter()
                    .filter(|(path, _)| {
                        namespace.is_none_or(|namespace| namespaced(path).0 == namespace)
                    })
                    .map(|(_, pod)| pod_row(pod))
                    .collect();
                (&POD_HEADERS[..], rows)
            }
            ResourceKind::Containers => {
                let path = context.pod_path.clone().unwrap_or_default();
                (&CONTAINER_HEADERS[..], container_rows(&self.fetch_pod(&path).await?))
            }
            ResourceKind::Nodes => (&NODE_HEADERS[..], self.nodes.values().map(node_row).collect()),
        };
        let mut table = TableData::default();
        table.set_rows(headers(names), rows, Local::now());
        Ok(table)
    }

    async fn fetch_usage(&self, _scope: &NamespaceScope) -> Result<UsageSnapshot> {
        Ok(UsageSnapshot::default())
    }

    async fn delete(&self, _kind: ResourceKind, path: &str) -> Result<()> {
        self.pass_gate().await?;
        if self.failing_deletes.contains(path) {
            bail!("pods \"{path}\" is forbidden");
        }
        if let Ok(mut pods) = self.pods.lock() {
            pods.remove(path);
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(path.to_string());
        }
        Ok(())
    }

    async fn sanitize(&self, namespace: Option<&str>) -> Result<usize> {
        self.pass_gate().await?;
        let mut pods = self.pods.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        let before = pods.len();
        pods.retain(|path, pod| {
            let in_scope = namespace.is_none_or(|namespace| namespaced(path).0 == namespace);
            !(in_scope && matches!(pod_phase(pod), "Succeeded" | "Failed"))
        });
        Ok(before - pods.len())
    }

    async fn fetch_logs(&self, path: &str, container: &str, _previous: bool) -> Result<String> {
        Ok(format!("logs for {path}:{container}"))
    }
}

#[derive(Debug, Default)]
pub struct FakeTerminal {
    pub calls: Vec<String>,
    pub fail_suspend: bool,
}

impl TerminalControl for FakeTerminal {
    fn suspend(&mut self) -> Result<()> {
        self.calls.push("suspend".to_string());
        if self.fail_suspend {
            bail!("raw mode unavailable");
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.calls.push("resume".to_string());
        Ok(())
    }

    fn announce(&mut self, clear: bool, banner: Option<&str>) -> Result<()> {
        if clear {
            self.calls.push("clear".to_string());
        }
        if let Some(banner) = banner {
            self.calls.push(format!("banner {banner}"));
        }
        Ok(())
    }
}
