use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Node, Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{DeleteParams, ListParams, LogParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::{Api, Client, Config, ResourceExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::model::{
    NamespaceScope, PodResources, ResourceKind, RowData, TableData, UsageSnapshot, namespaced,
};
use crate::view::ViewContext;

pub const POD_HEADERS: [&str; 15] = [
    "NAMESPACE", "NAME", "PF", "READY", "STATUS", "RESTARTS", "CPU", "MEM", "%CPU/R", "%CPU/L",
    "%MEM/R", "%MEM/L", "IP", "NODE", "AGE",
];
pub const CONTAINER_HEADERS: [&str; 7] =
    ["NAME", "IMAGE", "READY", "STATE", "INIT", "RESTARTS", "AGE"];
pub const NODE_HEADERS: [&str; 5] = ["NAME", "STATUS", "ROLES", "VERSION", "AGE"];

const PHASE_RUNNING: &str = "Running";
const PHASE_SUCCEEDED: &str = "Succeeded";
const PHASE_FAILED: &str = "Failed";

/// Connection selection shared by the API client and spawned kubectl sessions.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ConnectionFlags {
    pub kubeconfig: Option<String>,
    pub context: Option<String>,
    pub token: Option<String>,
}

/// Cluster operations the views and the executor depend on.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn fetch_pod(&self, path: &str) -> Result<Pod>;

    async fn fetch_node(&self, name: &str) -> Result<Node>;

    async fn fetch_table(
        &self,
        kind: ResourceKind,
        scope: &NamespaceScope,
        context: &ViewContext,
    ) -> Result<TableData>;

    async fn fetch_usage(&self, scope: &NamespaceScope) -> Result<UsageSnapshot>;

    async fn delete(&self, kind: ResourceKind, path: &str) -> Result<()>;

    /// Deletes completed pods and returns how many went away.
    async fn sanitize(&self, namespace: Option<&str>) -> Result<usize>;

    async fn fetch_logs(&self, path: &str, container: &str, previous: bool) -> Result<String>;
}

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    context: String,
    cluster: String,
    default_namespace: String,
}

impl KubeGateway {
    pub async fn new(flags: &ConnectionFlags) -> Result<Self> {
        let kubeconfig = match flags.kubeconfig.as_deref() {
            Some(path) => Some(
                Kubeconfig::read_from(path)
                    .with_context(|| format!("failed to read kubeconfig {path}"))?,
            ),
            None => Kubeconfig::read().ok(),
        };

        let config = if let Some(kubeconfig_value) = kubeconfig.clone() {
            let options = KubeConfigOptions {
                context: flags.context.clone(),
                cluster: None,
                user: None,
            };
            Config::from_custom_kubeconfig(kubeconfig_value, &options)
                .await
                .context("failed to infer Kubernetes configuration")?
        } else {
            if flags.context.is_some() {
                anyhow::bail!("kubeconfig not found; --context is unavailable in this environment");
            }
            Config::infer()
                .await
                .context("failed to infer Kubernetes configuration")?
        };

        let cluster = config.cluster_url.to_string();
        let default_namespace = config.default_namespace.clone();
        let client = Client::try_from(config).context("failed to initialize Kubernetes client")?;
        let context = flags
            .context
            .clone()
            .or_else(|| kubeconfig.and_then(|cfg| cfg.current_context))
            .unwrap_or_else(|| "in-cluster".to_string());

        Ok(Self {
            client,
            context,
            cluster,
            default_namespace,
        })
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn default_namespace(&self) -> &str {
        &self.default_namespace
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace.filter(|value| !value.is_empty()) {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        }
    }

    async fn fetch_pods(&self, namespace: Option<&str>) -> Result<Vec<RowData>> {
        let list = self.pods(namespace).list(&list_params()).await?;
        Ok(list.iter().map(pod_row).collect())
    }

    async fn fetch_nodes(&self, only: Option<&str>) -> Result<Vec<RowData>> {
        if let Some(name) = only {
            return Ok(vec![node_row(&self.fetch_node(name).await?)]);
        }
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&list_params()).await?;
        Ok(list.iter().map(node_row).collect())
    }
}

#[async_trait]
impl Cluster for KubeGateway {
    async fn fetch_pod(&self, path: &str) -> Result<Pod> {
        let (namespace, name) = namespaced(path);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .with_context(|| format!("failed to fetch pod {path}"))
    }

    async fn fetch_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get(name)
            .await
            .with_context(|| format!("failed to fetch node {name}"))
    }

    async fn fetch_table(
        &self,
        kind: ResourceKind,
        scope: &NamespaceScope,
        context: &ViewContext,
    ) -> Result<TableData> {
        let refreshed_at = Local::now();
        let (headers, mut rows) = match kind {
            ResourceKind::Pods => {
                let namespace = context.namespace.as_deref().or(scope.namespace());
                (headers(&POD_HEADERS), self.fetch_pods(namespace).await?)
            }
            ResourceKind::Containers => {
                let path = context
                    .pod_path
                    .as_deref()
                    .context("no pod selected for the container view")?;
                (
                    headers(&CONTAINER_HEADERS),
                    container_rows(&self.fetch_pod(path).await?),
                )
            }
            ResourceKind::Nodes => (
                headers(&NODE_HEADERS),
                self.fetch_nodes(context.node.as_deref()).await?,
            ),
        };

        if kind != ResourceKind::Containers {
            rows.sort_by(|left, right| {
                left.namespace
                    .cmp(&right.namespace)
                    .then_with(|| left.name.cmp(&right.name))
            });
        }

        let mut table = TableData::default();
        table.set_rows(headers, rows, refreshed_at);
        Ok(table)
    }

    async fn fetch_usage(&self, scope: &NamespaceScope) -> Result<UsageSnapshot> {
        let mut snapshot = UsageSnapshot::default();

        let pod_metrics_gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        let pod_metrics_resource = ApiResource::from_gvk_with_plural(&pod_metrics_gvk, "pods");
        let pod_metrics_api: Api<DynamicObject> = match scope {
            NamespaceScope::All => Api::all_with(self.client.clone(), &pod_metrics_resource),
            NamespaceScope::Named(namespace) => {
                Api::namespaced_with(self.client.clone(), namespace, &pod_metrics_resource)
            }
        };

        let pod_metrics = pod_metrics_api.list(&list_params()).await?;
        for pod_metric in pod_metrics {
            let namespace = pod_metric.namespace().unwrap_or_default();
            let name = pod_metric.name_any();
            let (cpu_millicores, memory_bytes) = parse_pod_metrics_usage(&pod_metric.data);
            snapshot.cpu_usage_millicores =
                snapshot.cpu_usage_millicores.saturating_add(cpu_millicores);
            snapshot.memory_usage_bytes = snapshot.memory_usage_bytes.saturating_add(memory_bytes);
            snapshot.pod_usage.insert(
                format!("{namespace}/{name}"),
                (cpu_millicores, memory_bytes),
            );
        }

        let nodes: Api<Node> = Api::all(self.client.clone());
        for node in nodes.list(&list_params()).await? {
            if let Some(allocatable) = node
                .status
                .as_ref()
                .and_then(|status| status.allocatable.as_ref())
            {
                let cpu_capacity = allocatable
                    .get("cpu")
                    .and_then(|quantity| parse_cpu_millicores(&quantity.0))
                    .unwrap_or(0);
                let memory_capacity = allocatable
                    .get("memory")
                    .and_then(|quantity| parse_memory_bytes(&quantity.0))
                    .unwrap_or(0);
                snapshot.cpu_capacity_millicores = snapshot
                    .cpu_capacity_millicores
                    .saturating_add(cpu_capacity);
                snapshot.memory_capacity_bytes = snapshot
                    .memory_capacity_bytes
                    .saturating_add(memory_capacity);
            }
        }

        Ok(snapshot)
    }

    async fn delete(&self, kind: ResourceKind, path: &str) -> Result<()> {
        if !kind.supports_delete() {
            anyhow::bail!("{} cannot be deleted", kind.title());
        }
        let (namespace, name) = namespaced(path);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let _ = api.delete(name, &DeleteParams::default()).await?;
        debug!(path, "pod delete requested");
        Ok(())
    }

    async fn sanitize(&self, namespace: Option<&str>) -> Result<usize> {
        let api = self.pods(namespace);
        let list = api.list(&list_params()).await?;
        let mut purged = 0;
        for pod in list.iter().filter(|pod| is_completed(pod)) {
            let scoped: Api<Pod> =
                Api::namespaced(self.client.clone(), &pod.namespace().unwrap_or_default());
            match scoped.delete(&pod.name_any(), &DeleteParams::default()).await {
                Ok(_) => purged += 1,
                Err(error) => warn!(pod = %pod.name_any(), "sanitize delete failed: {error}"),
            }
        }
        Ok(purged)
    }

    async fn fetch_logs(&self, path: &str, container: &str, previous: bool) -> Result<String> {
        let (namespace, name) = namespaced(path);
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = LogParams {
            container: Some(container.to_string()).filter(|value| !value.is_empty()),
            previous,
            tail_lines: Some(500),
            timestamps: true,
            ..LogParams::default()
        };

        pods.logs(name, &params)
            .await
            .with_context(|| format!("failed to load logs for {path}"))
    }
}

pub fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or("Unknown")
}

pub fn is_running(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none() && pod_phase(pod) == PHASE_RUNNING
}

fn is_completed(pod: &Pod) -> bool {
    matches!(pod_phase(pod), PHASE_SUCCEEDED | PHASE_FAILED)
}

pub fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

pub fn pod_row(pod: &Pod) -> RowData {
    let name = pod.name_any();
    let namespace = pod.namespace();
    let status = if pod.metadata.deletion_timestamp.is_some() {
        "Terminating".to_string()
    } else {
        pod_phase(pod).to_string()
    };
    let node = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.node_name.clone())
        .unwrap_or_else(|| "-".to_string());
    let ip = pod
        .status
        .as_ref()
        .and_then(|status| status.pod_ip.clone())
        .unwrap_or_else(|| "-".to_string());
    let (ready, total, restarts) = pod.status.as_ref().map(pod_readiness).unwrap_or((0, 0, 0));
    let age = human_age(pod.metadata.creation_timestamp.as_ref());
    let na = || "n/a".to_string();

    RowData {
        name: name.clone(),
        namespace: namespace.clone(),
        columns: vec![
            namespace.unwrap_or_else(|| "-".to_string()),
            name,
            String::new(),
            format!("{ready}/{total}"),
            status,
            restarts.to_string(),
            na(),
            na(),
            na(),
            na(),
            na(),
            na(),
            ip,
            node,
            age,
        ],
        resources: Some(pod_resources(pod)),
    }
}

pub fn container_rows(pod: &Pod) -> Vec<RowData> {
    let pod_age = human_age(pod.metadata.creation_timestamp.as_ref());
    let mut statuses = HashMap::<&str, &ContainerStatus>::new();
    if let Some(status) = pod.status.as_ref() {
        for container in status
            .container_statuses
            .iter()
            .flatten()
            .chain(status.init_container_statuses.iter().flatten())
            .chain(status.ephemeral_container_statuses.iter().flatten())
        {
            statuses.insert(container.name.as_str(), container);
        }
    }

    let Some(spec) = pod.spec.as_ref() else {
        return Vec::new();
    };
    let mut rows = Vec::new();
    let mut push = |name: &str, image: Option<&String>, init: bool| {
        let status = statuses.get(name).copied();
        let (state, age) = status
            .map(|status| container_state_and_age(status, &pod_age))
            .unwrap_or_else(|| ("Unknown".to_string(), pod_age.clone()));
        let ready = status.map(|status| status.ready).unwrap_or(false);
        let restarts = status.map(|status| status.restart_count).unwrap_or(0);
        rows.push(RowData {
            name: name.to_string(),
            namespace: None,
            columns: vec![
                name.to_string(),
                image.cloned().unwrap_or_else(|| "-".to_string()),
                ready.to_string(),
                state,
                init.to_string(),
                restarts.to_string(),
                age,
            ],
            resources: None,
        });
    };

    for container in &spec.containers {
        push(&container.name, container.image.as_ref(), false);
    }
    for container in spec.init_containers.iter().flatten() {
        push(&container.name, container.image.as_ref(), true);
    }
    for container in spec.ephemeral_containers.iter().flatten() {
        push(&container.name, container.image.as_ref(), false);
    }
    rows
}

pub fn node_row(node: &Node) -> RowData {
    let name = node.name_any();
    let ready = node
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| {
            conditions
                .iter()
                .find(|condition| condition.type_ == "Ready")
        })
        .map(|condition| match condition.status.as_str() {
            "True" => "Ready".to_string(),
            "False" => "NotReady".to_string(),
            _ => "Unknown".to_string(),
        })
        .unwrap_or_else(|| "Unknown".to_string());
    let version = node
        .status
        .as_ref()
        .and_then(|status| status.node_info.as_ref())
        .map(|info| info.kubelet_version.clone())
        .unwrap_or_else(|| "-".to_string());
    let roles = node_roles(node);
    let age = human_age(node.metadata.creation_timestamp.as_ref());

    RowData {
        name: name.clone(),
        namespace: None,
        columns: vec![name, ready, roles, version, age],
        resources: None,
    }
}

fn pod_resources(pod: &Pod) -> PodResources {
    let Some(spec) = pod.spec.as_ref() else {
        return PodResources::default();
    };
    spec.containers
        .iter()
        .fold(PodResources::default(), |mut totals, container| {
            let (cpu_request, memory_request, cpu_limit, memory_limit) =
                container_resources(container);
            totals.cpu_request_millicores += cpu_request;
            totals.memory_request_bytes += memory_request;
            totals.cpu_limit_millicores += cpu_limit;
            totals.memory_limit_bytes += memory_limit;
            totals
        })
}

fn container_resources(container: &Container) -> (u64, u64, u64, u64) {
    let Some(resources) = container.resources.as_ref() else {
        return (0, 0, 0, 0);
    };
    let requests = resources.requests.as_ref();
    let limits = resources.limits.as_ref();
    (
        quantity(requests, "cpu", parse_cpu_millicores),
        quantity(requests, "memory", parse_memory_bytes),
        quantity(limits, "cpu", parse_cpu_millicores),
        quantity(limits, "memory", parse_memory_bytes),
    )
}

fn quantity(
    values: Option<&BTreeMap<String, Quantity>>,
    key: &str,
    parse: fn(&str) -> Option<u64>,
) -> u64 {
    values
        .and_then(|values| values.get(key))
        .and_then(|quantity| parse(&quantity.0))
        .unwrap_or(0)
}

fn container_state_and_age(container: &ContainerStatus, pod_age: &str) -> (String, String) {
    if let Some(state) = container.state.as_ref() {
        if let Some(running) = state.running.as_ref() {
            let age = running
                .started_at
                .as_ref()
                .map(|time| human_age(Some(time)))
                .unwrap_or_else(|| pod_age.to_string());
            return ("Running".to_string(), age);
        }
        if let Some(waiting) = state.waiting.as_ref() {
            let label = waiting
                .reason
                .clone()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "Waiting".to_string());
            return (label, pod_age.to_string());
        }
        if let Some(terminated) = state.terminated.as_ref() {
            let label = terminated
                .reason
                .clone()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| format!("Exit({})", terminated.exit_code));
            let age = terminated
                .finished_at
                .as_ref()
                .map(|time| human_age(Some(time)))
                .unwrap_or_else(|| pod_age.to_string());
            return (label, age);
        }
    }

    ("Unknown".to_string(), pod_age.to_string())
}

fn pod_readiness(status: &PodStatus) -> (usize, usize, i32) {
    let container_statuses = status.container_statuses.as_deref().unwrap_or(&[]);
    let total = container_statuses.len();
    let ready = container_statuses
        .iter()
        .filter(|container| container.ready)
        .count();
    let restarts = container_statuses
        .iter()
        .map(|container| container.restart_count)
        .sum();

    (ready, total, restarts)
}

fn node_roles(node: &Node) -> String {
    let Some(labels) = node.metadata.labels.as_ref() else {
        return "-".to_string();
    };

    let mut roles = labels
        .keys()
        .filter_map(|key| key.strip_prefix("node-role.kubernetes.io/"))
        .map(|role| {
            if role.is_empty() {
                "worker".to_string()
            } else {
                role.to_string()
            }
        })
        .collect::<Vec<_>>();

    if roles.is_empty()
        && let Some(role) = labels.get("kubernetes.io/role")
    {
        roles.push(role.clone());
    }

    if roles.is_empty() {
        "-".to_string()
    } else {
        roles.sort();
        roles.dedup();
        roles.join(",")
    }
}

fn parse_pod_metrics_usage(data: &Value) -> (u64, u64) {
    let Some(containers) = data.get("containers").and_then(Value::as_array) else {
        return (0, 0);
    };

    containers
        .iter()
        .fold((0u64, 0u64), |(cpu, memory), container| {
            let (container_cpu, container_memory) = container
                .get("usage")
                .map(parse_usage_from_value)
                .unwrap_or((0, 0));
            (
                cpu.saturating_add(container_cpu),
                memory.saturating_add(container_memory),
            )
        })
}

fn parse_usage_from_value(value: &Value) -> (u64, u64) {
    let cpu = value
        .get("cpu")
        .and_then(Value::as_str)
        .and_then(parse_cpu_millicores)
        .unwrap_or(0);
    let memory = value
        .get("memory")
        .and_then(Value::as_str)
        .and_then(parse_memory_bytes)
        .unwrap_or(0);
    (cpu, memory)
}

pub fn parse_cpu_millicores(value: &str) -> Option<u64> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = if let Some(number) = raw.strip_suffix('m') {
        (number, 1.0)
    } else if let Some(number) = raw.strip_suffix('u') {
        (number, 0.001)
    } else if let Some(number) = raw.strip_suffix('n') {
        (number, 0.000001)
    } else {
        (raw, 1000.0)
    };

    scaled(number, multiplier)
}

pub fn parse_memory_bytes(value: &str) -> Option<u64> {
    const UNITS: [(&str, f64); 12] = [
        ("Ei", 1_152_921_504_606_846_976.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ti", 1_099_511_627_776.0),
        ("Gi", 1_073_741_824.0),
        ("Mi", 1_048_576.0),
        ("Ki", 1_024.0),
        ("E", 1_000_000_000_000_000_000.0),
        ("P", 1_000_000_000_000_000.0),
        ("T", 1_000_000_000_000.0),
        ("G", 1_000_000_000.0),
        ("M", 1_000_000.0),
        ("K", 1_000.0),
    ];

    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    for (suffix, multiplier) in UNITS {
        if let Some(number) = raw.strip_suffix(suffix) {
            return scaled(number, multiplier);
        }
    }
    if let Some(number) = raw.strip_suffix('m') {
        return scaled(number, 0.001);
    }
    scaled(raw, 1.0)
}

fn scaled(number: &str, multiplier: f64) -> Option<u64> {
    let value = (number.parse::<f64>().ok()? * multiplier).round();
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value as u64)
}

pub fn format_cpu_millicores(value: u64) -> String {
    if value >= 1_000 {
        let cores = value as f64 / 1_000.0;
        format!("{cores:.2}c")
    } else {
        format!("{value}m")
    }
}

pub fn format_bytes(value: u64) -> String {
    const UNITS: [(&str, f64); 6] = [
        ("Ei", 1_152_921_504_606_846_976.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ti", 1_099_511_627_776.0),
        ("Gi", 1_073_741_824.0),
        ("Mi", 1_048_576.0),
        ("Ki", 1_024.0),
    ];
    if value == 0 {
        return "0B".to_string();
    }

    let value_f64 = value as f64;
    for (suffix, unit_size) in UNITS {
        if value_f64 >= unit_size {
            return format!("{:.1}{suffix}", value_f64 / unit_size);
        }
    }
    format!("{value}B")
}

fn list_params() -> ListParams {
    ListParams::default().limit(500)
}

fn human_age(timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "-".to_string();
    };

    let elapsed_seconds =
        (k8s_openapi::jiff::Timestamp::now().as_second() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}
