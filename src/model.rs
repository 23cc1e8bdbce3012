use chrono::{DateTime, Local};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

pub const BLANK_NAMESPACE: &str = "";

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Pods,
    Containers,
    Nodes,
}

impl ResourceKind {
    pub fn title(self) -> &'static str {
        match self {
            Self::Pods => "Pods",
            Self::Containers => "Containers",
            Self::Nodes => "Nodes",
        }
    }

    pub fn short_token(self) -> &'static str {
        match self {
            Self::Pods => "po",
            Self::Containers => "co",
            Self::Nodes => "no",
        }
    }

    /// Whether the accessor for this kind can delete single instances.
    pub fn supports_delete(self) -> bool {
        matches!(self, Self::Pods)
    }

    /// Whether the accessor for this kind can bulk-purge completed instances.
    pub fn supports_sanitize(self) -> bool {
        matches!(self, Self::Pods)
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.short_token())
    }
}

/// Splits a `namespace/name` path. Cluster scoped paths yield a blank namespace.
pub fn namespaced(path: &str) -> (&str, &str) {
    match path.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => (BLANK_NAMESPACE, path),
    }
}

pub fn fqn(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}/{name}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NamespaceScope {
    All,
    Named(String),
}

impl NamespaceScope {
    pub fn label(&self) -> String {
        match self {
            Self::All => "all".to_string(),
            Self::Named(namespace) => namespace.clone(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Named(namespace) => Some(namespace.as_str()),
        }
    }
}

impl Display for NamespaceScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Named(namespace) => write!(f, "{namespace}"),
        }
    }
}

/// Requests and limits summed over a pod's containers.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PodResources {
    pub cpu_request_millicores: u64,
    pub cpu_limit_millicores: u64,
    pub memory_request_bytes: u64,
    pub memory_limit_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RowData {
    pub name: String,
    pub namespace: Option<String>,
    pub columns: Vec<String>,
    pub resources: Option<PodResources>,
}

impl RowData {
    pub fn path(&self) -> String {
        fqn(self.namespace.as_deref().unwrap_or(BLANK_NAMESPACE), &self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<RowData>,
    pub last_refreshed: Option<DateTime<Local>>,
    pub error: Option<String>,
    pub summary: Option<String>,
}

impl TableData {
    pub fn set_rows(
        &mut self,
        headers: Vec<String>,
        rows: Vec<RowData>,
        refreshed_at: DateTime<Local>,
    ) {
        self.headers = headers;
        self.rows = rows;
        self.last_refreshed = Some(refreshed_at);
        self.error = None;
    }

    pub fn set_error(&mut self, error: impl Into<String>, refreshed_at: DateTime<Local>) {
        self.rows.clear();
        self.error = Some(error.into());
        self.last_refreshed = Some(refreshed_at);
    }

    pub fn index_of_header(&self, header: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(header))
    }

    pub fn index_of_path(&self, path: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.path() == path)
    }

    pub fn sort_by_column(&mut self, sort: &SortSpec) {
        let Some(index) = self.index_of_header(&sort.column) else {
            return;
        };
        self.rows.sort_by(|left, right| {
            let ordering = compare_cells(
                left.columns.get(index).map(String::as_str).unwrap_or(""),
                right.columns.get(index).map(String::as_str).unwrap_or(""),
            )
            .then_with(|| left.path().cmp(&right.path()));
            if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SortSpec {
    pub column: String,
    pub ascending: bool,
}

fn compare_cells(left: &str, right: &str) -> Ordering {
    match (leading_number(left), leading_number(right)) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

fn leading_number(value: &str) -> Option<f64> {
    let digits = value
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect::<String>();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok()
}

#[derive(Debug, Clone, Default)]
pub struct UsageSnapshot {
    pub cpu_usage_millicores: u64,
    pub cpu_capacity_millicores: u64,
    pub memory_usage_bytes: u64,
    pub memory_capacity_bytes: u64,
    pub pod_usage: HashMap<String, (u64, u64)>,
}
