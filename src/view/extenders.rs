use anyhow::Result;
use crossterm::event::KeyEvent;

use super::{BindEnv, DecorateEnv, Extender, ViewContext};
use crate::app::{App, AppCommand};
use crate::dialog::{Confirmation, Prompt};
use crate::k8s::{format_bytes, format_cpu_millicores};
use crate::keys::{ActionOpts, Key, KeyAction, KeyActions};
use crate::model::{ResourceKind, TableData, namespaced};

pub const FORWARD_INDICATOR: &str = "Ⓕ";

/// Base layer every viewer starts from.
pub struct Browser;

impl Extender for Browser {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn bind_keys(
        &self,
        kind: ResourceKind,
        actions: &mut KeyActions<App>,
        _env: &BindEnv,
    ) -> Result<()> {
        actions.bulk([
            (
                Key::ctrl('r'),
                KeyAction::new("Reload", ActionOpts::visible(), |app: &mut App, _| {
                    app.queue(AppCommand::Reload);
                    None
                }),
            ),
            (
                Key::char(' '),
                KeyAction::new("Mark", ActionOpts::hidden(), |app: &mut App, _| {
                    app.mark_selected();
                    None
                }),
            ),
            (
                Key::ctrl('\\'),
                KeyAction::new("Clear Marks", ActionOpts::hidden(), |app: &mut App, _| {
                    app.clear_marks();
                    None
                }),
            ),
            (Key::shift('n'), sort_action("NAME", "Sort Name", true)),
        ]);

        if kind.supports_delete() {
            actions.add(
                Key::ctrl('d'),
                KeyAction::new("Delete", ActionOpts::dangerous(), move |app: &mut App, key| {
                    delete_cmd(app, key, kind, "Delete")
                }),
            );
        }
        Ok(())
    }

    fn inject(&self, selection: Option<&str>, context: &mut ViewContext) {
        if let Some(selection) = selection {
            let (namespace, _) = namespaced(selection);
            if !namespace.is_empty() {
                context.namespace = Some(namespace.to_string());
            }
        }
    }
}

/// A hidden binding sorting the active view on `column`.
pub fn sort_action(column: &'static str, description: &str, ascending: bool) -> KeyAction<App> {
    KeyAction::new(description, ActionOpts::hidden(), move |app: &mut App, _| {
        app.sort_active(column, ascending);
        None
    })
}

/// Asks before deleting the marked rows, or the selected one when nothing
/// is marked. Passes the key through when there is nothing to delete.
pub fn delete_cmd(
    app: &mut App,
    key: KeyEvent,
    kind: ResourceKind,
    verb: &str,
) -> Option<KeyEvent> {
    let paths = app
        .active_view()
        .map(|view| view.selected_paths())
        .unwrap_or_default();
    let message = match paths.as_slice() {
        [] => return Some(key),
        [path] => format!("{verb} {path}?"),
        many => format!(
            "{verb} {} marked {}?",
            many.len(),
            kind.title().to_lowercase()
        ),
    };
    app.confirm(Confirmation::new(
        verb,
        message,
        Some(AppCommand::Delete { kind, paths }),
        None,
    ));
    None
}

pub struct LogsExtender;

impl LogsExtender {
    fn logs(app: &mut App, key: KeyEvent, previous: bool) -> Option<KeyEvent> {
        let Some(view) = app.active_view() else {
            return Some(key);
        };
        let Some(selection) = view.selected_path() else {
            return Some(key);
        };
        let command = match view.kind() {
            ResourceKind::Containers => {
                let Some(path) = view.context().pod_path.clone() else {
                    return Some(key);
                };
                let (_, container) = namespaced(&selection);
                AppCommand::Logs {
                    path,
                    container: Some(container.to_string()),
                    previous,
                }
            }
            ResourceKind::Pods => AppCommand::Logs {
                path: selection,
                container: None,
                previous,
            },
            ResourceKind::Nodes => return Some(key),
        };
        app.queue(command);
        None
    }
}

impl Extender for LogsExtender {
    fn name(&self) -> &'static str {
        "logs"
    }

    fn bind_keys(
        &self,
        kind: ResourceKind,
        actions: &mut KeyActions<App>,
        _env: &BindEnv,
    ) -> Result<()> {
        if !matches!(kind, ResourceKind::Pods | ResourceKind::Containers) {
            anyhow::bail!("{} have no logs", kind.title());
        }
        actions.bulk([
            (
                Key::char('l'),
                KeyAction::new("Logs", ActionOpts::visible(), |app: &mut App, key| {
                    Self::logs(app, key, false)
                }),
            ),
            (
                Key::char('p'),
                KeyAction::new("Logs Previous", ActionOpts::visible(), |app: &mut App, key| {
                    Self::logs(app, key, true)
                }),
            ),
        ]);
        Ok(())
    }
}

/// Fills the usage columns from metrics-server and totals them in the title.
pub struct UsageExtender;

impl Extender for UsageExtender {
    fn name(&self) -> &'static str {
        "usage"
    }

    fn decorate(&self, table: &mut TableData, env: &DecorateEnv<'_>) {
        let usage = env.usage;
        let cpu = table.index_of_header("CPU");
        let mem = table.index_of_header("MEM");
        let cpu_request = table.index_of_header("%CPU/R");
        let cpu_limit = table.index_of_header("%CPU/L");
        let mem_request = table.index_of_header("%MEM/R");
        let mem_limit = table.index_of_header("%MEM/L");

        for row in &mut table.rows {
            let Some(&(cpu_used, mem_used)) = usage.pod_usage.get(&row.path()) else {
                continue;
            };
            let resources = row.resources.unwrap_or_default();
            let cells = [
                (cpu, format_cpu_millicores(cpu_used)),
                (mem, format_bytes(mem_used)),
                (cpu_request, percent(cpu_used, resources.cpu_request_millicores)),
                (cpu_limit, percent(cpu_used, resources.cpu_limit_millicores)),
                (mem_request, percent(mem_used, resources.memory_request_bytes)),
                (mem_limit, percent(mem_used, resources.memory_limit_bytes)),
            ];
            for (index, value) in cells {
                if let Some(cell) = index.and_then(|index| row.columns.get_mut(index)) {
                    *cell = value;
                }
            }
        }

        if usage.cpu_capacity_millicores > 0 || usage.memory_capacity_bytes > 0 {
            table.summary = Some(format!(
                "cpu {}/{} ({}%) mem {}/{} ({}%)",
                format_cpu_millicores(usage.cpu_usage_millicores),
                format_cpu_millicores(usage.cpu_capacity_millicores),
                percent(usage.cpu_usage_millicores, usage.cpu_capacity_millicores),
                format_bytes(usage.memory_usage_bytes),
                format_bytes(usage.memory_capacity_bytes),
                percent(usage.memory_usage_bytes, usage.memory_capacity_bytes),
            ));
        }
    }
}

fn percent(value: u64, basis: u64) -> String {
    if basis == 0 {
        return "n/a".to_string();
    }
    (value.saturating_mul(100) / basis).to_string()
}

pub struct PortForwardExtender;

impl PortForwardExtender {
    fn start(app: &mut App, key: KeyEvent) -> Option<KeyEvent> {
        let Some(path) = app.selected_path() else {
            return Some(key);
        };
        if app.forwarders().is_none() {
            app.flash_mut().error("port forwarding is disabled");
            return Some(key);
        }
        let target = path.clone();
        app.prompt(Prompt::new(
            format!("Port-Forward {path} (local:remote)"),
            "",
            move |input: String| {
                parse_port_mapping(&input)
                    .map(|(local_port, remote_port)| AppCommand::PortForward {
                        path: target,
                        local_port,
                        remote_port,
                    })
                    .ok_or_else(|| format!("invalid port mapping {input:?}, expected local:remote"))
            },
        ));
        None
    }

    fn stop(app: &mut App, key: KeyEvent) -> Option<KeyEvent> {
        let Some(path) = app.selected_path() else {
            return Some(key);
        };
        let Some(forwarders) = app.forwarders_mut() else {
            app.flash_mut().error("port forwarding is disabled");
            return Some(key);
        };
        match forwarders.delete_forwarder(&path) {
            0 => app.flash_mut().warn(format!("no port-forward active on {path}")),
            count => app
                .flash_mut()
                .info(format!("Stopped {count} port-forward(s) on {path}")),
        }
        app.redecorate_active();
        None
    }
}

impl Extender for PortForwardExtender {
    fn name(&self) -> &'static str {
        "port-forward"
    }

    fn bind_keys(
        &self,
        kind: ResourceKind,
        actions: &mut KeyActions<App>,
        _env: &BindEnv,
    ) -> Result<()> {
        if kind != ResourceKind::Pods {
            anyhow::bail!("{} cannot be port-forwarded", kind.title());
        }
        actions.bulk([
            (
                Key::shift('f'),
                KeyAction::new("Port-Forward", ActionOpts::visible(), Self::start),
            ),
            (
                Key::ctrl('f'),
                KeyAction::new("Stop Forward", ActionOpts::visible(), Self::stop),
            ),
        ]);
        Ok(())
    }

    fn decorate(&self, table: &mut TableData, env: &DecorateEnv<'_>) {
        let (Some(forwarders), Some(index)) = (env.forwarders, table.index_of_header("PF")) else {
            return;
        };
        for row in &mut table.rows {
            if forwarders.is_forwarded(&row.path())
                && let Some(cell) = row.columns.get_mut(index)
            {
                *cell = FORWARD_INDICATOR.to_string();
            }
        }
    }
}

pub fn parse_port_mapping(mapping: &str) -> Option<(u16, u16)> {
    let mut parts = mapping.trim().split(':');
    let local = parts.next()?.trim().parse::<u16>().ok()?;
    let remote = parts.next()?.trim().parse::<u16>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((local, remote))
}

#[cfg(test)]
mod tests {
    use super::{
        Browser, FORWARD_INDICATOR, LogsExtender, PortForwardExtender, UsageExtender,
        parse_port_mapping,
    };
    use crate::app::App;
    use crate::forward::{Forwarders, PortForward};
    use crate::k8s::{POD_HEADERS, headers};
    use crate::keys::{Key, KeyActions};
    use crate::model::{PodResources, ResourceKind, RowData, TableData, UsageSnapshot};
    use crate::view::{BindEnv, DecorateEnv, Extender, ViewContext};
    use chrono::Local;

    fn pod_table(names: &[&str]) -> TableData {
        let mut table = TableData::default();
        let rows = names
            .iter()
            .map(|name| RowData {
                name: name.to_string(),
                namespace: Some("ns".to_string()),
                columns: vec![String::new(); POD_HEADERS.len()],
                resources: Some(PodResources {
                    cpu_request_millicores: 200,
                    cpu_limit_millicores: 0,
                    memory_request_bytes: 64 * 1024 * 1024,
                    memory_limit_bytes: 128 * 1024 * 1024,
                }),
                ..RowData::default()
            })
            .collect();
        table.set_rows(headers(&POD_HEADERS), rows, Local::now());
        table
    }

    fn bindings(extender: &dyn Extender, kind: ResourceKind) -> KeyActions<App> {
        let mut actions = KeyActions::new();
        let _ = extender.bind_keys(kind, &mut actions, &BindEnv::default());
        actions
    }

    #[test]
    fn parse_port_mapping_rejects_extra_parts() {
        assert_eq!(parse_port_mapping("8080:80"), Some((8080, 80)));
        assert_eq!(parse_port_mapping(" 5432 : 5432 "), Some((5432, 5432)));
        assert_eq!(parse_port_mapping("8080"), None);
        assert_eq!(parse_port_mapping("1:2:3"), None);
        assert_eq!(parse_port_mapping("http:80"), None);
    }

    #[test]
    fn delete_binding_depends_on_the_kind() {
        assert!(bindings(&Browser, ResourceKind::Pods).contains(&Key::ctrl('d')));
        assert!(!bindings(&Browser, ResourceKind::Nodes).contains(&Key::ctrl('d')));
        assert!(bindings(&Browser, ResourceKind::Nodes).contains(&Key::ctrl('r')));
    }

    #[test]
    fn browser_injects_the_selected_namespace() {
        let mut context = ViewContext::default();
        Browser.inject(Some("kube-system/dns"), &mut context);
        assert_eq!(context.namespace.as_deref(), Some("kube-system"));

        let mut context = ViewContext::default();
        Browser.inject(Some("node-a"), &mut context);
        assert_eq!(context.namespace, None);
    }

    #[test]
    fn logs_and_port_forward_refuse_other_kinds() {
        let mut actions = KeyActions::<App>::new();
        assert!(
            LogsExtender
                .bind_keys(ResourceKind::Nodes, &mut actions, &BindEnv::default())
                .is_err()
        );
        assert!(
            PortForwardExtender
                .bind_keys(ResourceKind::Containers, &mut actions, &BindEnv::default())
                .is_err()
        );
        assert!(bindings(&LogsExtender, ResourceKind::Containers).contains(&Key::char('p')));
    }

    #[test]
    fn usage_fills_columns_and_summary() {
        let mut usage = UsageSnapshot {
            cpu_usage_millicores: 500,
            cpu_capacity_millicores: 2_000,
            memory_usage_bytes: 1024 * 1024 * 1024,
            memory_capacity_bytes: 4 * 1024 * 1024 * 1024,
            ..UsageSnapshot::default()
        };
        usage
            .pod_usage
            .insert("ns/web".to_string(), (100, 32 * 1024 * 1024));
        let mut table = pod_table(&["web", "idle"]);

        UsageExtender.decorate(
            &mut table,
            &DecorateEnv {
                forwarders: None,
                usage: &usage,
            },
        );

        let cell = |row: usize, header: &str| {
            let index = table.index_of_header(header).expect("header");
            table.rows[row].columns[index].clone()
        };
        assert_eq!(cell(0, "%CPU/R"), "50");
        assert_eq!(cell(0, "%CPU/L"), "n/a");
        assert_eq!(cell(0, "%MEM/R"), "50");
        assert_eq!(cell(0, "%MEM/L"), "25");
        assert_eq!(cell(1, "%CPU/R"), "");
        let summary = table.summary.clone().expect("summary");
        assert!(summary.contains("(25%)"));
    }

    #[test]
    fn forwarded_rows_get_an_indicator() {
        let usage = UsageSnapshot::default();
        let mut forwarders = Forwarders::default();
        let (session, _stopped) = PortForward::detached("ns/web", 8080, 80, 7);
        forwarders.register(session);
        let mut table = pod_table(&["web", "db"]);

        PortForwardExtender.decorate(
            &mut table,
            &DecorateEnv {
                forwarders: Some(&forwarders),
                usage: &usage,
            },
        );

        let pf = table.index_of_header("PF").expect("PF column");
        assert_eq!(table.rows[0].columns[pf], FORWARD_INDICATOR);
        assert_eq!(table.rows[1].columns[pf], "");
    }
}
