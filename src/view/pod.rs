use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent};

use super::extenders::{LogsExtender, PortForwardExtender, UsageExtender, delete_cmd, sort_action};
use super::{BindEnv, Extender, ResourceViewer, ViewContext, ViewerBuilder, container};
use crate::app::{App, AppCommand};
use crate::dialog::Confirmation;
use crate::keys::{ActionOpts, Key, KeyAction, KeyActions};
use crate::model::ResourceKind;

pub const SANITIZE_ACK: &str = "Yes Please!";

pub fn viewer(env: &BindEnv, context: ViewContext) -> ResourceViewer {
    ViewerBuilder::new(ResourceKind::Pods)
        .layer(LogsExtender)
        .layer(UsageExtender)
        .layer(PortForwardExtender)
        .layer(PodExtender)
        .context(context)
        .build(env)
}

pub struct PodExtender;

impl Extender for PodExtender {
    fn name(&self) -> &'static str {
        "pod"
    }

    fn bind_keys(
        &self,
        kind: ResourceKind,
        actions: &mut KeyActions<App>,
        env: &BindEnv,
    ) -> Result<()> {
        if kind != ResourceKind::Pods {
            anyhow::bail!("pod actions do not apply to {}", kind.title());
        }

        if !env.read_only {
            actions.bulk([
                (
                    Key::ctrl('k'),
                    KeyAction::new("Kill", ActionOpts::dangerous(), |app: &mut App, key| {
                        delete_cmd(app, key, ResourceKind::Pods, "Kill")
                    }),
                ),
                (
                    Key::char('s'),
                    KeyAction::new("Shell", ActionOpts::dangerous(), |app: &mut App, key| {
                        with_selection(app, key, |path| AppCommand::Shell {
                            path,
                            container: None,
                        })
                    }),
                ),
                (
                    Key::char('a'),
                    KeyAction::new("Attach", ActionOpts::dangerous(), |app: &mut App, key| {
                        with_selection(app, key, |path| AppCommand::Attach {
                            path,
                            container: None,
                        })
                    }),
                ),
                (
                    Key::char('t'),
                    KeyAction::new("Transfer", ActionOpts::dangerous(), |app: &mut App, key| {
                        with_selection(app, key, |path| AppCommand::PrepareTransfer { path })
                    }),
                ),
                (
                    Key::char('z'),
                    KeyAction::new("Sanitize", ActionOpts::dangerous(), sanitize_cmd),
                ),
            ]);
        }

        actions.bulk([
            (
                Key::char('o'),
                KeyAction::new("Show Node", ActionOpts::visible(), |app: &mut App, key| {
                    with_selection(app, key, |path| AppCommand::ShowNode { path })
                }),
            ),
            (
                Key::code(KeyCode::Enter),
                KeyAction::new("Containers", ActionOpts::visible(), show_containers),
            ),
            (Key::shift('r'), sort_action("READY", "Sort Ready", true)),
            (Key::shift('t'), sort_action("RESTARTS", "Sort Restart", false)),
            (Key::shift('s'), sort_action("STATUS", "Sort Status", true)),
            (Key::shift('i'), sort_action("IP", "Sort IP", true)),
            (Key::shift('o'), sort_action("NODE", "Sort Node", true)),
        ]);
        actions.merge(resource_sorters());
        Ok(())
    }

    fn inject(&self, selection: Option<&str>, context: &mut ViewContext) {
        context.pod_path = selection.map(str::to_string);
    }
}

fn resource_sorters() -> KeyActions<App> {
    let mut actions = KeyActions::new();
    actions.bulk([
        (Key::shift('c'), sort_action("CPU", "Sort CPU", false)),
        (Key::shift('m'), sort_action("MEM", "Sort MEM", false)),
        (Key::shift('x'), sort_action("%CPU/R", "Sort CPU/R", false)),
        (Key::shift('z'), sort_action("%MEM/R", "Sort MEM/R", false)),
        (Key::ctrl('x'), sort_action("%CPU/L", "Sort CPU/L", false)),
        (Key::ctrl('q'), sort_action("%MEM/L", "Sort MEM/L", false)),
    ]);
    actions
}

fn with_selection(
    app: &mut App,
    key: KeyEvent,
    command: impl FnOnce(String) -> AppCommand,
) -> Option<KeyEvent> {
    let Some(path) = app.selected_path() else {
        return Some(key);
    };
    app.queue(command(path));
    None
}

fn sanitize_cmd(app: &mut App, key: KeyEvent) -> Option<KeyEvent> {
    let Some(kind) = app.active_view().map(ResourceViewer::kind) else {
        return Some(key);
    };
    if !kind.supports_sanitize() {
        app.flash_mut()
            .error(format!("{} cannot be sanitized", kind.title()));
        return None;
    }
    let namespace = app.active_namespace();
    let scope = namespace.as_deref().unwrap_or("all namespaces");
    app.confirm(
        Confirmation::new(
            "Sanitize",
            format!(
                "Sanitize deletes every completed or failed pod in {scope}. Type \"{SANITIZE_ACK}\" to proceed."
            ),
            Some(AppCommand::Sanitize { namespace }),
            None,
        )
        .with_ack(SANITIZE_ACK),
    );
    None
}

fn show_containers(app: &mut App, key: KeyEvent) -> Option<KeyEvent> {
    let Some(view) = app.active_view() else {
        return Some(key);
    };
    if view.selected_path().is_none() {
        return Some(key);
    }
    let context = view.child_context();
    let env = app.bind_env();
    app.push_view(container::viewer(&env, context));
    app.queue(AppCommand::Reload);
    None
}

#[cfg(test)]
mod tests {
    use super::viewer;
    use crate::keys::Key;
    use crate::view::{BindEnv, ViewContext};

    #[test]
    fn pod_chain_stacks_layers_in_order() {
        let view = viewer(&BindEnv::default(), ViewContext::default());
        assert_eq!(
            view.layer_names(),
            vec!["browser", "logs", "usage", "port-forward", "pod"]
        );
        assert!(view.actions().contains(&Key::shift('f')));
        assert!(view.actions().contains(&Key::char('l')));
    }

    #[test]
    fn read_only_pod_view_has_no_dangerous_bindings() {
        let view = viewer(&BindEnv { read_only: true }, ViewContext::default());
        for key in [
            Key::ctrl('k'),
            Key::ctrl('d'),
            Key::char('s'),
            Key::char('a'),
            Key::char('t'),
            Key::char('z'),
        ] {
            assert!(!view.actions().contains(&key), "{key} survived read-only");
        }
        assert!(view.actions().contains(&Key::char('o')));
        assert!(view.actions().contains(&Key::shift('c')));
    }

    #[test]
    fn sorters_are_hidden_from_hints() {
        let view = viewer(&BindEnv::default(), ViewContext::default());
        let hints = view.hints();
        assert!(hints.iter().all(|hint| !hint.description.starts_with("Sort")));
        let kill = hints
            .iter()
            .find(|hint| hint.description == "Kill")
            .expect("kill hint");
        assert!(kill.dangerous);
    }
}
