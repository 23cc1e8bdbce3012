//! Runs the commands the UI queues. Every failure ends up on the flash line;
//! nothing here stops the event loop.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::app::{App, AppCommand};
use crate::dialog::{Picker, TransferForm};
use crate::flash::compact_error;
use crate::forward::{ForwardExit, start_port_forward};
use crate::k8s::{Cluster, ConnectionFlags, is_running};
use crate::model::{NamespaceScope, ResourceKind};
use crate::resolver::{CompositeTargets, Resolution, ResolveOptions, resolve, resolve_for};
use crate::session::{
    SessionDescriptor, SessionOutcome, SessionRunner, ShellVerb, TerminalControl,
    build_shell_args, compute_shell_args, pod_platform, shell_banner,
};
use crate::transfer::{Direction, TransferRequest};
use crate::view::{ViewContext, node};

pub const TABLE_REFRESH_TIMEOUT: Duration = Duration::from_secs(4);
pub const METRICS_REFRESH_TIMEOUT: Duration = Duration::from_secs(2);
const SANITIZE_TIMEOUT_FACTOR: u32 = 5;

#[derive(Debug)]
pub struct TransferDone {
    pub path: String,
    pub direction: Direction,
    pub result: std::result::Result<(), String>,
}

#[derive(Debug)]
pub struct DeleteDone {
    pub kind: ResourceKind,
    pub results: Vec<(String, std::result::Result<(), String>)>,
}

#[derive(Debug)]
pub struct SanitizeDone {
    pub result: std::result::Result<usize, String>,
}

/// Outcome of a cluster call that ran off the event loop.
#[derive(Debug)]
pub enum Completion {
    Transfer(TransferDone),
    Delete(DeleteDone),
    Sanitize(SanitizeDone),
}

pub struct Executor<C: Cluster + ?Sized> {
    cluster: Arc<C>,
    runner: SessionRunner,
    flags: ConnectionFlags,
    call_timeout: Duration,
    completions: mpsc::UnboundedSender<Completion>,
    forward_exits: mpsc::UnboundedSender<ForwardExit>,
}

/// Stops the active view while the terminal is handed out.
struct ViewHandoff<'a, T: TerminalControl + ?Sized> {
    app: &'a mut App,
    terminal: &'a mut T,
}

impl<T: TerminalControl + ?Sized> TerminalControl for ViewHandoff<'_, T> {
    fn suspend(&mut self) -> Result<()> {
        self.app.stop_active();
        self.terminal.suspend()
    }

    fn resume(&mut self) -> Result<()> {
        let result = self.terminal.resume();
        self.app.start_active();
        result
    }

    fn announce(&mut self, clear: bool, banner: Option<&str>) -> Result<()> {
        self.terminal.announce(clear, banner)
    }
}

impl<C: Cluster + ?Sized + 'static> Executor<C> {
    pub fn new(
        cluster: Arc<C>,
        runner: SessionRunner,
        flags: ConnectionFlags,
        call_timeout: Duration,
        completions: mpsc::UnboundedSender<Completion>,
        forward_exits: mpsc::UnboundedSender<ForwardExit>,
    ) -> Self {
        Self {
            cluster,
            runner,
            flags,
            call_timeout,
            completions,
            forward_exits,
        }
    }

    pub async fn execute<T>(&self, app: &mut App, terminal: &mut T, command: AppCommand)
    where
        T: TerminalControl + ?Sized,
    {
        debug!(?command, "executing");
        match command {
            AppCommand::Reload => self.refresh(app).await,
            AppCommand::Delete { kind, paths } => self.delete(app, kind, paths),
            AppCommand::Sanitize { namespace } => self.sanitize(app, namespace),
            AppCommand::Shell { path, container } => {
                self.shell(app, terminal, ShellVerb::Exec, path, container)
                    .await
            }
            AppCommand::Attach { path, container } => {
                self.shell(app, terminal, ShellVerb::Attach, path, container)
                    .await
            }
            AppCommand::PrepareTransfer { path } => self.prepare_transfer(app, path).await,
            AppCommand::Transfer { path, request } => {
                self.transfer(app, terminal, path, request).await
            }
            AppCommand::ShowNode { path } => self.show_node(app, path).await,
            AppCommand::Logs {
                path,
                container,
                previous,
            } => self.logs(app, path, container, previous).await,
            AppCommand::PortForward {
                path,
                local_port,
                remote_port,
            } => self.port_forward(app, path, local_port, remote_port),
        }
    }

    /// Reloads the active view, skipping it while it is stopped.
    pub async fn refresh(&self, app: &mut App) {
        let Some(view) = app.active_view().filter(|view| view.is_running()) else {
            return;
        };
        let kind = view.kind();
        let context = view.context().clone();
        let scope = app.namespace_scope().clone();

        match timeout(
            TABLE_REFRESH_TIMEOUT,
            self.cluster.fetch_table(kind, &scope, &context),
        )
        .await
        {
            Ok(Ok(table)) => app.set_active_data(table),
            Ok(Err(error)) => app.set_active_error(compact_error(&error)),
            Err(_) => {
                app.flash_mut().warn(format!(
                    "Refresh timed out for {} (showing cached data)",
                    kind.title()
                ));
                return;
            }
        }

        if kind != ResourceKind::Pods {
            return;
        }
        let usage_scope = context.namespace.map(NamespaceScope::Named).unwrap_or(scope);
        match timeout(
            METRICS_REFRESH_TIMEOUT,
            self.cluster.fetch_usage(&usage_scope),
        )
        .await
        {
            Ok(Ok(usage)) => app.set_usage(usage),
            Ok(Err(error)) => debug!("metrics refresh failed: {error:#}"),
            Err(_) => debug!("metrics refresh timed out"),
        }
    }

    /// Starts the deletes in the background. Results come back as a
    /// `Completion::Delete` once every path has been tried.
    fn delete(&self, app: &mut App, kind: ResourceKind, paths: Vec<String>) {
        if !kind.supports_delete() {
            app.flash_mut()
                .error(format!("{} cannot be deleted", kind.title()));
            return;
        }
        let noun = kind.title().to_lowercase();
        match paths.as_slice() {
            [] => return,
            [path] => app.flash_mut().info(format!("Delete resource {noun} {path}")),
            many => app
                .flash_mut()
                .info(format!("Delete {} marked {noun}", many.len())),
        }

        let cluster = Arc::clone(&self.cluster);
        let done = self.completions.clone();
        tokio::spawn(async move {
            let mut results = Vec::with_capacity(paths.len());
            for path in paths {
                let result = cluster
                    .delete(kind, &path)
                    .await
                    .map_err(|error| compact_error(&error));
                if let Err(error) = &result {
                    warn!(%path, %error, "delete failed");
                }
                results.push((path, result));
            }
            let _ = done.send(Completion::Delete(DeleteDone { kind, results }));
        });
    }

    fn sanitize(&self, app: &mut App, namespace: Option<String>) {
        let kind = app.active_view().map(|view| view.kind());
        if !kind.is_some_and(ResourceKind::supports_sanitize) {
            app.flash_mut().error("this view cannot be sanitized");
            return;
        }
        app.flash_mut().info("Sanitizing completed pods...");

        let limit = self.call_timeout * SANITIZE_TIMEOUT_FACTOR;
        let cluster = Arc::clone(&self.cluster);
        let done = self.completions.clone();
        tokio::spawn(async move {
            let result = match timeout(limit, cluster.sanitize(namespace.as_deref())).await {
                Ok(Ok(count)) => Ok(count),
                Ok(Err(error)) => Err(compact_error(&error)),
                Err(_) => Err(format!("Sanitize timed out after {}s", limit.as_secs())),
            };
            let _ = done.send(Completion::Sanitize(SanitizeDone { result }));
        });
    }

    async fn shell<T>(
        &self,
        app: &mut App,
        terminal: &mut T,
        verb: ShellVerb,
        path: String,
        container: Option<String>,
    ) where
        T: TerminalControl + ?Sized,
    {
        let pod = match self.cluster.fetch_pod(&path).await {
            Ok(pod) if is_running(&pod) => pod,
            result => {
                if let Err(error) = result {
                    warn!(path, "pod lookup failed: {error:#}");
                }
                let state = match verb {
                    ShellVerb::Exec => "running",
                    ShellVerb::Attach => "happy",
                };
                app.flash_mut()
                    .error(format!("{path} is not in a {state} state"));
                return;
            }
        };

        let options = ResolveOptions {
            all_init: app.settings().all_containers,
            skip_default: verb == ShellVerb::Attach,
        };
        let container = match resolve(
            &CompositeTargets::from_pod(&pod),
            container.as_deref(),
            options,
        ) {
            Resolution::Target(container) => container,
            Resolution::Pick(containers) => {
                let target = path.clone();
                app.open_picker(Picker::new(
                    format!("{}: {path}", verb.label()),
                    containers,
                    move |container| match verb {
                        ShellVerb::Exec => AppCommand::Shell {
                            path: target,
                            container: Some(container),
                        },
                        ShellVerb::Attach => AppCommand::Attach {
                            path: target,
                            container: Some(container),
                        },
                    },
                ));
                return;
            }
        };

        let args = match verb {
            ShellVerb::Exec => {
                let platform = match pod_platform(self.cluster.as_ref(), &path).await {
                    Ok(platform) => Some(platform),
                    Err(error) => {
                        warn!(path, "os detection failed: {error}");
                        None
                    }
                };
                compute_shell_args(&path, &container, &self.flags, platform.as_deref())
            }
            ShellVerb::Attach => build_shell_args(verb, &path, &container, &self.flags),
        };
        let descriptor = SessionDescriptor {
            args,
            banner: Some(shell_banner(verb, &path, &container)),
            clear: true,
            background: false,
        };

        let result = {
            let mut handoff = ViewHandoff {
                app: &mut *app,
                terminal,
            };
            self.runner.run(&mut handoff, &descriptor).await
        };
        if let Err(error) = result {
            app.flash_mut().error(format!(
                "{} exec failed: {}",
                verb.label(),
                compact_error(&error)
            ));
        }
        self.refresh(app).await;
    }

    async fn prepare_transfer(&self, app: &mut App, path: String) {
        match self.cluster.fetch_pod(&path).await {
            Ok(pod) => {
                let settings = *app.settings();
                let containers =
                    CompositeTargets::from_pod(&pod).eligible(settings.all_containers);
                app.open_transfer(TransferForm::new(
                    &path,
                    containers,
                    settings.transfer_retries,
                ));
            }
            Err(error) => app.flash_mut().err(&error),
        }
    }

    async fn transfer<T>(
        &self,
        app: &mut App,
        terminal: &mut T,
        path: String,
        request: TransferRequest,
    ) where
        T: TerminalControl + ?Sized,
    {
        if let Err(error) = request.validate() {
            app.flash_mut().error(error.to_string());
            return;
        }
        let direction = request.direction;
        match self
            .runner
            .run(terminal, &request.descriptor(&self.flags))
            .await
        {
            Ok(SessionOutcome::Detached(handle)) => {
                app.flash_mut()
                    .info(format!("{} in progress on {path}", direction.label()));
                let done = self.completions.clone();
                tokio::spawn(async move {
                    let result = match handle.await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(error)) => Err(compact_error(&error)),
                        Err(error) => Err(error.to_string()),
                    };
                    let _ = done.send(Completion::Transfer(TransferDone {
                        path,
                        direction,
                        result,
                    }));
                });
            }
            Ok(SessionOutcome::Completed) => app.on_transfer_done(TransferDone {
                path,
                direction,
                result: Ok(()),
            }),
            Err(error) => app.on_transfer_done(TransferDone {
                path,
                direction,
                result: Err(compact_error(&error)),
            }),
        }
    }

    async fn show_node(&self, app: &mut App, path: String) {
        let node = match self.cluster.fetch_pod(&path).await {
            Ok(pod) => pod
                .spec
                .and_then(|spec| spec.node_name)
                .filter(|name| !name.is_empty()),
            Err(error) => {
                app.flash_mut().err(&error);
                return;
            }
        };
        let Some(node) = node else {
            app.flash_mut().error(format!("no node assigned to {path}"));
            return;
        };
        let env = app.bind_env();
        app.push_view(node::viewer(
            &env,
            ViewContext {
                node: Some(node),
                ..ViewContext::default()
            },
        ));
        self.refresh(app).await;
    }

    async fn logs(&self, app: &mut App, path: String, container: Option<String>, previous: bool) {
        let options = ResolveOptions {
            all_init: app.settings().all_containers,
            skip_default: false,
        };
        let container =
            match resolve_for(self.cluster.as_ref(), &path, container.as_deref(), options).await {
                Ok(Resolution::Target(container)) => container,
                Ok(Resolution::Pick(containers)) => {
                    let target = path.clone();
                    app.open_picker(Picker::new(
                        format!("Logs: {path}"),
                        containers,
                        move |container| AppCommand::Logs {
                            path: target,
                            container: Some(container),
                            previous,
                        },
                    ));
                    return;
                }
                Err(error) => {
                    app.flash_mut().err(&error);
                    return;
                }
            };

        match timeout(
            self.call_timeout,
            self.cluster.fetch_logs(&path, &container, previous),
        )
        .await
        {
            Ok(Ok(text)) => {
                let target = if container.is_empty() {
                    path.clone()
                } else {
                    format!("{path}:{container}")
                };
                let title = if previous {
                    format!("Logs (previous) {target}")
                } else {
                    format!("Logs {target}")
                };
                app.show_overlay(title, text);
            }
            Ok(Err(error)) => app.flash_mut().err(&error),
            Err(_) => app.flash_mut().error(format!("Logs timed out for {path}")),
        }
    }

    fn port_forward(&self, app: &mut App, path: String, local_port: u16, remote_port: u16) {
        if app.forwarders().is_none() {
            app.flash_mut().error("port forwarding is disabled");
            return;
        }
        match start_port_forward(
            self.runner.binary(),
            &path,
            local_port,
            remote_port,
            &self.flags,
            self.forward_exits.clone(),
        ) {
            Ok(session) => {
                let mapping = session.mapping();
                if let Some(forwarders) = app.forwarders_mut() {
                    forwarders.register(session);
                }
                app.flash_mut()
                    .info(format!("Port-forward {mapping} started on {path}"));
                app.redecorate_active();
            }
            Err(error) => app.flash_mut().err(&error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Completion, Executor};
    use crate::app::{App, AppCommand, Dialog, Settings};
    use crate::flash::FlashLevel;
    use crate::forward::PortForward;
    use crate::k8s::ConnectionFlags;
    use crate::model::{NamespaceScope, ResourceKind};
    use crate::resolver::DEFAULT_CONTAINER_ANNOTATION;
    use crate::session::SessionRunner;
    use crate::testing::{FakeCluster, FakeTerminal, node, pod};
    use crate::transfer::{Direction, TransferRequest};
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Duration;

    struct Harness {
        executor: Executor<FakeCluster>,
        cluster: Arc<FakeCluster>,
        app: App,
        terminal: FakeTerminal,
        completions: mpsc::UnboundedReceiver<Completion>,
    }

    impl Harness {
        async fn new(cluster: FakeCluster, binary: &str) -> Self {
            let cluster = Arc::new(cluster);
            let (completions_tx, completions) = mpsc::unbounded_channel();
            let (exits_tx, _exits) = mpsc::unbounded_channel();
            let executor = Executor::new(
                Arc::clone(&cluster),
                SessionRunner::new(binary),
                ConnectionFlags::default(),
                Duration::from_secs(1),
                completions_tx,
                exits_tx,
            );
            let mut app = App::new(
                "cluster".to_string(),
                "context".to_string(),
                NamespaceScope::Named("default".to_string()),
                Settings::default(),
            );
            executor.refresh(&mut app).await;
            Self {
                executor,
                cluster,
                app,
                terminal: FakeTerminal::default(),
                completions,
            }
        }

        /// Applies the next background result the way the event loop does.
        async fn settle(&mut self) {
            let done = self.completions.recv().await.expect("completion");
            if self.app.on_completion(done) {
                self.executor.refresh(&mut self.app).await;
            }
        }

        async fn run(&mut self, command: AppCommand) {
            self.executor
                .execute(&mut self.app, &mut self.terminal, command)
                .await;
        }

        fn flash(&self) -> (FlashLevel, String) {
            let (level, text) = self.app.flash().message().expect("flash message");
            (level, text.to_string())
        }
    }

    fn running(name: &str) -> crate::testing::PodBuilder {
        pod("default", name).phase("Running")
    }

    fn shell(path: &str) -> AppCommand {
        AppCommand::Shell {
            path: path.to_string(),
            container: None,
        }
    }

    #[tokio::test]
    async fn bulk_delete_reports_only_the_failure_and_unmarks_everything() {
        let cluster = FakeCluster::default()
            .with_pod(running("pod-1").container("app").build())
            .with_pod(running("pod-2").container("app").build())
            .with_pod(running("pod-3").container("app").build())
            .failing_delete("default/pod-2");
        let mut harness = Harness::new(cluster, "true").await;
        for _ in 0..3 {
            harness.app.mark_selected();
        }
        assert_eq!(harness.app.active_view().expect("view").mark_count(), 3);

        harness
            .run(AppCommand::Delete {
                kind: ResourceKind::Pods,
                paths: vec![
                    "default/pod-1".to_string(),
                    "default/pod-2".to_string(),
                    "default/pod-3".to_string(),
                ],
            })
            .await;
        harness.settle().await;

        let (level, text) = harness.flash();
        assert_eq!(level, FlashLevel::Error);
        assert!(text.contains("default/pod-2"));
        assert!(!text.contains("pod-1") && !text.contains("pod-3"));
        assert_eq!(harness.app.active_view().expect("view").mark_count(), 0);
        assert_eq!(
            harness.cluster.deleted(),
            vec!["default/pod-1", "default/pod-3"]
        );
        assert_eq!(harness.cluster.pod_paths(), vec!["default/pod-2"]);
        assert_eq!(
            harness.app.active_view().expect("view").frame().rows.len(),
            1
        );
    }

    #[tokio::test]
    async fn delete_returns_before_the_cluster_answers() {
        let (cluster, gate) = FakeCluster::default()
            .with_pod(running("web").container("app").build())
            .gated();
        let mut harness = Harness::new(cluster, "true").await;

        harness
            .run(AppCommand::Delete {
                kind: ResourceKind::Pods,
                paths: vec!["default/web".to_string()],
            })
            .await;
        assert_eq!(
            harness.flash(),
            (
                FlashLevel::Info,
                "Delete resource pods default/web".to_string()
            )
        );
        assert!(harness.cluster.deleted().is_empty());
        assert!(harness.completions.try_recv().is_err());

        gate.add_permits(1);
        harness.settle().await;
        assert_eq!(harness.cluster.deleted(), vec!["default/web"]);
        assert!(harness.app.active_view().expect("view").frame().rows.is_empty());
    }

    #[tokio::test]
    async fn delete_stops_forwarders_of_removed_pods() {
        let cluster = FakeCluster::default().with_pod(running("web").container("app").build());
        let mut harness = Harness::new(cluster, "true").await;
        let (session, mut stopped) = PortForward::detached("default/web", 8080, 80, 9);
        harness
            .app
            .forwarders_mut()
            .expect("forwarders")
            .register(session);

        harness
            .run(AppCommand::Delete {
                kind: ResourceKind::Pods,
                paths: vec!["default/web".to_string()],
            })
            .await;
        harness.settle().await;

        assert!(stopped.try_recv().is_ok());
        assert!(harness.app.forwarders().expect("forwarders").is_empty());
    }

    #[tokio::test]
    async fn delete_checks_the_kind_capability() {
        let mut harness = Harness::new(FakeCluster::default(), "true").await;
        harness
            .run(AppCommand::Delete {
                kind: ResourceKind::Nodes,
                paths: vec!["node-a".to_string()],
            })
            .await;
        assert_eq!(harness.flash().0, FlashLevel::Error);
        assert!(harness.cluster.deleted().is_empty());
    }

    #[tokio::test]
    async fn shell_requires_a_running_pod() {
        let cluster =
            FakeCluster::default().with_pod(pod("default", "job").phase("Succeeded").build());
        let mut harness = Harness::new(cluster, "true").await;
        harness.run(shell("default/job")).await;

        assert_eq!(
            harness.flash(),
            (
                FlashLevel::Error,
                "default/job is not in a running state".to_string()
            )
        );
        assert!(harness.terminal.calls.is_empty());
    }

    #[tokio::test]
    async fn shell_refuses_a_terminating_pod() {
        let cluster = FakeCluster::default()
            .with_pod(running("dying").container("app").terminating().build());
        let mut harness = Harness::new(cluster, "true").await;
        harness.run(shell("default/dying")).await;

        assert_eq!(
            harness.flash(),
            (
                FlashLevel::Error,
                "default/dying is not in a running state".to_string()
            )
        );
        assert!(harness.terminal.calls.is_empty());
    }

    #[tokio::test]
    async fn shell_into_single_container_hands_off_and_resumes() {
        let cluster = FakeCluster::default().with_pod(running("web").container("app").build());
        let mut harness = Harness::new(cluster, "true").await;
        harness.run(shell("default/web")).await;

        assert_eq!(
            harness.terminal.calls,
            vec!["suspend", "clear", "banner Shell default/web:app", "resume"]
        );
        assert!(harness.app.dialog().is_none());
        assert!(harness.app.active_view().expect("view").is_running());
    }

    #[tokio::test]
    async fn failed_spawn_still_resumes_exactly_once() {
        let cluster = FakeCluster::default().with_pod(running("web").container("app").build());
        let mut harness = Harness::new(cluster, "/nonexistent/kubectl").await;
        harness.run(shell("default/web")).await;

        let resumes = harness
            .terminal
            .calls
            .iter()
            .filter(|call| *call == "resume")
            .count();
        assert_eq!(resumes, 1);
        let (level, text) = harness.flash();
        assert_eq!(level, FlashLevel::Error);
        assert!(text.starts_with("Shell exec failed"));
        assert!(harness.app.active_view().expect("view").is_running());
    }

    #[tokio::test]
    async fn ambiguous_targets_open_a_picker_that_reenters_once() {
        let cluster = FakeCluster::default().with_pod(
            running("web")
                .sidecar("sidecar-init")
                .container("app")
                .container("logger")
                .build(),
        );
        let mut harness = Harness::new(cluster, "true").await;
        harness.run(shell("default/web")).await;

        let Some(Dialog::Pick(picker)) = harness.app.dialog() else {
            panic!("expected a container picker");
        };
        assert_eq!(picker.items, vec!["app", "logger", "sidecar-init"]);
        assert!(harness.terminal.calls.is_empty());

        let commands = harness
            .app
            .handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE));
        assert_eq!(
            commands,
            vec![AppCommand::Shell {
                path: "default/web".to_string(),
                container: Some("app".to_string()),
            }]
        );
        assert!(harness.app.dialog().is_none());

        for command in commands {
            harness.run(command).await;
        }
        assert!(
            harness
                .terminal
                .calls
                .contains(&"banner Shell default/web:app".to_string())
        );
    }

    #[tokio::test]
    async fn attach_skips_the_default_annotation() {
        let cluster = FakeCluster::default().with_pod(
            running("web")
                .container("app")
                .container("logger")
                .annotation(DEFAULT_CONTAINER_ANNOTATION, "logger")
                .build(),
        );
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::Attach {
                path: "default/web".to_string(),
                container: None,
            })
            .await;
        let Some(Dialog::Pick(picker)) = harness.app.dialog() else {
            panic!("attach should ask for a container");
        };
        assert_eq!(picker.items, vec!["logger", "app"]);

        harness.app.handle_key(KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE));
        harness.run(shell("default/web")).await;
        assert!(harness.app.dialog().is_none());
        assert!(
            harness
                .terminal
                .calls
                .contains(&"banner Shell default/web:logger".to_string())
        );
    }

    #[tokio::test]
    async fn upload_of_missing_file_fails_before_spawn() {
        let cluster = FakeCluster::default().with_pod(running("web").container("app").build());
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::Transfer {
                path: "default/web".to_string(),
                request: TransferRequest {
                    from: "/definitely/not/here.txt".to_string(),
                    to: "default/web:/tmp/here.txt".to_string(),
                    direction: Direction::Upload,
                    container: "app".to_string(),
                    no_preserve: false,
                    retries: 3,
                },
            })
            .await;

        let (level, text) = harness.flash();
        assert_eq!(level, FlashLevel::Error);
        assert!(text.contains("/definitely/not/here.txt"));
        assert!(harness.completions.try_recv().is_err());
        assert!(harness.terminal.calls.is_empty());
    }

    #[tokio::test]
    async fn download_runs_in_the_background() {
        let cluster = FakeCluster::default().with_pod(running("web").container("app").build());
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::Transfer {
                path: "default/web".to_string(),
                request: TransferRequest {
                    from: "default/web:/etc/hosts".to_string(),
                    to: "/tmp/hosts".to_string(),
                    direction: Direction::Download,
                    container: "app".to_string(),
                    no_preserve: true,
                    retries: 3,
                },
            })
            .await;
        assert!(harness.terminal.calls.is_empty());

        let Some(Completion::Transfer(done)) = harness.completions.recv().await else {
            panic!("expected a transfer result");
        };
        assert_eq!(done.result, Ok(()));
        harness.app.on_transfer_done(done);
        assert_eq!(
            harness.flash(),
            (
                FlashLevel::Info,
                "Download successful on default/web!".to_string()
            )
        );
    }

    #[tokio::test]
    async fn prepare_transfer_opens_the_form_with_eligible_containers() {
        let cluster = FakeCluster::default().with_pod(
            running("web")
                .init("migrate")
                .container("app")
                .ephemeral("debugger")
                .build(),
        );
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::PrepareTransfer {
                path: "default/web".to_string(),
            })
            .await;
        let Some(Dialog::Transfer(form)) = harness.app.dialog() else {
            panic!("expected the transfer form");
        };
        assert_eq!(form.containers, vec!["app", "debugger"]);
        assert_eq!(form.container, "app");
        assert_eq!(form.from, "default/web:");
    }

    #[tokio::test]
    async fn sanitize_purges_completed_pods() {
        let cluster = FakeCluster::default()
            .with_pod(running("web").container("app").build())
            .with_pod(pod("default", "job").phase("Succeeded").build());
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::Sanitize {
                namespace: Some("default".to_string()),
            })
            .await;
        assert_eq!(harness.app.active_view().expect("view").frame().rows.len(), 2);

        harness.settle().await;
        assert_eq!(
            harness.flash(),
            (FlashLevel::Info, "Sanitized 1 pods".to_string())
        );
        assert_eq!(harness.app.active_view().expect("view").frame().rows.len(), 1);
    }

    #[tokio::test]
    async fn show_node_pushes_the_node_view() {
        let cluster = FakeCluster::default()
            .with_pod(running("web").container("app").node("node-a").build())
            .with_node(node("node-a", &[("kubernetes.io/os", "linux")]));
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::ShowNode {
                path: "default/web".to_string(),
            })
            .await;
        let view = harness.app.active_view().expect("view");
        assert_eq!(view.kind(), ResourceKind::Nodes);
        assert_eq!(view.context().node.as_deref(), Some("node-a"));
        assert_eq!(view.frame().rows.len(), 1);
    }

    #[tokio::test]
    async fn logs_resolve_the_default_container() {
        let cluster = FakeCluster::default().with_pod(
            running("web")
                .container("app")
                .container("envoy")
                .annotation(DEFAULT_CONTAINER_ANNOTATION, "envoy")
                .build(),
        );
        let mut harness = Harness::new(cluster, "true").await;
        harness
            .run(AppCommand::Logs {
                path: "default/web".to_string(),
                container: None,
                previous: true,
            })
            .await;
        let overlay = harness.app.overlay().expect("logs overlay");
        assert_eq!(overlay.title, "Logs (previous) default/web:envoy");
        assert_eq!(overlay.text, "logs for default/web:envoy");
    }
}
