mod app;
mod cli;
mod config;
mod dialog;
mod exec;
mod flash;
mod forward;
mod k8s;
mod keys;
mod model;
mod resolver;
mod session;
#[cfg(test)]
mod testing;
mod transfer;
mod ui;
mod view;

use anyhow::{Context, Result};
use app::{App, AppCommand, Settings};
use clap::Parser;
use cli::CliArgs;
use crossterm::cursor::MoveTo;
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode, supports_keyboard_enhancement,
};
use exec::{Completion, Executor};
use forward::ForwardExit;
use futures::{StreamExt, TryStreamExt};
use k8s::{ConnectionFlags, KubeGateway};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{Config as WatchConfig, watcher};
use kube::{Api, Client};
use model::{NamespaceScope, ResourceKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use session::{SessionRunner, TerminalControl};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{self, Stdout, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

const WATCH_THROTTLE: Duration = Duration::from_millis(350);
const WATCH_RETRY_DELAY: Duration = Duration::from_millis(900);

struct Channels {
    completions: mpsc::UnboundedReceiver<Completion>,
    forward_exits: mpsc::UnboundedReceiver<ForwardExit>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let loaded = config::load()?;
    match &loaded.source {
        Some(source) => info!("loaded config from {source}"),
        None => debug!("no config file found, using defaults"),
    }
    let config = loaded.config;

    let flags = ConnectionFlags {
        kubeconfig: args.kubeconfig.clone(),
        context: args.context.clone(),
        token: args.token.clone(),
    };
    let gateway = Arc::new(KubeGateway::new(&flags).await?);
    let namespace_scope = resolve_namespace_scope(&args, &gateway);
    if args.all_namespaces && args.namespace.is_some() {
        warn!("both --all-namespaces and --namespace were provided, using all namespaces");
    }

    let settings = Settings {
        read_only: args.readonly || config.read_only,
        all_containers: config.all_containers,
        port_forward: config.port_forward,
        transfer_retries: config.transfer_retries,
    };
    let mut app = App::new(
        gateway.cluster().to_string(),
        gateway.context().to_string(),
        namespace_scope,
        settings,
    );

    let (completion_tx, completion_rx) = mpsc::unbounded_channel();
    let (forward_tx, forward_rx) = mpsc::unbounded_channel();
    let client = gateway.client();
    let executor = Executor::new(
        gateway,
        SessionRunner::new(config.kubectl.clone()),
        flags,
        config.call_timeout(),
        completion_tx,
        forward_tx,
    );
    let channels = Channels {
        completions: completion_rx,
        forward_exits: forward_rx,
    };

    run(
        &mut app,
        &executor,
        client,
        channels,
        args.refresh_ms.max(500),
    )
    .await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    // The terminal belongs to the UI, so logs go to a file or nowhere.
    let _ = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::sink).try_init(),
    };

    Ok(())
}

fn resolve_namespace_scope(args: &CliArgs, gateway: &KubeGateway) -> NamespaceScope {
    if args.all_namespaces {
        NamespaceScope::All
    } else if let Some(namespace) = &args.namespace {
        NamespaceScope::Named(namespace.clone())
    } else {
        NamespaceScope::Named(gateway.default_namespace().to_string())
    }
}

async fn run(
    app: &mut App,
    executor: &Executor<KubeGateway>,
    client: Client,
    channels: Channels,
    refresh_ms: u64,
) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = run_loop(&mut terminal, app, executor, client, channels, refresh_ms).await;
    if let Some(forwarders) = app.forwarders_mut() {
        forwarders.stop_all();
    }
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_ALTERNATE_KEYS
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

impl TerminalControl for TuiTerminal {
    fn suspend(&mut self) -> Result<()> {
        disable_raw_mode().context("failed to disable raw mode for subprocess")?;
        execute!(self.backend_mut(), LeaveAlternateScreen)
            .context("failed to leave alternate screen for subprocess")?;
        self.show_cursor()
            .context("failed to show cursor for subprocess")?;
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        enable_raw_mode().context("failed to re-enable raw mode after subprocess")?;
        execute!(self.backend_mut(), EnterAlternateScreen)
            .context("failed to re-enter alternate screen after subprocess")?;
        self.clear()
            .context("failed to clear terminal after subprocess")?;
        Ok(())
    }

    fn announce(&mut self, clear: bool, banner: Option<&str>) -> Result<()> {
        let backend = self.backend_mut();
        if clear {
            execute!(backend, Clear(ClearType::All), MoveTo(0, 0))
                .context("failed to clear screen for subprocess")?;
        }
        if let Some(banner) = banner {
            writeln!(backend, "{banner}\n").context("failed to print session banner")?;
            backend.flush().context("failed to flush session banner")?;
        }
        Ok(())
    }
}

async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    executor: &Executor<KubeGateway>,
    client: Client,
    mut channels: Channels,
    refresh_ms: u64,
) -> Result<()> {
    executor.execute(app, terminal, AppCommand::Reload).await;

    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(refresh_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let (watch_tx, mut watch_rx) = mpsc::unbounded_channel::<ResourceKind>();
    let watch_task = spawn_watch_task::<Pod>(
        client,
        app.namespace_scope().clone(),
        ResourceKind::Pods,
        watch_tx,
    );
    let mut watch_throttle = HashMap::<ResourceKind, Instant>::new();

    let result = loop {
        if let Err(error) = terminal.draw(|frame| ui::render(frame, app)) {
            break Err(anyhow::Error::new(error).context("failed to render terminal frame"));
        }

        if !app.running() {
            break Ok(());
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        let commands = app.handle_key(key);
                        if commands.is_empty() {
                            continue;
                        }
                        if let Err(error) = terminal.draw(|frame| ui::render(frame, app)) {
                            break Err(anyhow::Error::new(error).context("failed to render terminal frame"));
                        }
                        for command in commands {
                            executor.execute(app, terminal, command).await;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.flash_mut().error(format!("terminal event error: {error}"));
                    }
                    None => {
                        warn!("terminal event stream closed");
                        break Ok(());
                    }
                }
            }
            _ = ticker.tick() => {
                app.flash_mut().expire(Instant::now());
                executor.execute(app, terminal, AppCommand::Reload).await;
            }
            maybe_kind = watch_rx.recv() => {
                if let Some(kind) = maybe_kind
                    && should_process_watch_event(kind, &mut watch_throttle)
                    && app.active_view().is_some_and(|view| watches(view.kind(), kind))
                {
                    executor.execute(app, terminal, AppCommand::Reload).await;
                }
            }
            maybe_done = channels.completions.recv() => {
                if let Some(done) = maybe_done
                    && app.on_completion(done)
                {
                    executor.execute(app, terminal, AppCommand::Reload).await;
                }
            }
            maybe_exit = channels.forward_exits.recv() => {
                if let Some(exit) = maybe_exit {
                    app.on_forward_exit(exit);
                }
            }
        }
    };

    watch_task.abort();
    result
}

/// Containers are rows of a pod, so pod events refresh both views.
fn watches(view: ResourceKind, event: ResourceKind) -> bool {
    view == event || (view == ResourceKind::Containers && event == ResourceKind::Pods)
}

fn should_process_watch_event(
    kind: ResourceKind,
    throttle: &mut HashMap<ResourceKind, Instant>,
) -> bool {
    let now = Instant::now();
    let Some(last) = throttle.get(&kind) else {
        throttle.insert(kind, now);
        return true;
    };

    if now.duration_since(*last) >= WATCH_THROTTLE {
        throttle.insert(kind, now);
        true
    } else {
        false
    }
}

fn spawn_watch_task<K>(
    client: Client,
    scope: NamespaceScope,
    kind: ResourceKind,
    tx: mpsc::UnboundedSender<ResourceKind>,
) -> JoinHandle<()>
where
    K: Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Send
        + 'static,
    <K as kube::Resource>::DynamicType: Default + Eq + std::hash::Hash + Clone + Send,
{
    tokio::spawn(async move {
        loop {
            let api: Api<K> = match scope.namespace() {
                Some(namespace) => Api::namespaced(client.clone(), namespace),
                None => Api::all(client.clone()),
            };
            let mut events = watcher(api, WatchConfig::default()).boxed();
            loop {
                match events.try_next().await {
                    Ok(Some(_)) => {
                        if tx.send(kind).is_err() {
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!("watch stream error for {}: {error}", kind.title());
                        break;
                    }
                }
            }
            tokio::time::sleep(WATCH_RETRY_DELAY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{should_process_watch_event, watches};
    use crate::model::ResourceKind;
    use std::collections::HashMap;

    #[test]
    fn watch_events_are_throttled_per_kind() {
        let mut throttle = HashMap::new();
        assert!(should_process_watch_event(ResourceKind::Pods, &mut throttle));
        assert!(!should_process_watch_event(ResourceKind::Pods, &mut throttle));
        assert!(should_process_watch_event(ResourceKind::Nodes, &mut throttle));
    }

    #[test]
    fn container_view_follows_pod_events() {
        assert!(watches(ResourceKind::Pods, ResourceKind::Pods));
        assert!(watches(ResourceKind::Containers, ResourceKind::Pods));
        assert!(!watches(ResourceKind::Nodes, ResourceKind::Pods));
    }
}
