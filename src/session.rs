//! Hands the terminal to external kubectl sessions and takes it back.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command as TokioCommand;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::k8s::{Cluster, ConnectionFlags};
use crate::model::{BLANK_NAMESPACE, namespaced};

pub const WINDOWS_OS: &str = "windows";
pub const OS_SELECTOR: &str = "kubernetes.io/os";
pub const OS_BETA_SELECTOR: &str = "beta.kubernetes.io/os";

const POWERSHELL: &str = "powershell";
const SHELL_FALLBACK: &str = "command -v bash >/dev/null && exec bash || exec sh";

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("no os information available")]
    NoPlatformInfo,
    #[error(transparent)]
    Fetch(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ShellVerb {
    Exec,
    Attach,
}

impl ShellVerb {
    fn command(self) -> &'static str {
        match self {
            Self::Exec => "exec",
            Self::Attach => "attach",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Exec => "Shell",
            Self::Attach => "Attach",
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct SessionDescriptor {
    pub args: Vec<String>,
    pub banner: Option<String>,
    pub clear: bool,
    pub background: bool,
}

pub trait TerminalControl {
    fn suspend(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    /// Called on the released terminal before the session starts.
    fn announce(&mut self, clear: bool, banner: Option<&str>) -> Result<()>;
}

/// Suspends on construction and resumes exactly once, on `finish` or on drop.
pub struct Handoff<'a, T: TerminalControl + ?Sized> {
    terminal: &'a mut T,
    resumed: bool,
}

impl<'a, T: TerminalControl + ?Sized> Handoff<'a, T> {
    pub fn begin(terminal: &'a mut T) -> Self {
        if let Err(error) = terminal.suspend() {
            warn!("terminal suspend failed: {error:#}");
        }
        Self {
            terminal,
            resumed: false,
        }
    }

    pub fn terminal(&mut self) -> &mut T {
        &mut *self.terminal
    }

    pub fn finish(mut self) -> Result<()> {
        self.resumed = true;
        self.terminal.resume()
    }
}

impl<T: TerminalControl + ?Sized> Drop for Handoff<'_, T> {
    fn drop(&mut self) {
        if !self.resumed
            && let Err(error) = self.terminal.resume()
        {
            error!("terminal resume failed: {error:#}");
        }
    }
}

pub enum SessionOutcome {
    Completed,
    Detached(JoinHandle<Result<()>>),
}

#[derive(Debug, Clone)]
pub struct SessionRunner {
    binary: String,
}

impl SessionRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    pub async fn run<T>(
        &self,
        terminal: &mut T,
        descriptor: &SessionDescriptor,
    ) -> Result<SessionOutcome>
    where
        T: TerminalControl + ?Sized,
    {
        if descriptor.background {
            return Ok(SessionOutcome::Detached(self.spawn_background(descriptor)));
        }

        let mut handoff = Handoff::begin(terminal);
        let run_result = self.run_foreground(handoff.terminal(), descriptor).await;
        let restore_result = handoff.finish();

        match (run_result, restore_result) {
            (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
                "{run_error:#}\nterminal resume error: {restore_error:#}"
            )),
            (Err(error), _) => Err(error),
            (_, Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(SessionOutcome::Completed),
        }
    }

    async fn run_foreground<T>(&self, terminal: &mut T, descriptor: &SessionDescriptor) -> Result<()>
    where
        T: TerminalControl + ?Sized,
    {
        if descriptor.args.is_empty() {
            anyhow::bail!("session has no arguments");
        }
        terminal.announce(descriptor.clear, descriptor.banner.as_deref())?;
        debug!(args = ?descriptor.args, "starting interactive session");

        let status = TokioCommand::new(&self.binary)
            .args(&descriptor.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("failed to run {} {}", self.binary, descriptor.args[0]))?;

        if status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("{} exited with {status}", self.binary))
        }
    }

    fn spawn_background(&self, descriptor: &SessionDescriptor) -> JoinHandle<Result<()>> {
        let binary = self.binary.clone();
        let args = descriptor.args.clone();
        tokio::spawn(async move {
            if args.is_empty() {
                anyhow::bail!("session has no arguments");
            }
            info!(args = ?args, "starting background session");
            let output = TokioCommand::new(&binary)
                .args(&args)
                .stdin(Stdio::null())
                .output()
                .await
                .with_context(|| format!("failed to run {binary} {}", args[0]))?;
            if output.status.success() {
                Ok(())
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(anyhow::anyhow!(
                    "{binary} exited with {}: {}",
                    output.status,
                    stderr.trim()
                ))
            }
        })
    }
}

pub fn connection_args(flags: &ConnectionFlags) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(kubeconfig) = flags.kubeconfig.as_deref().filter(|value| !value.is_empty()) {
        args.extend(["--kubeconfig".to_string(), kubeconfig.to_string()]);
    }
    if let Some(context) = flags.context.as_deref().filter(|value| !value.is_empty()) {
        args.extend(["--context".to_string(), context.to_string()]);
    }
    if let Some(token) = flags.token.as_deref().filter(|value| !value.is_empty()) {
        args.extend(["--token".to_string(), token.to_string()]);
    }
    args
}

pub fn build_shell_args(
    verb: ShellVerb,
    path: &str,
    container: &str,
    flags: &ConnectionFlags,
) -> Vec<String> {
    let (namespace, pod) = namespaced(path);
    let mut args = vec![verb.command().to_string(), "-it".to_string()];
    if namespace != BLANK_NAMESPACE {
        args.extend(["-n".to_string(), namespace.to_string()]);
    }
    args.push(pod.to_string());
    args.extend(connection_args(flags));
    if !container.is_empty() {
        args.extend(["-c".to_string(), container.to_string()]);
    }
    args
}

pub fn compute_shell_args(
    path: &str,
    container: &str,
    flags: &ConnectionFlags,
    platform: Option<&str>,
) -> Vec<String> {
    let mut args = build_shell_args(ShellVerb::Exec, path, container, flags);
    args.push("--".to_string());
    if platform == Some(WINDOWS_OS) {
        args.push(POWERSHELL.to_string());
    } else {
        args.extend(["sh".to_string(), "-c".to_string(), SHELL_FALLBACK.to_string()]);
    }
    args
}

pub fn shell_banner(verb: ShellVerb, path: &str, container: &str) -> String {
    if container.is_empty() {
        format!("{} {path}", verb.label())
    } else {
        format!("{} {path}:{container}", verb.label())
    }
}

/// The beta key wins when both selector keys are present.
pub fn os_from_selector(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels
        .get(OS_BETA_SELECTOR)
        .or_else(|| labels.get(OS_SELECTOR))
        .map(String::as_str)
}

pub async fn pod_platform<C>(cluster: &C, path: &str) -> Result<String, PlatformError>
where
    C: Cluster + ?Sized,
{
    let pod = cluster.fetch_pod(path).await?;
    let spec = pod.spec.unwrap_or_default();
    if let Some(os) = spec.node_selector.as_ref().and_then(os_from_selector) {
        return Ok(os.to_string());
    }

    let Some(node_name) = spec.node_name.filter(|name| !name.is_empty()) else {
        return Err(PlatformError::NoPlatformInfo);
    };
    match cluster.fetch_node(&node_name).await {
        Ok(node) => node
            .metadata
            .labels
            .as_ref()
            .and_then(os_from_selector)
            .map(str::to_string)
            .ok_or(PlatformError::NoPlatformInfo),
        Err(error) => {
            debug!(node = %node_name, "node lookup failed: {error:#}");
            Err(PlatformError::NoPlatformInfo)
        }
    }
}
