use anyhow::{Context, Result};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::k8s::ConnectionFlags;
use crate::model::namespaced;
use crate::session::connection_args;

#[derive(Debug)]
pub struct PortForward {
    pub path: String,
    pub local_port: u16,
    pub remote_port: u16,
    pub pid: u32,
    stop: Option<oneshot::Sender<()>>,
}

impl PortForward {
    pub fn mapping(&self) -> String {
        format!("{}:{}", self.local_port, self.remote_port)
    }

    #[cfg(test)]
    pub fn detached(
        path: &str,
        local_port: u16,
        remote_port: u16,
        pid: u32,
    ) -> (Self, oneshot::Receiver<()>) {
        let (stop, stopped) = oneshot::channel();
        (
            Self {
                path: path.to_string(),
                local_port,
                remote_port,
                pid,
                stop: Some(stop),
            },
            stopped,
        )
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

#[derive(Debug)]
pub struct ForwardExit {
    pub pid: u32,
    pub path: String,
    pub mapping: String,
    pub result: std::result::Result<ExitStatus, String>,
}

/// Active port-forward sessions keyed by the pod path they target.
#[derive(Debug, Default)]
pub struct Forwarders {
    sessions: Vec<PortForward>,
}

impl Forwarders {
    pub fn is_forwarded(&self, path: &str) -> bool {
        self.sessions.iter().any(|session| session.path == path)
    }

    pub fn register(&mut self, session: PortForward) {
        self.sessions.push(session);
    }

    /// Stops and forgets every session for `path`.
    pub fn delete_forwarder(&mut self, path: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain_mut(|session| {
            if session.path == path {
                session.stop();
                false
            } else {
                true
            }
        });
        before - self.sessions.len()
    }

    pub fn remove_by_pid(&mut self, pid: u32) -> Option<PortForward> {
        let index = self.sessions.iter().position(|session| session.pid == pid)?;
        Some(self.sessions.remove(index))
    }

    pub fn stop_all(&mut self) {
        for session in &mut self.sessions {
            session.stop();
        }
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

pub fn port_forward_args(
    path: &str,
    local_port: u16,
    remote_port: u16,
    flags: &ConnectionFlags,
) -> Vec<String> {
    let (namespace, name) = namespaced(path);
    let mut args = vec!["port-forward".to_string()];
    if !namespace.is_empty() {
        args.extend(["-n".to_string(), namespace.to_string()]);
    }
    args.push(format!("pod/{name}"));
    args.push(format!("{local_port}:{remote_port}"));
    args.extend(connection_args(flags));
    args
}

/// Spawns `kubectl port-forward` and a task reporting its exit on `exits`.
pub fn start_port_forward(
    binary: &str,
    path: &str,
    local_port: u16,
    remote_port: u16,
    flags: &ConnectionFlags,
    exits: mpsc::UnboundedSender<ForwardExit>,
) -> Result<PortForward> {
    let child = TokioCommand::new(binary)
        .args(port_forward_args(path, local_port, remote_port, flags))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn port-forward for {path}"))?;
    let pid = child
        .id()
        .context("failed to determine process id for kubectl port-forward")?;

    let (stop_tx, stop_rx) = oneshot::channel();
    let mapping = format!("{local_port}:{remote_port}");
    tokio::spawn(watch_port_forward(
        child,
        stop_rx,
        ForwardExit {
            pid,
            path: path.to_string(),
            mapping,
            result: Err(String::new()),
        },
        exits,
    ));
    debug!(path, pid, "port-forward started");

    Ok(PortForward {
        path: path.to_string(),
        local_port,
        remote_port,
        pid,
        stop: Some(stop_tx),
    })
}

async fn watch_port_forward(
    mut child: Child,
    stop: oneshot::Receiver<()>,
    mut exit: ForwardExit,
    exits: mpsc::UnboundedSender<ForwardExit>,
) {
    exit.result = tokio::select! {
        status = child.wait() => status.map_err(|error| error.to_string()),
        _ = stop => {
            if let Err(error) = child.kill().await {
                warn!(pid = exit.pid, "failed to stop port-forward: {error}");
            }
            child.wait().await.map_err(|error| error.to_string())
        }
    };
    let _ = exits.send(exit);
}

#[cfg(test)]
mod tests {
    use super::{Forwarders, PortForward, port_forward_args};
    use crate::k8s::ConnectionFlags;
    use tokio::sync::oneshot;

    fn session(path: &str, pid: u32) -> (PortForward, oneshot::Receiver<()>) {
        PortForward::detached(path, 8080, 80, pid)
    }

    #[test]
    fn delete_forwarder_stops_matching_sessions() {
        let mut forwarders = Forwarders::default();
        let (web, mut web_stopped) = session("ns/web", 1);
        let (db, mut db_stopped) = session("ns/db", 2);
        forwarders.register(web);
        forwarders.register(db);

        assert!(forwarders.is_forwarded("ns/web"));
        assert_eq!(forwarders.delete_forwarder("ns/web"), 1);
        assert!(!forwarders.is_forwarded("ns/web"));
        assert!(web_stopped.try_recv().is_ok());
        assert!(db_stopped.try_recv().is_err());
        assert_eq!(forwarders.len(), 1);
    }

    #[test]
    fn remove_by_pid_forgets_exited_sessions() {
        let mut forwarders = Forwarders::default();
        let (web, _stopped) = session("ns/web", 42);
        forwarders.register(web);
        let removed = forwarders.remove_by_pid(42).expect("session");
        assert_eq!(removed.mapping(), "8080:80");
        assert!(forwarders.is_empty());
    }

    #[test]
    fn args_target_the_pod() {
        assert_eq!(
            port_forward_args("ns/web", 8080, 80, &ConnectionFlags::default()),
            vec!["port-forward", "-n", "ns", "pod/web", "8080:80"]
        );
    }
}
