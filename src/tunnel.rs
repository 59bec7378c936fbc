//! Supervisor for the public tunnel subprocess (`cloudflared`).
//!
//! A single owner task holds the [`TunnelState`] and is its only writer. It
//! receives two kinds of messages:
//!
//! - **Commands** from [`TunnelHandle`] (`start`, `stop`), each with a reply channel.
//! - **Events** from helper tasks spawned per process: two output scanners
//!   (stdout and stderr) that report an observed public URL, and an exit
//!   watcher that reports when the process is gone.
//!
//! Every process gets a run number and every event carries it, so output or
//! an exit notification from a process that was already stopped can never
//! touch the state of a newer one.
//!
//! After each message the owner publishes a [`TunnelStatus`] on a `watch`
//! channel; [`TunnelHandle::status`] is a plain read of the latest value.
//!
//! ```text
//! stopped --start--> starting --url seen--> running
//!    ^                   |                     |
//!    +---- exit ---------+---- stop / exit ----+
//! ```

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
};

use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::{mpsc, oneshot, watch},
};
use tracing::{debug, info, warn};

use crate::{config::TunnelConfig, error::GatewayError};

/// Bytes read per output chunk.
const READ_CHUNK: usize = 4096;

/// Lifecycle phase of the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelPhase {
    Stopped,
    Starting,
    Running,
}

/// Published view of the tunnel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelStatus {
    pub url: String,
    pub status: TunnelPhase,
    /// OS process id, when a process is owned.
    #[serde(skip)]
    pub pid: Option<u32>,
    /// Whether the supervisor currently owns a process.
    #[serde(skip)]
    pub has_process: bool,
}

impl TunnelStatus {
    fn stopped() -> Self {
        Self {
            url: String::new(),
            status: TunnelPhase::Stopped,
            pid: None,
            has_process: false,
        }
    }
}

/// How to find and launch the tunnel executable.
#[derive(Debug, Clone)]
pub struct Launch {
    /// Absolute paths checked in order; the first that exists is used.
    pub candidates: Vec<PathBuf>,
    pub args: Vec<String>,
    /// A chunk of output must contain this before a URL is taken from it.
    pub hostname_marker: String,
}

impl Launch {
    /// `cloudflared tunnel --url http://localhost:<port>`, searched for in the
    /// configured path and then the platform's usual install locations.
    pub fn cloudflared(cfg: &TunnelConfig, port: u16) -> Self {
        let mut candidates: Vec<PathBuf> = cfg.executable.iter().cloned().collect();
        candidates.extend(platform_candidates());
        Self {
            candidates,
            args: vec![
                "tunnel".into(),
                "--url".into(),
                format!("http://localhost:{port}"),
            ],
            hostname_marker: cfg.hostname_marker.clone(),
        }
    }

    /// Existence checks only; `PATH` is deliberately not consulted.
    fn locate(&self) -> Result<&Path, GatewayError> {
        self.candidates
            .iter()
            .find(|p| p.is_file())
            .map(PathBuf::as_path)
            .ok_or_else(|| GatewayError::ExecutableNotFound {
                searched: self
                    .candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

#[cfg(windows)]
fn platform_candidates() -> Vec<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("cloudflared.exe")))
        .into_iter()
        .collect()
}

#[cfg(not(windows))]
fn platform_candidates() -> Vec<PathBuf> {
    [
        "/data/data/com.termux/files/usr/bin/cloudflared",
        "/usr/bin/cloudflared",
        "/usr/local/bin/cloudflared",
        "/opt/homebrew/bin/cloudflared",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

/// Take the public URL out of a chunk of tunnel output.
///
/// Only chunks containing `marker` are considered. The URL is the first
/// `https://` substring up to the next whitespace, with trailing punctuation
/// (e.g. a sentence-ending `.` or a table border `|`) trimmed.
pub fn extract_tunnel_url(text: &str, marker: &str) -> Option<String> {
    if !text.contains(marker) {
        return None;
    }
    let start = text.find("https://")?;
    let rest = &text[start..];
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let url = rest[..end].trim_end_matches(|c: char| c.is_ascii_punctuation() && c != '/');
    (url.len() > "https://".len()).then(|| url.to_owned())
}

/// Cloneable front end to the supervisor task.
#[derive(Clone)]
pub struct TunnelHandle {
    commands: mpsc::Sender<Control>,
    status: watch::Receiver<TunnelStatus>,
}

impl TunnelHandle {
    /// Spawn the supervisor task. Must be called inside a Tokio runtime.
    pub fn spawn(launch: Launch) -> Self {
        let (commands, command_rx) = mpsc::channel(16);
        let (events, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(TunnelStatus::stopped());

        let supervisor = Supervisor {
            launch,
            state: TunnelState::default(),
            next_run: 0,
            events,
            status: status_tx,
        };
        tokio::spawn(supervisor.run(command_rx, event_rx));

        Self { commands, status }
    }

    /// Launch the tunnel unless one is already starting or running.
    ///
    /// Returns as soon as the process is spawned; the URL shows up later in
    /// [`status`](Self::status).
    pub async fn start(&self) -> Result<TunnelStatus, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Control::Start(reply))
            .await
            .map_err(|_| GatewayError::TunnelUnavailable)?;
        rx.await.map_err(|_| GatewayError::TunnelUnavailable)?
    }

    /// Kill the tunnel if there is one. Always ends in `stopped`.
    pub async fn stop(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Control::Stop(reply)).await.is_ok() {
            let _ = rx.await;
        }
        true
    }

    pub fn status(&self) -> TunnelStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every published status change.
    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<TunnelStatus> {
        self.status.clone()
    }
}

enum Control {
    Start(oneshot::Sender<Result<TunnelStatus, GatewayError>>),
    Stop(oneshot::Sender<()>),
}

#[derive(Debug)]
enum Event {
    UrlObserved { run: u64, url: String },
    Exited { run: u64, status: Option<ExitStatus> },
}

/// The owned process. Dropping `kill` (or sending on it) terminates it.
#[derive(Debug)]
struct ProcessHandle {
    run: u64,
    pid: Option<u32>,
    kill: oneshot::Sender<()>,
}

/// Owner-side state. `process` is `Some` exactly when `phase != Stopped`,
/// and `url` is non-empty only when `phase == Running`.
#[derive(Debug)]
struct TunnelState {
    phase: TunnelPhase,
    url: String,
    process: Option<ProcessHandle>,
}

impl Default for TunnelState {
    fn default() -> Self {
        Self {
            phase: TunnelPhase::Stopped,
            url: String::new(),
            process: None,
        }
    }
}

struct Supervisor {
    launch: Launch,
    state: TunnelState,
    next_run: u64,
    events: mpsc::UnboundedSender<Event>,
    status: watch::Sender<TunnelStatus>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Control>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Control::Start(reply)) => {
                        let result = self.start();
                        self.publish();
                        let _ = reply.send(result);
                    }
                    Some(Control::Stop(reply)) => {
                        self.stop();
                        self.publish();
                        let _ = reply.send(());
                    }
                    // Every handle is gone; dropping the state kills the process.
                    None => break,
                },
                Some(event) = events.recv() => {
                    self.apply(event);
                    self.publish();
                }
            }
        }
        self.stop();
        self.publish();
    }

    fn start(&mut self) -> Result<TunnelStatus, GatewayError> {
        if self.state.phase != TunnelPhase::Stopped {
            return Ok(self.snapshot());
        }

        let program = self.launch.locate()?.to_path_buf();
        info!(path = %program.display(), "starting tunnel");

        let mut child = Command::new(&program)
            .args(&self.launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GatewayError::SpawnFailed)?;

        self.next_run += 1;
        let run = self.next_run;
        let pid = child.id();

        let marker = &self.launch.hostname_marker;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(scan_output(stdout, "stdout", run, marker.clone(), self.events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(scan_output(stderr, "stderr", run, marker.clone(), self.events.clone()));
        }

        let (kill, kill_rx) = oneshot::channel();
        tokio::spawn(watch_exit(child, run, kill_rx, self.events.clone()));

        self.state = TunnelState {
            phase: TunnelPhase::Starting,
            url: String::new(),
            process: Some(ProcessHandle { run, pid, kill }),
        };
        Ok(self.snapshot())
    }

    fn stop(&mut self) {
        if let Some(process) = self.state.process.take() {
            info!(pid = ?process.pid, run = process.run, "stopping tunnel");
            let _ = process.kill.send(());
        }
        self.state = TunnelState::default();
    }

    fn apply(&mut self, event: Event) {
        let current = self.state.process.as_ref().map(|p| p.run);
        match event {
            Event::UrlObserved { run, url } if current == Some(run) => {
                if self.state.url != url {
                    info!(%url, "tunnel is up");
                }
                self.state.phase = TunnelPhase::Running;
                self.state.url = url;
            }
            Event::Exited { run, status } if current == Some(run) => {
                info!(?status, "tunnel process exited");
                self.state = TunnelState::default();
            }
            stale => debug!(?stale, "ignoring event from a previous tunnel process"),
        }
    }

    fn snapshot(&self) -> TunnelStatus {
        TunnelStatus {
            url: self.state.url.clone(),
            status: self.state.phase,
            pid: self.state.process.as_ref().and_then(|p| p.pid),
            has_process: self.state.process.is_some(),
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.snapshot());
    }
}

/// Read one output stream to EOF, reporting any tunnel URL seen.
async fn scan_output<R>(
    mut reader: R,
    stream: &'static str,
    run: u64,
    marker: String,
    events: mpsc::UnboundedSender<Event>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(stream, error = %e, "tunnel output read failed");
                break;
            }
        };
        let text = String::from_utf8_lossy(&buf[..n]);
        debug!(stream, output = %text.trim_end(), "cloudflared");

        if let Some(url) = extract_tunnel_url(&text, &marker) {
            if events.send(Event::UrlObserved { run, url }).is_err() {
                break;
            }
        }
    }
}

/// Wait for the process to exit, killing it first if asked to.
async fn watch_exit(
    mut child: Child,
    run: u64,
    kill: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<Event>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // A send or a dropped sender both mean "terminate".
        _ = kill => {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill tunnel process");
            }
            child.wait().await
        }
    };
    let status = match status {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(error = %e, "waiting on tunnel process failed");
            None
        }
    };
    let _ = events.send(Event::Exited { run, status });
}
