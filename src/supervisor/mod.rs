//! Supervisor module - dev-server lifecycle and port arbitration
//!
//! A single control loop owns every `ManagedProject` and the `PortRegistry`.
//! Everything slow (manifest reads, port probes, spawning, reaping, output
//! monitoring) runs in its own task and reports back over one event channel.
//!
//! - `control`: the loop, state transitions and read-only queries
//! - `lifecycle`: start and stop flows
//! - `monitor`: per-process output reading and port sniffing
//! - `failure`: turning an exit into a user-facing message

mod control;
mod failure;
mod lifecycle;
mod monitor;

use crate::error::StartError;
use crate::launcher::{ExitInfo, LaunchedProcess};
use crate::project::{ProjectSnapshot, ProjectState};
use crate::project_type::{Framework, ProjectInfo, StartScript};
use crate::reaper::StopOutcome;
use crate::settings::Settings;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

pub use failure::OutputReport;

const EVENT_CAPACITY: usize = 1024;

/// Published on every state transition.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub path: PathBuf,
    pub state: ProjectState,
    pub bound_port: Option<u16>,
    pub framework: Option<Framework>,
    pub pid: Option<u32>,
    pub error_message: Option<String>,
    /// The port was not announced by the child and may be wrong.
    pub assumed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Out,
    Err,
}

/// Child output, forwarded verbatim.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub path: PathBuf,
    pub stream: LogStream,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartAccepted {
    pub path: PathBuf,
    pub pid: u32,
    /// Port the child was asked to bind; the real one arrives as a status event.
    pub port: u16,
    pub framework: Framework,
    pub display_name: &'static str,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopAccepted {
    pub accepted: bool,
}

pub(crate) type StartReply = oneshot::Sender<Result<StartAccepted, StartError>>;

pub(crate) enum Command {
    Start {
        path: PathBuf,
        custom_port: Option<u32>,
        reply: StartReply,
    },
    Stop {
        path: PathBuf,
        reply: oneshot::Sender<StopAccepted>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ProjectSnapshot>>,
    },
    OwnerOf {
        port: u16,
        reply: oneshot::Sender<Option<PathBuf>>,
    },
}

/// Manifest facts gathered off the control loop.
pub(crate) struct Prepared {
    pub info: ProjectInfo,
    pub script: StartScript,
}

pub(crate) struct Launched {
    pub process: LaunchedProcess,
    pub port: u16,
}

/// Reports from tasks back to the control loop. Each carries the generation
/// of the launch it belongs to.
pub(crate) enum Event {
    Prepared {
        path: PathBuf,
        generation: u64,
        result: Result<Prepared, StartError>,
        reply: StartReply,
    },
    Launched {
        path: PathBuf,
        generation: u64,
        result: Result<Launched, StartError>,
        reply: StartReply,
    },
    PortDetected {
        path: PathBuf,
        generation: u64,
        port: u16,
    },
    DetectionTimeout {
        path: PathBuf,
        generation: u64,
    },
    Exited {
        path: PathBuf,
        generation: u64,
        exit: Option<ExitInfo>,
        report: OutputReport,
    },
    StopCompleted {
        path: PathBuf,
        generation: u64,
        outcome: StopOutcome,
    },
    /// Leftovers of an unrequested exit have been reaped.
    ExitReaped {
        path: PathBuf,
        generation: u64,
        state: ProjectState,
        message: Option<String>,
    },
}

/// Cloneable handle to a running control loop.
#[derive(Clone)]
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    status: broadcast::Sender<StatusEvent>,
    logs: broadcast::Sender<LogEvent>,
}

impl Supervisor {
    /// Spawn the control loop on the current tokio runtime.
    pub fn new(settings: Settings) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status, _) = broadcast::channel(EVENT_CAPACITY);
        let (logs, _) = broadcast::channel(EVENT_CAPACITY);
        let (controller, events) =
            control::Controller::new(Arc::new(settings), status.clone(), logs.clone());
        tokio::spawn(controller.run(command_rx, events));
        Self {
            commands,
            status,
            logs,
        }
    }

    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Start the dev server in `path`. Resolves once the child is spawned or
    /// the request is rejected.
    pub async fn start(
        &self,
        path: impl AsRef<Path>,
        custom_port: Option<u32>,
    ) -> Result<StartAccepted, StartError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Start {
            path: path.as_ref().to_path_buf(),
            custom_port,
            reply,
        }) {
            return Err(StartError::SupervisorClosed);
        }
        rx.await.unwrap_or(Err(StartError::SupervisorClosed))
    }

    /// Begin stopping `path`. Completion is reported as a `Stopped` status event.
    pub async fn stop(&self, path: impl AsRef<Path>) -> StopAccepted {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Stop {
            path: path.as_ref().to_path_buf(),
            reply,
        }) {
            return StopAccepted { accepted: false };
        }
        rx.await.unwrap_or(StopAccepted { accepted: false })
    }

    /// Stop every project in parallel and wait until all of them are reaped.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Command::Shutdown { reply }) {
            let _ = rx.await;
        }
    }

    pub async fn snapshot(&self) -> Vec<ProjectSnapshot> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Snapshot { reply }) {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }

    /// Which managed project holds `port` in the registry.
    pub async fn owner_of(&self, port: u16) -> Option<PathBuf> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::OwnerOf { port, reply }) {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs.subscribe()
    }
}
