//! OS-specific process plumbing: how a start script is invoked, how signals
//! are delivered and how listening sockets are enumerated.

use crate::Result;
use crate::settings::LaunchSettings;
use miette::IntoDiagnostic;
use std::io;
use std::path::Path;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::Posix as Native;
#[cfg(windows)]
pub use windows::Windows as Native;

/// Program and arguments for running a shell command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        write!(f, "{}", shell_words::join(parts))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningSocket {
    pub pid: u32,
    pub port: u16,
    pub process_name: String,
}

pub trait PlatformOps: Send + Sync {
    /// How `command` is handed to the platform shell.
    fn spawn_invocation(&self, command: &str, launch: &LaunchSettings) -> Invocation;

    /// Process group / window flags applied before spawning.
    fn configure_command(&self, cmd: &mut tokio::process::Command);

    fn default_npm(&self) -> &'static str;

    /// `PATH` for the child, with common install locations that exist prepended.
    fn child_path(&self, original: Option<&str>) -> Option<String>;

    /// Deliver a termination request to a single process.
    fn signal(&self, pid: u32, force: bool) -> io::Result<()>;

    /// Terminate `root` and the given descendants, children first.
    fn terminate_tree(&self, root: u32, descendants: &[u32], force: bool) {
        for pid in descendants {
            if let Err(e) = self.signal(*pid, force) {
                debug!("failed to signal child pid {pid}: {e}");
            }
        }
        if let Err(e) = self.signal(root, force) {
            debug!("failed to signal pid {root}: {e}");
        }
    }

    /// Signal whatever is left in the process group led by `leader`.
    /// `Ok(false)` means the group is empty, or the platform has no groups.
    fn signal_group(&self, _leader: u32, _force: bool) -> io::Result<bool> {
        Ok(false)
    }

    fn group_alive(&self, _leader: u32) -> bool {
        false
    }

    /// Best-effort fix for a project the current user cannot read.
    fn repair_permissions(&self, path: &Path) -> Result<()>;

    fn list_listening_sockets(&self) -> Result<Vec<ListeningSocket>> {
        let listeners = listeners::get_all()
            .map_err(|e| io::Error::other(e.to_string()))
            .into_diagnostic()?;
        Ok(listeners
            .into_iter()
            .map(|l| ListeningSocket {
                pid: l.process.pid,
                port: l.socket.port(),
                process_name: l.process.name,
            })
            .collect())
    }
}

static NATIVE: Native = Native;

pub fn current() -> &'static dyn PlatformOps {
    &NATIVE
}
