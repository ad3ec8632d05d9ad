use crate::launcher::ProcessHandle;
use crate::project_type::{Framework, StartScript};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::task::AbortHandle;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumIs,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

impl ProjectState {
    pub fn style(&self) -> String {
        let s = self.to_string();
        match self {
            ProjectState::Starting => console::style(s).yellow().to_string(),
            ProjectState::Running => console::style(s).green().to_string(),
            ProjectState::Stopping => console::style(s).yellow().to_string(),
            ProjectState::Stopped => console::style(s).dim().to_string(),
            ProjectState::Errored => console::style(s).red().to_string(),
        }
    }

    /// A project in one of these states blocks another start of the same path.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ProjectState::Starting | ProjectState::Running | ProjectState::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProjectState::Stopped | ProjectState::Errored)
    }
}

/// One tracked project, owned by the supervisor's control loop.
#[derive(Debug)]
pub struct ManagedProject {
    pub path: PathBuf,
    pub state: ProjectState,
    pub requested_port: Option<u16>,
    /// Port the child was told to use; reserved from acceptance until detection.
    pub provisional_port: Option<u16>,
    pub bound_port: Option<u16>,
    /// The bound port was assumed after the detection window, not read from output.
    pub assumed: bool,
    pub framework: Option<Framework>,
    pub script: Option<StartScript>,
    pub command: Option<String>,
    /// Distinguishes events of this launch from those of an earlier one.
    pub generation: u64,
    pub handle: Option<ProcessHandle>,
    /// A stop arrived before the process handle existed.
    pub stop_pending: bool,
    pub detection_timer: Option<AbortHandle>,
    pub started_at: chrono::DateTime<chrono::Local>,
}

impl ManagedProject {
    pub fn new(path: PathBuf, requested_port: Option<u16>, generation: u64) -> Self {
        Self {
            path,
            state: ProjectState::Starting,
            requested_port,
            provisional_port: requested_port,
            bound_port: None,
            assumed: false,
            framework: None,
            script: None,
            command: None,
            generation,
            handle: None,
            stop_pending: false,
            detection_timer: None,
            started_at: chrono::Local::now(),
        }
    }

    /// The port this project currently claims, confirmed or not.
    pub fn port(&self) -> Option<u16> {
        self.bound_port.or(self.provisional_port)
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().map(|h| h.pid)
    }

    pub fn cancel_detection_timer(&mut self) {
        if let Some(timer) = self.detection_timer.take() {
            timer.abort();
        }
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            path: self.path.clone(),
            state: self.state,
            port: self.port(),
            bound_port: self.bound_port,
            assumed: self.assumed,
            framework: self.framework,
            pid: self.pid(),
            command: self.command.clone(),
            started_at: self.started_at,
        }
    }
}

/// Read-only copy of a project for callers outside the control loop.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectSnapshot {
    pub path: PathBuf,
    pub state: ProjectState,
    pub port: Option<u16>,
    pub bound_port: Option<u16>,
    pub assumed: bool,
    pub framework: Option<Framework>,
    pub pid: Option<u32>,
    pub command: Option<String>,
    pub started_at: chrono::DateTime<chrono::Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ProjectState::Starting.to_string(), "starting");
        assert_eq!(ProjectState::Errored.to_string(), "errored");
        assert_eq!(
            serde_json::to_string(&ProjectState::Running).unwrap(),
            "\"running\""
        );
    }

    #[test]
    fn test_active_and_terminal() {
        assert!(ProjectState::Starting.is_active());
        assert!(ProjectState::Stopping.is_active());
        assert!(!ProjectState::Stopped.is_active());
        assert!(ProjectState::Errored.is_terminal());
        assert!(!ProjectState::Running.is_terminal());
    }

    #[test]
    fn test_port_prefers_bound() {
        let mut project = ManagedProject::new(PathBuf::from("/work/a"), Some(4000), 1);
        assert_eq!(project.port(), Some(4000));
        project.bound_port = Some(4001);
        assert_eq!(project.port(), Some(4001));
        assert_eq!(project.snapshot().bound_port, Some(4001));
    }
}
