#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tafil::project::ProjectState;
use tafil::settings::Settings;
use tafil::{StatusEvent, Supervisor};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::time;

/// Isolated workspace holding projects and a fake `npm` executable.
pub struct TestEnv {
    temp_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a project folder with the given package.json contents.
    pub fn create_project(&self, name: &str, package_json: &str) -> PathBuf {
        let dir = self.root().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("package.json"), package_json).unwrap();
        dir.canonicalize().unwrap()
    }

    /// Write a fake npm. It receives npm's arguments (`run dev`, `start`) and
    /// runs in the project folder with `PORT` set.
    #[cfg(unix)]
    pub fn fake_npm(&self, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.root().join("npm");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    pub fn settings(&self, npm: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.launch.npm = Some(npm.display().to_string());
        settings.launch.source_shell_profile = false;
        settings.stop.grace = "1s".to_string();
        settings.ports.settle = "10ms".to_string();
        settings
    }
}

pub fn vite_package() -> &'static str {
    r#"{"name": "shop", "scripts": {"dev": "vite"}, "devDependencies": {"vite": "^5.0.0"}}"#
}

pub fn cra_package() -> &'static str {
    r#"{"name": "web", "scripts": {"start": "react-scripts start"}, "dependencies": {"react-scripts": "5.0.1"}}"#
}

pub fn express_package() -> &'static str {
    r#"{"name": "api", "scripts": {"start": "node server.js"}, "dependencies": {"express": "^4.18.0"}}"#
}

/// Collect status events for `path` until one matches, failing after `timeout`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<StatusEvent>,
    path: &Path,
    timeout: Duration,
    done: impl Fn(&StatusEvent) -> bool,
) -> Vec<StatusEvent> {
    let mut seen = vec![];
    let result = time::timeout(timeout, async {
        loop {
            match rx.recv().await {
                Ok(event) if event.path == path => {
                    let finished = done(&event);
                    seen.push(event);
                    if finished {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for status of {}; saw {:?}",
        path.display(),
        seen.iter().map(|e| e.state).collect::<Vec<_>>()
    );
    seen
}

pub async fn wait_for_state(
    rx: &mut broadcast::Receiver<StatusEvent>,
    path: &Path,
    state: ProjectState,
) -> Vec<StatusEvent> {
    wait_for(rx, path, Duration::from_secs(15), |e| e.state == state).await
}

pub async fn wait_for_terminal(
    rx: &mut broadcast::Receiver<StatusEvent>,
    path: &Path,
) -> Vec<StatusEvent> {
    wait_for(rx, path, Duration::from_secs(15), |e| e.state.is_terminal()).await
}

/// Poll until `pid` no longer exists.
#[cfg(unix)]
pub async fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    let deadline = time::Instant::now() + timeout;
    while time::Instant::now() < deadline {
        // zombies still accept signal 0, so also check sysinfo's view
        tafil::procs::PROCS.refresh_pids(&[pid]);
        let alive = kill(Pid::from_raw(pid as i32), None).is_ok()
            && tafil::procs::PROCS.is_running(pid);
        if !alive {
            return true;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub fn supervisor(settings: Settings) -> Supervisor {
    Supervisor::new(settings)
}
