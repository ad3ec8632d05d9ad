//! Spawning dev-server scripts.

use crate::env;
use crate::error::StartError;
use crate::platform::{self, Invocation, PlatformOps};
use crate::project_type::{Framework, StartScript};
use crate::settings::LaunchSettings;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub project: PathBuf,
    pub script: StartScript,
    pub port: u16,
    pub framework: Framework,
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown exit status"),
        }
    }
}

/// Shared view of a spawned child. The child itself is owned by a waiter
/// task that publishes its exit exactly once; clones observe the same exit.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub pid: u32,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl ProcessHandle {
    pub fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_info().is_some()
    }

    /// Resolves once the child has exited.
    pub async fn wait(&self) -> Option<ExitInfo> {
        let mut exit = self.exit.clone();
        match exit.wait_for(|e| e.is_some()).await {
            Ok(info) => *info,
            Err(_) => None,
        }
    }
}

pub struct LaunchedProcess {
    pub handle: ProcessHandle,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    /// The command line that was run, for error messages.
    pub command: String,
}

pub fn npm_command(launch: &LaunchSettings) -> String {
    launch
        .npm
        .clone()
        .unwrap_or_else(|| platform::current().default_npm().to_string())
}

/// Variables the child sees on top of the inherited environment.
pub fn child_env(spec: &LaunchSpec) -> Vec<(&'static str, String)> {
    let port = spec.port.to_string();
    let mut vars = vec![("PORT", port.clone()), ("FORCE_COLOR", "1".to_string())];
    match spec.framework {
        Framework::Cra => {
            vars.push(("BROWSER", "none".to_string()));
            vars.push(("SKIP_PREFLIGHT_CHECK", "true".to_string()));
        }
        Framework::Vite => vars.push(("VITE_PORT", port)),
        _ => {}
    }
    vars
}

fn build_command(
    spec: &LaunchSpec,
    invocation: &Invocation,
    platform: &dyn PlatformOps,
) -> Command {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .current_dir(&spec.project)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(path) = platform.child_path(env::ORIGINAL_PATH.as_deref()) {
        cmd.env("PATH", path);
    }
    for (key, value) in child_env(spec) {
        cmd.env(key, value);
    }
    platform.configure_command(&mut cmd);
    cmd
}

fn spawn(
    spec: &LaunchSpec,
    invocation: &Invocation,
    platform: &dyn PlatformOps,
    command: &str,
) -> io::Result<LaunchedProcess> {
    let mut child = build_command(spec, invocation, platform).spawn()?;
    let Some(pid) = child.id() else {
        return Err(io::Error::other("process exited before its pid could be read"));
    };
    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (exit_tx, exit_rx) = watch::channel(None);
    tokio::spawn(async move {
        let info = match child.wait().await {
            Ok(status) => ExitInfo::from(status),
            Err(e) => {
                warn!("failed to wait on pid {pid}: {e}");
                ExitInfo {
                    code: None,
                    signal: None,
                }
            }
        };
        debug!("pid {pid} exited: {info}");
        exit_tx.send_replace(Some(info));
    });

    Ok(LaunchedProcess {
        handle: ProcessHandle { pid, exit: exit_rx },
        stdin,
        stdout,
        stderr,
        command: command.to_string(),
    })
}

fn launch_failed(command: &str, project: &Path, err: io::Error) -> StartError {
    let kind = err.kind();
    let (message, help) = match kind {
        io::ErrorKind::NotFound => (
            format!("command not found: {}", first_word(command)),
            Some("make sure Node.js and npm are installed and on your PATH".to_string()),
        ),
        io::ErrorKind::PermissionDenied => (
            err.to_string(),
            Some(format!("try running: chmod -R u+rwX \"{}\"", project.display())),
        ),
        _ => (err.to_string(), None),
    };
    StartError::LaunchFailed {
        command: command.to_string(),
        kind,
        os_code: err.raw_os_error(),
        message,
        help,
    }
}

fn first_word(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or(command)
}

/// Spawn the start script with stdin, stdout and stderr piped. A permission
/// error triggers one repair attempt and a single retry.
pub async fn launch(spec: &LaunchSpec, launch: &LaunchSettings) -> Result<LaunchedProcess, StartError> {
    let platform = platform::current();
    let command = spec.script.command(&npm_command(launch));
    let invocation = platform.spawn_invocation(&command, launch);
    info!(
        "launching `{command}` in {} on port {}",
        spec.project.display(),
        spec.port
    );
    debug!("invocation: {invocation}");

    match spawn(spec, &invocation, platform, &command) {
        Ok(launched) => Ok(launched),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            warn!("permission denied launching in {}: {e}", spec.project.display());
            let project = spec.project.clone();
            match tokio::task::spawn_blocking(move || platform::current().repair_permissions(&project)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("could not repair permissions: {e}"),
                Err(e) => warn!("permission repair task failed: {e}"),
            }
            spawn(spec, &invocation, platform, &command)
                .map_err(|e| launch_failed(&command, &spec.project, e))
        }
        Err(e) => Err(launch_failed(&command, &spec.project, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(framework: Framework) -> LaunchSpec {
        LaunchSpec {
            project: PathBuf::from("/work/app"),
            script: StartScript::Dev,
            port: 5173,
            framework,
        }
    }

    #[test]
    fn test_child_env_per_framework() {
        let vars = child_env(&spec(Framework::Vite));
        assert!(vars.contains(&("PORT", "5173".to_string())));
        assert!(vars.contains(&("VITE_PORT", "5173".to_string())));
        assert!(vars.contains(&("FORCE_COLOR", "1".to_string())));

        let vars = child_env(&spec(Framework::Cra));
        assert!(vars.contains(&("BROWSER", "none".to_string())));
        assert!(vars.contains(&("SKIP_PREFLIGHT_CHECK", "true".to_string())));
        assert!(!vars.iter().any(|(k, _)| *k == "VITE_PORT"));

        let vars = child_env(&spec(Framework::Express));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_npm_command_override() {
        let launch = LaunchSettings {
            npm: Some("/opt/bin/pnpm".to_string()),
            source_shell_profile: false,
        };
        assert_eq!(npm_command(&launch), "/opt/bin/pnpm");
    }

    #[test]
    fn test_not_found_names_command() {
        let err = launch_failed(
            "npm run dev",
            Path::new("/work/app"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.to_string().contains("command not found: npm"), "{err}");
        assert!(matches!(
            err,
            StartError::LaunchFailed {
                kind: io::ErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn test_exit_info_display() {
        let info = ExitInfo {
            code: Some(127),
            signal: None,
        };
        assert_eq!(info.to_string(), "exit code 127");
        assert!(!info.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_runs_script_with_port() {
        use tokio::io::AsyncReadExt;
        let dir = tempfile::tempdir().unwrap();
        let npm = dir.path().join("fake-npm");
        std::fs::write(&npm, "#!/bin/sh\necho \"$1 $2 on $PORT\"\n").unwrap();
        std::fs::set_permissions(
            &npm,
            <std::fs::Permissions as std::os::unix::fs::PermissionsExt>::from_mode(0o755),
        )
        .unwrap();
        let launch_settings = LaunchSettings {
            npm: Some(npm.display().to_string()),
            source_shell_profile: false,
        };
        let spec = LaunchSpec {
            project: dir.path().to_path_buf(),
            script: StartScript::Dev,
            port: 4321,
            framework: Framework::Node,
        };
        let mut launched = launch(&spec, &launch_settings).await.unwrap();
        let mut out = String::new();
        launched
            .stdout
            .take()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out.trim(), "run dev on 4321");
        let exit = launched.handle.wait().await.unwrap();
        assert!(exit.success());
        assert!(launched.handle.has_exited());
    }
}
