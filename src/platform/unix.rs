use super::{Invocation, PlatformOps};
use crate::settings::LaunchSettings;
use crate::shell::Shell;
use crate::{Result, env};
use duct::cmd;
use itertools::Itertools;
use miette::IntoDiagnostic;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill, killpg};
use nix::unistd::Pid;
use std::io;
use std::path::{Path, PathBuf};

pub struct Posix;

fn extra_path_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        env::HOME_DIR.join(".volta").join("bin"),
    ]
}

pub(super) fn prepend_dirs(original: Option<&str>, dirs: &[PathBuf]) -> Option<String> {
    let existing = original
        .map(|p| p.split(':').map(str::to_string).collect_vec())
        .unwrap_or_default();
    let extra = dirs
        .iter()
        .filter(|d| d.is_dir())
        .map(|d| d.to_string_lossy().to_string())
        .filter(|d| !existing.contains(d))
        .collect_vec();
    if extra.is_empty() {
        return original.map(str::to_string);
    }
    Some(extra.into_iter().chain(existing).join(":"))
}

impl PlatformOps for Posix {
    fn spawn_invocation(&self, command: &str, launch: &LaunchSettings) -> Invocation {
        let shell = if launch.source_shell_profile {
            Shell::user_default()
        } else {
            Shell::Sh
        };
        Invocation {
            program: shell.program(),
            args: shell.exec_args(command, launch.source_shell_profile),
        }
    }

    fn configure_command(&self, cmd: &mut tokio::process::Command) {
        // own process group so a terminal Ctrl-C reaches tafil, which then reaps the tree
        cmd.process_group(0);
    }

    fn default_npm(&self) -> &'static str {
        "npm"
    }

    fn child_path(&self, original: Option<&str>) -> Option<String> {
        prepend_dirs(original, &extra_path_dirs())
    }

    fn signal(&self, pid: u32, force: bool) -> io::Result<()> {
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        trace!("sending {signal} to pid {pid}");
        kill(Pid::from_raw(pid as i32), signal).map_err(io::Error::from)
    }

    fn signal_group(&self, leader: u32, force: bool) -> io::Result<bool> {
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };
        trace!("sending {signal} to process group {leader}");
        match killpg(Pid::from_raw(leader as i32), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    fn group_alive(&self, leader: u32) -> bool {
        killpg(Pid::from_raw(leader as i32), None).is_ok()
    }

    fn repair_permissions(&self, path: &Path) -> Result<()> {
        info!("attempting to fix permissions for {}", path.display());
        cmd!("chmod", "-R", "u+rwX", path)
            .stdout_null()
            .stderr_null()
            .run()
            .into_diagnostic()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepend_only_existing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().to_path_buf();
        let missing = dir.path().join("missing");
        let path = prepend_dirs(Some("/usr/bin:/bin"), &[present.clone(), missing]).unwrap();
        assert_eq!(path, format!("{}:/usr/bin:/bin", present.display()));
    }

    #[test]
    fn test_prepend_skips_dirs_already_on_path() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().to_string_lossy().to_string();
        let original = format!("/usr/bin:{present}");
        let path = prepend_dirs(Some(&original), &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(path, original);
    }

    #[test]
    fn test_invocation_without_profile_uses_sh() {
        let launch = LaunchSettings {
            npm: None,
            source_shell_profile: false,
        };
        let invocation = Posix.spawn_invocation("npm run dev", &launch);
        assert_eq!(invocation.program, "/bin/sh");
        assert_eq!(invocation.args, vec!["-c", "npm run dev"]);
    }

    #[tokio::test]
    async fn test_signal_terminates_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();
        Posix.signal(pid, false).unwrap();
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_signal_group_reaches_background_children() {
        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.args(["-c", "sleep 30 & echo $!; exec sleep 30"])
            .stdout(std::process::Stdio::piped());
        Posix.configure_command(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let leader = child.id().unwrap();
        assert!(Posix.group_alive(leader));

        assert!(Posix.signal_group(leader, true).unwrap());
        child.wait().await.unwrap();
        for _ in 0..100 {
            if !Posix.group_alive(leader) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        // an unreaped zombie keeps the group visible in minimal containers
        if Posix.group_alive(leader) {
            assert!(Posix.signal_group(leader, true).is_ok());
        } else {
            assert!(!Posix.signal_group(leader, false).unwrap());
        }
    }

    #[test]
    fn test_repair_permissions_restores_read_access() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("package.json");
        std::fs::write(&file, "{}").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o000)).unwrap();
        Posix.repair_permissions(dir.path()).unwrap();
        let mode = std::fs::metadata(&file).unwrap().permissions().mode();
        assert_eq!(mode & 0o600, 0o600);
    }
}
