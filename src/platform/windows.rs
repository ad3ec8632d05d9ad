use super::{Invocation, PlatformOps};
use crate::settings::LaunchSettings;
use crate::shell::Shell;
use crate::Result;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub struct Windows;

fn taskkill(pid: u32, force: bool) -> io::Result<()> {
    let pid = pid.to_string();
    let mut args = vec!["/PID", pid.as_str(), "/T"];
    if force {
        args.push("/F");
    }
    let status = Command::new("taskkill")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("taskkill exited with {status}")))
    }
}

impl PlatformOps for Windows {
    fn spawn_invocation(&self, command: &str, launch: &LaunchSettings) -> Invocation {
        let shell = Shell::Cmd;
        Invocation {
            program: shell.program(),
            args: shell.exec_args(command, launch.source_shell_profile),
        }
    }

    fn configure_command(&self, cmd: &mut tokio::process::Command) {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    fn default_npm(&self) -> &'static str {
        "npm.cmd"
    }

    fn child_path(&self, original: Option<&str>) -> Option<String> {
        original.map(str::to_string)
    }

    fn signal(&self, pid: u32, force: bool) -> io::Result<()> {
        taskkill(pid, force)
    }

    /// taskkill /T already walks the tree, so only the root is signalled
    /// unless survivors need a forceful kill.
    fn terminate_tree(&self, root: u32, descendants: &[u32], force: bool) {
        if let Err(e) = taskkill(root, force) {
            debug!("taskkill for pid {root} failed: {e}");
        }
        if force {
            for pid in descendants {
                let _ = taskkill(*pid, true);
            }
        }
    }

    fn repair_permissions(&self, path: &Path) -> Result<()> {
        debug!("no permission repair on windows for {}", path.display());
        Ok(())
    }
}
