use crate::project::ProjectState;
use crate::project_type;
use crate::settings::Settings;
use crate::supervisor::{LogStream, Supervisor};
use crate::{Result, error::project_name};
use miette::{IntoDiagnostic, bail};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::select;
use tokio::sync::broadcast::error::RecvError;

/// Start a project's dev server and stream its output
#[derive(Debug, clap::Args)]
#[clap(
    visible_alias = "r",
    verbatim_doc_comment,
    long_about = "\
Start a project's dev server and stream its output

Detects the framework, picks a free port (or uses --port), runs the
dev/serve/start script and prints the port the server actually bound.
Press Ctrl-C to stop the server and everything it spawned.
Refuses to start a project whose dependencies are not installed unless
--force is given.

Examples:
  tafil run ~/code/shop
  tafil run ~/code/api --port 4000"
)]
pub struct Run {
    /// Project folder containing package.json
    pub path: PathBuf,
    /// Port to pass to the dev server instead of the framework default
    #[clap(short, long)]
    pub port: Option<u32>,
    /// Start even if node_modules is missing
    #[clap(short, long)]
    pub force: bool,
}

impl Run {
    pub async fn run(&self) -> Result<()> {
        let path = std::path::absolute(&self.path).into_diagnostic()?;
        check_dependencies(&path, self.force)?;
        let supervisor = Supervisor::new(Settings::get().clone());
        let mut status = supervisor.subscribe_status();
        let mut logs = supervisor.subscribe_logs();

        let accepted = supervisor.start(&path, self.port).await?;
        info!(
            "started {} ({}) with `{}` on port {}, pid {}",
            project_name(&path),
            accepted.display_name,
            accepted.command,
            accepted.port,
            accepted.pid
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            select! {
                event = status.recv() => match event {
                    Ok(event) if event.path == path => {
                        match event.state {
                            ProjectState::Running => {
                                let port = event.bound_port.map(|p| p.to_string()).unwrap_or_default();
                                if event.assumed {
                                    warn!("no port announced yet, assuming {port}");
                                }
                                println!("{} {} http://localhost:{port}", project_name(&path), event.state.style());
                            }
                            ProjectState::Stopped => {
                                if let Some(msg) = event.error_message {
                                    warn!("{msg}");
                                }
                                println!("{} {}", project_name(&path), event.state.style());
                                return Ok(());
                            }
                            ProjectState::Errored => {
                                let msg = event.error_message.unwrap_or_else(|| "process failed".to_string());
                                bail!("{}: {msg}", project_name(&path));
                            }
                            _ => debug!("{} is {}", path.display(), event.state),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => warn!("missed {n} status events"),
                    Err(RecvError::Closed) => return Ok(()),
                },
                event = logs.recv() => match event {
                    Ok(event) => write_output(event.stream, &event.text),
                    Err(RecvError::Lagged(n)) => debug!("skipped {n} output chunks"),
                    Err(RecvError::Closed) => {}
                },
                _ = &mut ctrl_c => {
                    info!("stopping {}", project_name(&path));
                    supervisor.shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

fn check_dependencies(path: &Path, force: bool) -> Result<()> {
    if !path.join(project_type::MANIFEST).is_file() || project_type::dependencies_installed(path)
    {
        return Ok(());
    }
    if force {
        warn!("{} has no node_modules, starting anyway", project_name(path));
        return Ok(());
    }
    bail!(
        "{} has no node_modules. Run `npm install` first or pass --force",
        project_name(path)
    );
}

fn write_output(stream: LogStream, text: &str) {
    let _ = match stream {
        LogStream::Out => {
            let mut out = std::io::stdout().lock();
            out.write_all(text.as_bytes()).and_then(|_| out.flush())
        }
        LogStream::Err => {
            let mut err = std::io::stderr().lock();
            err.write_all(text.as_bytes()).and_then(|_| err.flush())
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_dependencies_gate() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), r#"{"name": "shop"}"#).unwrap();

        let err = check_dependencies(dir.path(), false).unwrap_err();
        assert!(err.to_string().contains("npm install"), "{err}");
        assert!(check_dependencies(dir.path(), true).is_ok());

        fs::create_dir(dir.path().join("node_modules")).unwrap();
        assert!(check_dependencies(dir.path(), false).is_ok());
    }

    #[test]
    fn test_missing_manifest_is_left_to_start() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_dependencies(dir.path(), false).is_ok());
    }
}
