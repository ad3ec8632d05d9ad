//! Project lifecycle - start and stop flows
//!
//! A start runs in two off-loop phases. `prepare` reads the manifest (and
//! repairs permissions if needed); the loop then checks the target port
//! against other managed projects and reserves it. `resolve_and_launch`
//! probes the port, names any external occupant, falls back on a lost race
//! and spawns the child.

use super::control::Controller;
use super::monitor::{self, MonitorContext};
use super::failure::{ExitVerdict, OutputReport, classify_exit};
use super::{Event, Launched, Prepared, StartAccepted, StartReply, StopAccepted};
use crate::error::{StartError, project_name};
use crate::launcher::{self, LaunchSpec, LaunchedProcess};
use crate::project::{ManagedProject, ProjectState};
use crate::project_type;
use crate::settings::Settings;
use crate::{external_procs, platform, port_probe, reaper};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

pub const CUSTOM_PORTS: std::ops::RangeInclusive<u32> = 1000..=65535;

impl Controller {
    pub(super) fn on_start(&mut self, path: PathBuf, custom_port: Option<u32>, reply: StartReply) {
        info!("start requested for {}", path.display());
        if !path.is_absolute() || !path.is_dir() {
            let _ = reply.send(Err(StartError::InvalidPath { path }));
            return;
        }
        if let Some(existing) = self.projects.get(&path) {
            warn!("{} is already {}", path.display(), existing.state);
            let _ = reply.send(Err(StartError::AlreadyRunning {
                path,
                state: existing.state.to_string(),
            }));
            return;
        }
        let requested_port = match custom_port {
            Some(port) if CUSTOM_PORTS.contains(&port) => Some(port as u16),
            Some(port) => {
                let _ = reply.send(Err(StartError::InvalidPort { port }));
                return;
            }
            None => None,
        };

        let generation = self.next_generation();
        self.projects.insert(
            path.clone(),
            ManagedProject::new(path.clone(), requested_port, generation),
        );
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = prepare(path.clone()).await;
            let _ = events.send(Event::Prepared {
                path,
                generation,
                result,
                reply,
            });
        });
    }

    pub(super) fn on_prepared(
        &mut self,
        path: PathBuf,
        generation: u64,
        result: Result<Prepared, StartError>,
        reply: StartReply,
    ) {
        let Some((stop_pending, requested_port)) = self
            .current(&path, generation)
            .map(|p| (p.stop_pending, p.requested_port))
        else {
            let _ = reply.send(Err(StartError::Cancelled { path }));
            return;
        };
        if stop_pending {
            info!("start of {} cancelled before launch", path.display());
            self.finish(&path, ProjectState::Stopped, None);
            let _ = reply.send(Err(StartError::Cancelled { path }));
            return;
        }
        let prepared = match result {
            Ok(prepared) => prepared,
            Err(e) => {
                self.projects.remove(&path);
                let _ = reply.send(Err(e));
                return;
            }
        };

        let auto = requested_port.is_none();
        let port = requested_port.unwrap_or(self.settings.default_port(prepared.info.framework));
        info!(
            "detected {} project in {} (port {port})",
            prepared.info.display_name,
            path.display()
        );
        if let Some(owner) = self.managed_owner(port, &path) {
            self.projects.remove(&path);
            let _ = reply.send(Err(StartError::PortConflictManaged {
                port,
                project: project_name(&owner),
                owner,
            }));
            return;
        }

        let claimed = self.claimed_ports(&path);
        if let Some(project) = self.projects.get_mut(&path) {
            project.framework = Some(prepared.info.framework);
            project.script = Some(prepared.script);
            project.provisional_port = Some(port);
        }
        let settings = self.settings.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let spec = LaunchSpec {
                project: path.clone(),
                script: prepared.script,
                port,
                framework: prepared.info.framework,
            };
            let result = resolve_and_launch(spec, auto, claimed, settings).await;
            let _ = events.send(Event::Launched {
                path,
                generation,
                result,
                reply,
            });
        });
    }

    pub(super) fn on_launched(
        &mut self,
        path: PathBuf,
        generation: u64,
        result: Result<Launched, StartError>,
        reply: StartReply,
    ) {
        let Some(stop_pending) = self.current(&path, generation).map(|p| p.stop_pending) else {
            if let Ok(launched) = result {
                warn!("{} launched without a record, terminating it", path.display());
                self.spawn_reaper(path.clone(), generation, launched.process.handle);
            }
            let _ = reply.send(Err(StartError::Cancelled { path }));
            return;
        };

        let Launched { process, port } = match result {
            Ok(launched) => launched,
            Err(e) => {
                if stop_pending {
                    self.finish(&path, ProjectState::Stopped, None);
                } else if e.is_rejection() {
                    self.projects.remove(&path);
                } else {
                    self.finish(&path, ProjectState::Errored, Some(e.to_string()));
                }
                let _ = reply.send(Err(e));
                return;
            }
        };
        let LaunchedProcess {
            handle,
            stdin,
            stdout,
            stderr,
            command,
        } = process;
        let pid = handle.pid;
        info!("started {} with pid {pid}", path.display());

        let Some(project) = self.projects.get_mut(&path) else {
            return;
        };
        project.handle = Some(handle.clone());
        project.provisional_port = Some(port);
        project.command = Some(command.clone());
        let framework = project.framework.unwrap_or(project_type::Framework::Node);

        match self.registry.owner_of(port) {
            Some(owner) if owner != path => {
                warn!("port {port} already registered to {}", owner.display())
            }
            _ => self.registry.record_ownership(port, &path),
        }

        tokio::spawn(monitor::run(MonitorContext {
            path: path.clone(),
            generation,
            handle: handle.clone(),
            stdin,
            stdout,
            stderr,
            events: self.events.clone(),
            logs: self.logs.clone(),
            buffer_bytes: self.settings.detect.buffer_bytes,
        }));

        let _ = reply.send(Ok(StartAccepted {
            path: path.clone(),
            pid,
            port,
            framework,
            display_name: framework.display_name(),
            command,
        }));

        if stop_pending {
            info!("stop requested while {} was starting, terminating pid {pid}", path.display());
            self.spawn_reaper(path, generation, handle);
            return;
        }

        self.emit(&path, None);
        let timeout = self.settings.detect_timeout(framework.is_slow_to_boot());
        let events = self.events.clone();
        let timer_path = path.clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = events.send(Event::DetectionTimeout {
                path: timer_path,
                generation,
            });
        });
        if let Some(project) = self.projects.get_mut(&path) {
            project.detection_timer = Some(timer.abort_handle());
        }
    }

    pub(super) fn on_port_detected(&mut self, path: &Path, generation: u64, port: u16) {
        let Some(project) = self.current(path, generation) else {
            return;
        };
        if !matches!(project.state, ProjectState::Starting | ProjectState::Running) {
            return;
        }
        if project.bound_port == Some(port) && !project.assumed {
            return;
        }
        project.cancel_detection_timer();
        let stale = [project.provisional_port, project.bound_port]
            .into_iter()
            .flatten()
            .filter(|p| *p != port)
            .collect::<Vec<_>>();
        project.bound_port = Some(port);
        project.assumed = false;
        project.state = ProjectState::Running;
        for stale_port in stale {
            self.registry.release_port(stale_port, path);
        }
        self.registry.record_ownership(port, path);
        self.emit(path, None);
    }

    pub(super) fn on_detection_timeout(&mut self, path: &Path, generation: u64) {
        let settings = self.settings.clone();
        let Some(project) = self.current(path, generation) else {
            return;
        };
        let window = settings.detect_timeout(project.framework.is_some_and(|f| f.is_slow_to_boot()));
        project.detection_timer = None;
        if !project.state.is_starting() {
            return;
        }
        if project.handle.as_ref().is_some_and(|h| h.has_exited()) {
            debug!("{} already exited, not assuming a port", path.display());
            return;
        }
        let Some(port) = project.provisional_port else {
            return;
        };
        warn!(
            "no port announced by {} within {}, assuming {port}",
            path.display(),
            humantime::format_duration(window)
        );
        project.bound_port = Some(port);
        project.assumed = true;
        project.state = ProjectState::Running;
        self.emit(path, None);
    }

    pub(super) fn on_exited(
        &mut self,
        path: &Path,
        generation: u64,
        exit: Option<launcher::ExitInfo>,
        report: OutputReport,
    ) {
        let Some((state, command, pid)) = self
            .current(path, generation)
            .map(|p| (p.state, p.command.clone().unwrap_or_default(), p.pid()))
        else {
            return;
        };
        if state.is_stopping() {
            debug!("{} exited while stopping", path.display());
            return;
        }
        let exit = exit.unwrap_or(launcher::ExitInfo {
            code: None,
            signal: None,
        });
        info!("{} exited with {exit}", path.display());
        let (state, message) = match classify_exit(exit, &report, &command) {
            ExitVerdict::Stopped(message) => (ProjectState::Stopped, message),
            ExitVerdict::Errored(message) => (ProjectState::Errored, Some(message)),
        };
        let Some(pid) = pid else {
            self.finish(path, state, message);
            return;
        };
        if let Some(project) = self.projects.get_mut(path) {
            project.cancel_detection_timer();
        }

        // the record and its ports stay claimed until the rest of the tree is gone
        let grace = self.settings.stop_grace();
        let events = self.events.clone();
        let path = path.to_path_buf();
        tokio::spawn(async move {
            if reaper::sweep_group(pid, grace).await {
                info!("reaped processes left behind by {}", path.display());
            }
            let _ = events.send(Event::ExitReaped {
                path,
                generation,
                state,
                message,
            });
        });
    }

    pub(super) fn on_exit_reaped(
        &mut self,
        path: &Path,
        generation: u64,
        state: ProjectState,
        message: Option<String>,
    ) {
        let Some(project) = self.current(path, generation) else {
            return;
        };
        // a stop issued meanwhile reports its own completion
        if project.state.is_stopping() {
            return;
        }
        self.finish(path, state, message);
    }

    pub(super) fn on_stop(&mut self, path: &Path) -> StopAccepted {
        let Some(project) = self.projects.get_mut(path) else {
            debug!("{} is not running", path.display());
            return StopAccepted { accepted: false };
        };
        if project.state.is_stopping() {
            return StopAccepted { accepted: true };
        }
        info!("stopping {}", path.display());
        project.cancel_detection_timer();
        project.state = ProjectState::Stopping;
        let generation = project.generation;
        let handle = project.handle.clone();
        if handle.is_none() {
            project.stop_pending = true;
        }
        self.emit(path, None);
        match handle {
            Some(handle) => self.spawn_reaper(path.to_path_buf(), generation, handle),
            None => debug!("{} has no process yet, stopping once launched", path.display()),
        }
        StopAccepted { accepted: true }
    }
}

async fn prepare(path: PathBuf) -> Result<Prepared, StartError> {
    tokio::task::spawn_blocking(move || {
        ensure_readable(&path)?;
        let script = project_type::pick_start_script(&path)?;
        let info = project_type::detect(&path);
        Ok(Prepared { info, script })
    })
    .await
    .unwrap_or_else(|e| Err(StartError::Internal(format!("manifest task failed: {e}"))))
}

fn ensure_readable(path: &Path) -> Result<(), StartError> {
    if project_type::manifest_readable(path) {
        return Ok(());
    }
    let manifest = project_type::manifest_path(path);
    match std::fs::metadata(&manifest) {
        // a missing manifest is reported by the script lookup
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        _ => {}
    }
    warn!("permission denied for {}, attempting to fix", path.display());
    if let Err(e) = platform::current().repair_permissions(path) {
        warn!("could not fix permissions for {}: {e}", path.display());
    }
    if project_type::manifest_readable(path) {
        info!("permissions fixed for {}", path.display());
        return Ok(());
    }
    Err(StartError::PermissionDenied {
        path: path.to_path_buf(),
        help: format!(
            "check folder permissions or run: chmod -R u+rwX \"{}\"",
            path.display()
        ),
    })
}

/// First free port above `taken`, skipping ports other projects have claimed.
async fn fallback_port(
    taken: u16,
    attempts: u16,
    claimed: &[u16],
    settle: Duration,
) -> Option<u16> {
    let mut start = taken.checked_add(1)?;
    let mut remaining = attempts;
    while remaining > 0 {
        let found = port_probe::find_free_port(start, remaining, settle).await?;
        if !claimed.contains(&found) {
            return Some(found);
        }
        remaining = remaining.saturating_sub(found - start + 1);
        start = found.checked_add(1)?;
    }
    None
}

async fn resolve_and_launch(
    mut spec: LaunchSpec,
    auto: bool,
    claimed: Vec<u16>,
    settings: Arc<Settings>,
) -> Result<Launched, StartError> {
    let settle = settings.port_settle();
    let port = spec.port;
    if !port_probe::is_port_free(port, settle).await {
        warn!("port {port} is occupied by a process tafil does not manage");
        let occupant = external_procs::describe_occupant(port, &settings).await;
        return Err(StartError::external_conflict(port, &spec.project, occupant));
    }
    if auto && !port_probe::is_port_free(port, settle).await {
        warn!("port {port} became occupied during the check, finding a fallback");
        let fallback = fallback_port(port, settings.ports.fallback_attempts, &claimed, settle)
            .await
            .ok_or(StartError::PortsExhausted { port })?;
        info!("using fallback port {fallback}");
        spec.port = fallback;
    }
    let process = launcher::launch(&spec, &settings.launch).await?;
    Ok(Launched {
        process,
        port: spec.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_skips_claimed_ports() {
        let held = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let taken = held.local_addr().unwrap().port();
        let first = fallback_port(taken, 50, &[], Duration::ZERO).await.unwrap();
        let second = fallback_port(taken, 50, &[first], Duration::ZERO)
            .await
            .unwrap();
        assert!(first > taken);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_fallback_exhausted() {
        assert_eq!(fallback_port(u16::MAX, 10, &[], Duration::ZERO).await, None);
    }

    #[test]
    fn test_missing_manifest_is_not_a_permission_problem() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_readable(dir.path()).is_ok());
    }
}
