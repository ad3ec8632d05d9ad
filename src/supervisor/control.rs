//! The control loop: sole owner of project records and the port registry.

use super::{Command, Event, LogEvent, StatusEvent};
use crate::error::{StartError, project_name};
use crate::launcher::ProcessHandle;
use crate::port_registry::PortRegistry;
use crate::project::{ManagedProject, ProjectState};
use crate::reaper;
use crate::settings::Settings;
use itertools::Itertools;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::select;
use tokio::sync::{broadcast, mpsc, oneshot};

pub(super) struct Controller {
    pub(super) settings: Arc<Settings>,
    pub(super) projects: HashMap<PathBuf, ManagedProject>,
    pub(super) registry: PortRegistry,
    pub(super) events: mpsc::UnboundedSender<Event>,
    pub(super) status: broadcast::Sender<StatusEvent>,
    pub(super) logs: broadcast::Sender<LogEvent>,
    next_generation: u64,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl Controller {
    pub(super) fn new(
        settings: Arc<Settings>,
        status: broadcast::Sender<StatusEvent>,
        logs: broadcast::Sender<LogEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            settings,
            projects: HashMap::new(),
            registry: PortRegistry::new(),
            events,
            status,
            logs,
            next_generation: 0,
            shutting_down: false,
            shutdown_waiters: vec![],
        };
        (controller, events_rx)
    }

    pub(super) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        debug!("supervisor control loop started");
        let mut commands_open = true;
        loop {
            select! {
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("all supervisor handles dropped, stopping projects");
                        commands_open = false;
                        self.begin_shutdown(None);
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            if self.shutting_down && self.projects.is_empty() {
                break;
            }
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        debug!("supervisor control loop finished");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                path,
                custom_port,
                reply,
            } => {
                if self.shutting_down {
                    let _ = reply.send(Err(StartError::SupervisorClosed));
                } else {
                    self.on_start(path, custom_port, reply);
                }
            }
            Command::Stop { path, reply } => {
                let _ = reply.send(self.on_stop(&path));
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
            Command::Snapshot { reply } => {
                let snapshot = self
                    .projects
                    .values()
                    .map(ManagedProject::snapshot)
                    .sorted_by(|a, b| a.path.cmp(&b.path))
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::OwnerOf { port, reply } => {
                let _ = reply.send(self.registry.owner_of(port).map(Path::to_path_buf));
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Prepared {
                path,
                generation,
                result,
                reply,
            } => self.on_prepared(path, generation, result, reply),
            Event::Launched {
                path,
                generation,
                result,
                reply,
            } => self.on_launched(path, generation, result, reply),
            Event::PortDetected {
                path,
                generation,
                port,
            } => self.on_port_detected(&path, generation, port),
            Event::DetectionTimeout { path, generation } => {
                self.on_detection_timeout(&path, generation)
            }
            Event::Exited {
                path,
                generation,
                exit,
                report,
            } => self.on_exited(&path, generation, exit, report),
            Event::StopCompleted {
                path,
                generation,
                outcome,
            } => {
                if self.current(&path, generation).is_some() {
                    debug!("{} stopped: {outcome}", path.display());
                    self.finish(&path, ProjectState::Stopped, None);
                }
            }
            Event::ExitReaped {
                path,
                generation,
                state,
                message,
            } => self.on_exit_reaped(&path, generation, state, message),
        }
    }

    pub(super) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// The record for `path`, if it still belongs to launch `generation`.
    pub(super) fn current(&mut self, path: &Path, generation: u64) -> Option<&mut ManagedProject> {
        let project = self.projects.get_mut(path);
        if project.as_ref().is_some_and(|p| p.generation != generation) {
            trace!("ignoring stale event for {} (generation {generation})", path.display());
            return None;
        }
        project
    }

    /// Another project that holds or has reserved `port`.
    pub(super) fn managed_owner(&self, port: u16, path: &Path) -> Option<PathBuf> {
        if let Some(owner) = self.registry.owner_of(port)
            && owner != path
        {
            return Some(owner.to_path_buf());
        }
        self.projects
            .values()
            .find(|p| p.path != path && p.port() == Some(port))
            .map(|p| p.path.clone())
    }

    /// Ports other projects hold or have reserved.
    pub(super) fn claimed_ports(&self, path: &Path) -> Vec<u16> {
        self.registry
            .iter()
            .filter(|(_, owner)| *owner != path)
            .map(|(port, _)| port)
            .chain(
                self.projects
                    .values()
                    .filter(|p| p.path != path)
                    .filter_map(ManagedProject::port),
            )
            .unique()
            .collect()
    }

    pub(super) fn emit(&self, path: &Path, error_message: Option<String>) {
        if let Some(project) = self.projects.get(path) {
            emit(&self.status, project, error_message);
        }
    }

    /// Remove the record, release its ports and publish the terminal state.
    pub(super) fn finish(&mut self, path: &Path, state: ProjectState, error_message: Option<String>) {
        let Some(mut project) = self.projects.remove(path) else {
            return;
        };
        project.cancel_detection_timer();
        project.handle = None;
        project.state = state;
        let released = self.registry.release_ownership(path);
        if !released.is_empty() {
            debug!("released ports {released:?} of {}", path.display());
        }
        emit(&self.status, &project, error_message);
    }

    pub(super) fn spawn_reaper(&self, path: PathBuf, generation: u64, handle: ProcessHandle) {
        let grace = self.settings.stop_grace();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = reaper::stop(&handle, grace).await;
            let _ = events.send(Event::StopCompleted {
                path,
                generation,
                outcome,
            });
        });
    }

    fn begin_shutdown(&mut self, reply: Option<oneshot::Sender<()>>) {
        if !self.shutting_down {
            info!("stopping {} projects", self.projects.len());
        }
        self.shutting_down = true;
        if let Some(reply) = reply {
            self.shutdown_waiters.push(reply);
        }

        let mut batch = vec![];
        for project in self.projects.values_mut() {
            if project.state.is_stopping() {
                continue;
            }
            project.cancel_detection_timer();
            project.state = ProjectState::Stopping;
            emit(&self.status, project, None);
            match &project.handle {
                Some(handle) => batch.push((project.path.clone(), project.generation, handle.clone())),
                None => project.stop_pending = true,
            }
        }
        if batch.is_empty() {
            return;
        }

        let grace = self.settings.stop_grace();
        let events = self.events.clone();
        tokio::spawn(async move {
            let handles = batch.iter().map(|(_, _, h)| h.clone()).collect();
            let outcomes = reaper::stop_all(handles, grace).await;
            for (path, generation, handle) in batch {
                let outcome = outcomes
                    .iter()
                    .find(|(pid, _)| *pid == handle.pid)
                    .map(|(_, outcome)| *outcome)
                    .unwrap_or(reaper::StopOutcome::AlreadyExited);
                let _ = events.send(Event::StopCompleted {
                    path,
                    generation,
                    outcome,
                });
            }
        });
    }
}

pub(super) fn emit(
    status: &broadcast::Sender<StatusEvent>,
    project: &ManagedProject,
    error_message: Option<String>,
) {
    let name = project_name(&project.path);
    match &error_message {
        Some(message) if project.state.is_errored() => {
            error!("project {name} is {}: {message}", project.state)
        }
        Some(message) => info!("project {name} is {}: {message}", project.state),
        None => info!("project {name} is {}", project.state),
    }
    let bound_port = match project.state {
        ProjectState::Running => project.bound_port,
        _ => None,
    };
    let _ = status.send(StatusEvent {
        path: project.path.clone(),
        state: project.state,
        bound_port,
        framework: project.framework,
        pid: project.pid(),
        error_message,
        assumed: project.assumed && project.state.is_running(),
    });
}
