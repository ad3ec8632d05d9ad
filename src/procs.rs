use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, UpdateKind};

/// Cached view of the OS process table.
pub struct Procs {
    system: Mutex<sysinfo::System>,
}

pub static PROCS: Lazy<Procs> = Lazy::new(Procs::new);

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        let procs = Self {
            system: Mutex::new(sysinfo::System::new()),
        };
        procs.refresh_processes();
        procs
    }

    fn lock_system(&self) -> std::sync::MutexGuard<'_, sysinfo::System> {
        self.system.lock().unwrap_or_else(|poisoned| {
            warn!("System mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether the process table can be enumerated on this platform at all.
    pub fn is_supported(&self) -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    /// Zombies count as exited: they hold no port and only wait to be reaped.
    pub fn is_running(&self, pid: u32) -> bool {
        self.lock_system()
            .process(Pid::from_u32(pid))
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    /// All transitive descendants of `pid`, deepest first.
    pub fn all_children(&self, pid: u32) -> Vec<u32> {
        let system = self.lock_system();
        let root = Pid::from_u32(pid);
        let mut children = vec![];
        for (child_pid, process) in system.processes() {
            let mut depth = 0usize;
            let mut process = process;
            while let Some(parent) = process.parent() {
                depth += 1;
                if parent == root {
                    children.push((depth, child_pid.as_u32()));
                    break;
                }
                match system.process(parent) {
                    Some(p) => process = p,
                    None => break,
                }
            }
        }
        children.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        children.into_iter().map(|(_, pid)| pid).collect()
    }

    /// Full command line, joined with spaces.
    pub fn command_line(&self, pid: u32) -> Option<String> {
        let system = self.lock_system();
        let process = system.process(Pid::from_u32(pid))?;
        let cmd = process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        if cmd.is_empty() {
            None
        } else {
            Some(cmd.join(" "))
        }
    }

    pub fn cwd(&self, pid: u32) -> Option<PathBuf> {
        self.lock_system()
            .process(Pid::from_u32(pid))
            .and_then(|p| p.cwd())
            .map(|p| p.to_path_buf())
    }

    pub fn refresh_processes(&self) {
        self.lock_system()
            .refresh_processes(ProcessesToUpdate::All, true);
    }

    pub fn refresh_pids(&self, pids: &[u32]) {
        let pids = pids.iter().map(|p| Pid::from_u32(*p)).collect::<Vec<_>>();
        self.lock_system()
            .refresh_processes(ProcessesToUpdate::Some(&pids), true);
    }

    /// Refresh the command line and working directory of specific processes.
    pub fn refresh_details(&self, pids: &[u32]) {
        let pids = pids.iter().map(|p| Pid::from_u32(*p)).collect::<Vec<_>>();
        self.lock_system().refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_cwd(UpdateKind::OnlyIfNotSet),
        );
    }
}
