//! Terminating a dev server together with everything it spawned.
//!
//! `npm run dev` is a shell running npm running node running esbuild; killing
//! only the shell leaves the server holding its port.

use crate::launcher::ProcessHandle;
use crate::platform;
use crate::procs::PROCS;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIs)]
#[strum(serialize_all = "snake_case")]
pub enum StopOutcome {
    /// The process was gone before anything was signalled.
    AlreadyExited,
    Graceful,
    /// The grace period ran out and the tree was killed.
    Forced,
}

async fn descendants_of(pid: u32) -> Vec<u32> {
    let result = tokio::task::spawn_blocking(move || {
        if !PROCS.is_supported() {
            return None;
        }
        PROCS.refresh_processes();
        Some(PROCS.all_children(pid))
    })
    .await;
    match result {
        Ok(Some(children)) => children,
        Ok(None) => {
            warn!("cannot enumerate children of pid {pid} on this platform, terminating only the root");
            vec![]
        }
        Err(e) => {
            warn!("failed to enumerate children of pid {pid}: {e}, terminating only the root");
            vec![]
        }
    }
}

async fn terminate(root: u32, descendants: Vec<u32>, force: bool) {
    let result = tokio::task::spawn_blocking(move || {
        platform::current().terminate_tree(root, &descendants, force)
    })
    .await;
    if let Err(e) = result {
        warn!("terminate task for pid {root} failed: {e}");
    }
}

async fn survivors(pids: &[u32]) -> Vec<u32> {
    if pids.is_empty() {
        return vec![];
    }
    let pids = pids.to_vec();
    tokio::task::spawn_blocking(move || {
        PROCS.refresh_pids(&pids);
        pids.into_iter().filter(|p| PROCS.is_running(*p)).collect()
    })
    .await
    .unwrap_or_default()
}

/// Terminate processes left in the group led by `leader` once the leader
/// itself has exited. Returns whether anything was still there.
pub async fn sweep_group(leader: u32, grace: Duration) -> bool {
    let platform = platform::current();
    match platform.signal_group(leader, false) {
        Ok(true) => {}
        Ok(false) => return false,
        Err(e) => {
            debug!("cannot signal process group {leader}: {e}");
            return false;
        }
    }
    info!("terminating processes left behind by pid {leader}");
    let deadline = time::Instant::now() + grace;
    while time::Instant::now() < deadline {
        if !platform.group_alive(leader) {
            return true;
        }
        time::sleep(Duration::from_millis(50)).await;
    }
    warn!("processes left behind by pid {leader} outlived {grace:?}, killing them");
    if let Err(e) = platform.signal_group(leader, true) {
        debug!("cannot kill process group {leader}: {e}");
    }
    true
}

/// Stop the process tree rooted at `handle`: graceful signal to children,
/// then the root, then a forceful kill of whatever outlives `grace`.
pub async fn stop(handle: &ProcessHandle, grace: Duration) -> StopOutcome {
    if handle.has_exited() {
        debug!("pid {} already exited", handle.pid);
        sweep_group(handle.pid, grace).await;
        return StopOutcome::AlreadyExited;
    }
    let pid = handle.pid;
    let descendants = descendants_of(pid).await;
    debug!("stopping pid {pid} with {} descendants", descendants.len());
    terminate(pid, descendants.clone(), false).await;

    if time::timeout(grace, handle.wait()).await.is_ok() {
        // children that ignored SIGTERM are reparented once the root is gone
        let mut remaining = descendants;
        for _ in 0..10 {
            remaining = survivors(&remaining).await;
            if remaining.is_empty() {
                sweep_group(pid, grace).await;
                return StopOutcome::Graceful;
            }
            time::sleep(Duration::from_millis(50)).await;
        }
        warn!("killing {} leftover children of pid {pid}", remaining.len());
        for child in remaining {
            terminate(child, vec![], true).await;
        }
        sweep_group(pid, grace).await;
        return StopOutcome::Graceful;
    }

    warn!("pid {pid} did not exit within {grace:?}, killing process tree");
    let mut all = descendants;
    for child in descendants_of(pid).await {
        if !all.contains(&child) {
            all.insert(0, child);
        }
    }
    let all = survivors(&all).await;
    terminate(pid, all, true).await;
    if let Err(e) = platform::current().signal_group(pid, true) {
        debug!("cannot kill process group {pid}: {e}");
    }
    if time::timeout(Duration::from_secs(2), handle.wait()).await.is_err() {
        error!("pid {pid} survived a forceful kill");
    }
    StopOutcome::Forced
}

/// Stop every handle concurrently.
pub async fn stop_all(handles: Vec<ProcessHandle>, grace: Duration) -> Vec<(u32, StopOutcome)> {
    let mut set = JoinSet::new();
    for handle in handles {
        set.spawn(async move {
            let outcome = stop(&handle, grace).await;
            (handle.pid, outcome)
        });
    }
    let mut outcomes = vec![];
    while let Some(result) = set.join_next().await {
        match result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!("stop task failed: {e}"),
        }
    }
    outcomes
}
