//! Dev servers listening on this machine that tafil did not start.
//!
//! Everything in here is best-effort: a missing tool, a permission error or
//! a slow probe produces an empty answer, never an error.

use crate::platform::{self, ListeningSocket};
use crate::procs::PROCS;
use crate::settings::Settings;
use itertools::Itertools;
use serde::Serialize;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time;

const NODE_LIKE: &[&str] = &["node", "bun", "deno"];

/// A process found listening on a port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortOccupant {
    pub pid: u32,
    pub port: u16,
    pub command: String,
    pub working_directory: Option<PathBuf>,
}

pub fn is_node_like(process_name: &str) -> bool {
    let name = process_name.to_lowercase();
    NODE_LIKE.iter().any(|n| name.contains(n))
}

fn select_external(
    sockets: Vec<ListeningSocket>,
    range: &RangeInclusive<u16>,
    exclude: &[u32],
) -> Vec<ListeningSocket> {
    sockets
        .into_iter()
        .filter(|s| range.contains(&s.port))
        .filter(|s| is_node_like(&s.process_name))
        .filter(|s| !exclude.contains(&s.pid))
        .unique_by(|s| (s.pid, s.port))
        .sorted_by_key(|s| (s.port, s.pid))
        .collect()
}

fn describe(sockets: Vec<ListeningSocket>) -> Vec<PortOccupant> {
    let pids = sockets.iter().map(|s| s.pid).unique().collect_vec();
    PROCS.refresh_details(&pids);
    sockets
        .into_iter()
        .map(|s| PortOccupant {
            pid: s.pid,
            port: s.port,
            command: PROCS.command_line(s.pid).unwrap_or(s.process_name),
            working_directory: PROCS.cwd(s.pid),
        })
        .collect()
}

async fn run_probe<T, F>(what: &str, timeout: Duration, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> Option<T> + Send + 'static,
{
    match time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!("{what} probe panicked: {e}");
            None
        }
        Err(_) => {
            warn!("{what} probe timed out after {timeout:?}");
            None
        }
    }
}

/// Node-like processes listening inside the dev-server port band, excluding
/// the given (managed) pids.
pub async fn list_external_listeners(exclude: &[u32], settings: &Settings) -> Vec<PortOccupant> {
    let range = settings.external_port_range();
    let exclude = exclude.to_vec();
    run_probe("external listener", settings.probe_timeout(), move || {
        match platform::current().list_listening_sockets() {
            Ok(sockets) => Some(describe(select_external(sockets, &range, &exclude))),
            Err(e) => {
                debug!("could not list listening sockets: {e}");
                None
            }
        }
    })
    .await
    .unwrap_or_default()
}

/// Whoever is listening on `port`, Node-like or not.
pub async fn describe_occupant(port: u16, settings: &Settings) -> Option<PortOccupant> {
    let timeout = settings.probe_timeout();
    run_probe("port occupant", timeout, move || {
        let sockets = match platform::current().list_listening_sockets() {
            Ok(sockets) => sockets,
            Err(e) => {
                debug!("could not list listening sockets: {e}");
                return None;
            }
        };
        let socket = sockets
            .into_iter()
            .filter(|s| s.port == port)
            .min_by_key(|s| s.pid)?;
        describe(vec![socket]).into_iter().next()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(pid: u32, port: u16, name: &str) -> ListeningSocket {
        ListeningSocket {
            pid,
            port,
            process_name: name.to_string(),
        }
    }

    #[test]
    fn test_node_like_names() {
        assert!(is_node_like("node"));
        assert!(is_node_like("Node.exe"));
        assert!(is_node_like("bun"));
        assert!(!is_node_like("postgres"));
        assert!(!is_node_like("python3"));
    }

    #[test]
    fn test_select_external_filters_band_name_and_managed() {
        let sockets = vec![
            socket(10, 5173, "node"),
            socket(10, 5173, "node"),
            socket(11, 5432, "postgres"),
            socket(12, 80, "node"),
            socket(13, 9001, "node"),
            socket(14, 3000, "node"),
            socket(15, 4200, "node"),
        ];
        let selected = select_external(sockets, &(3000..=9000), &[15]);
        assert_eq!(
            selected.iter().map(|s| (s.pid, s.port)).collect_vec(),
            vec![(14, 3000), (10, 5173)]
        );
    }

    #[tokio::test]
    async fn test_describe_free_port_is_none() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert_eq!(describe_occupant(port, &Settings::default()).await, None);
    }

    #[tokio::test]
    async fn test_describe_own_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        // socket enumeration can be unavailable in restricted sandboxes
        if let Some(occupant) = describe_occupant(port, &Settings::default()).await {
            assert_eq!(occupant.pid, std::process::id());
            assert_eq!(occupant.port, port);
            assert!(!occupant.command.is_empty());
        }
    }

    #[tokio::test]
    async fn test_listing_honours_port_band() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut settings = Settings::default();
        settings.ports.external_range_start = port;
        settings.ports.external_range_end = port;
        // the test binary is not node-like, so nothing in the band qualifies
        let found = list_external_listeners(&[], &settings).await;
        assert!(found.is_empty(), "{found:?}");
    }
}
