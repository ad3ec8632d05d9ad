//! TCP port availability checks.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time;

/// Binds a throwaway listener to `0.0.0.0:port`. The socket is released and
/// `settle` elapses before the port is reported free, so the OS has fully
/// torn it down by the time a child tries to bind.
pub async fn is_port_free(port: u16, settle: Duration) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    match TcpListener::bind(addr).await {
        Ok(listener) => {
            drop(listener);
            if !settle.is_zero() {
                time::sleep(settle).await;
            }
            true
        }
        Err(e) => {
            trace!("port {port} is not free: {e}");
            false
        }
    }
}

/// Scans `start, start + 1, …` and returns the first free port. Never looks
/// past 65535.
pub async fn find_free_port(start: u16, max_attempts: u16, settle: Duration) -> Option<u16> {
    for port in candidate_ports(start, max_attempts) {
        if is_port_free(port, settle).await {
            return Some(port);
        }
    }
    debug!("no free port in {max_attempts} attempts starting at {start}");
    None
}

fn candidate_ports(start: u16, max_attempts: u16) -> impl Iterator<Item = u16> {
    (start..=u16::MAX).take(max_attempts as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold_ephemeral() -> (std::net::TcpListener, u16) {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_candidates_stop_at_u16_max() {
        let ports = candidate_ports(65534, 10).collect::<Vec<_>>();
        assert_eq!(ports, vec![65534, 65535]);
        assert_eq!(candidate_ports(3000, 3).collect::<Vec<_>>(), vec![3000, 3001, 3002]);
        assert_eq!(candidate_ports(3000, 0).count(), 0);
    }

    #[tokio::test]
    async fn test_occupied_port_is_not_free() {
        let (_held, port) = hold_ephemeral();
        assert!(!is_port_free(port, Duration::ZERO).await);
    }

    #[tokio::test]
    async fn test_released_port_is_free() {
        let (held, port) = hold_ephemeral();
        drop(held);
        assert!(is_port_free(port, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn test_find_free_port_skips_occupied() {
        let (held, port) = hold_ephemeral();
        let found = find_free_port(port, 50, Duration::ZERO).await;
        assert!(matches!(found, Some(p) if p > port));
        drop(held);
    }

    #[tokio::test]
    async fn test_scan_is_deterministic() {
        let (held, port) = hold_ephemeral();
        let a = find_free_port(port, 50, Duration::ZERO).await;
        let b = find_free_port(port, 50, Duration::ZERO).await;
        assert_eq!(a, b);
        drop(held);
    }

    #[tokio::test]
    async fn test_exhausted_scan_is_none() {
        let (_held, port) = hold_ephemeral();
        assert_eq!(find_free_port(port, 1, Duration::ZERO).await, None);
    }
}
