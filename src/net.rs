use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout as with_timeout;
use tracing::debug;

/// Default wait before a reachability probe gives up.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Whether a TCP connection to `host:port` can be opened within `timeout`.
///
/// Resolution failures, refused connections and timeouts all yield `false`.
/// A successful connection is closed right away.
pub async fn is_port_reachable(port: u16, host: &str, timeout: Duration) -> bool {
    match with_timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            drop(stream);
            true
        }
        Ok(Err(err)) => {
            debug!(host, port, error = %err, "Port not reachable");
            false
        }
        Err(_) => {
            debug!(host, port, timeout_ms = timeout.as_millis() as u64, "Port probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_port_reachable(port, "127.0.0.1", DEFAULT_PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!is_port_reachable(port, "127.0.0.1", DEFAULT_PROBE_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_unreachable() {
        assert!(!is_port_reachable(80, "host.invalid", Duration::from_millis(200)).await);
    }
}
