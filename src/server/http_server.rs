use super::service::{serve_request, Handler, SharedHandler};
use super::sink::DEFAULT_HIGH_WATER_MARK;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Address family of a bound listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressFamily {
    #[serde(rename = "IPv4")]
    IPv4,
    #[serde(rename = "IPv6")]
    IPv6,
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::IPv4 => write!(f, "IPv4"),
            AddressFamily::IPv6 => write!(f, "IPv6"),
        }
    }
}

/// Where a server is listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub port: u16,
    pub family: AddressFamily,
}

impl From<SocketAddr> for AddressInfo {
    fn from(addr: SocketAddr) -> Self {
        Self {
            address: addr.ip().to_string(),
            port: addr.port(),
            family: if addr.is_ipv4() {
                AddressFamily::IPv4
            } else {
                AddressFamily::IPv6
            },
        }
    }
}

/// HTTP/1.1 server bridging every request to a [`Handler`].
pub struct HttpServer {
    handler: SharedHandler,
    high_water_mark: usize,
}

/// Handle to a running [`HttpServer`].
///
/// Dropping the handle without calling [`ServerHandle::close`] stops the
/// accept loop but does not wait for open connections.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl HttpServer {
    pub fn new(handler: impl Handler) -> Self {
        Self::from_shared(Arc::new(handler))
    }

    pub fn from_shared(handler: SharedHandler) -> Self {
        Self {
            handler,
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
        }
    }

    /// Buffered response bytes at which streamed writes start waiting.
    pub fn with_high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    /// Bind `addr` and start accepting connections.
    ///
    /// Returns once the listener is bound, so the handle's address is usable
    /// right away. Port `0` picks an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be resolved or bound.
    pub async fn start<A: ToSocketAddrs>(self, addr: A) -> io::Result<ServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(accept_loop(
            listener,
            self.handler,
            self.high_water_mark,
            shutdown_rx,
        ));

        info!(addr = %local_addr, "HTTP server listening");
        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn address_info(&self) -> AddressInfo {
        AddressInfo::from(self.local_addr)
    }

    /// Stop accepting, then wait for in-flight connections to finish.
    ///
    /// Idle keep-alive connections are closed right away.
    pub async fn close(self) {
        if self.shutdown.send(()).is_err() {
            debug!(addr = %self.local_addr, "Accept loop already stopped");
        }
        if let Err(err) = self.task.await {
            warn!(addr = %self.local_addr, error = %err, "Accept loop ended abnormally");
        }
        info!(addr = %self.local_addr, "HTTP server closed");
    }
}

/// Close `server` if there is one.
pub async fn close_server(server: Option<ServerHandle>) {
    if let Some(server) = server {
        server.close().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: SharedHandler,
    high_water_mark: usize,
    mut shutdown: oneshot::Receiver<()>,
) {
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "Failed to accept connection");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };

                let handler = Arc::clone(&handler);
                let service = service_fn(move |req: http::Request<Incoming>| {
                    serve_request(Arc::clone(&handler), req, high_water_mark)
                });
                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                let conn = graceful.watch(conn);

                tokio::spawn(async move {
                    if let Err(err) = conn.await {
                        debug!(peer = %peer, error = %err, "Connection ended with error");
                    }
                });
            }
        }
    }

    drop(listener);
    graceful.shutdown().await;
}
