#![allow(dead_code)]

pub mod logging {
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Route `tracing` output through the test harness; `RUST_LOG` selects levels.
    pub fn init() {
        INIT.call_once(|| {
            let filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        });
    }
}

pub mod test_server {
    use smoker::server::{Handler, HttpServer, ServerHandle};

    /// Start `handler` on an ephemeral loopback port.
    pub async fn start(handler: impl Handler) -> ServerHandle {
        super::logging::init();
        HttpServer::new(handler)
            .start("127.0.0.1:0")
            .await
            .expect("bind test server")
    }

    /// Like [`start`] with a custom backpressure threshold.
    pub async fn start_with_high_water_mark(
        handler: impl Handler,
        high_water_mark: usize,
    ) -> ServerHandle {
        super::logging::init();
        HttpServer::new(handler)
            .with_high_water_mark(high_water_mark)
            .start("127.0.0.1:0")
            .await
            .expect("bind test server")
    }

    pub fn url(server: &ServerHandle, path: &str) -> String {
        format!("http://{}{}", server.local_addr(), path)
    }
}

pub mod http {
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    pub fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("build reqwest client")
    }

    /// Plain GET request text for raw socket tests.
    pub fn raw_get(path: &str) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
            path
        )
    }

    /// Send `request` and read until the server closes the connection.
    pub async fn send_raw(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Send `request`, optionally read until `marker` shows up, then drop the socket.
    pub async fn send_and_abort(addr: SocketAddr, request: &str, marker: Option<&str>) {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(request.as_bytes())
            .await
            .expect("write request");

        if let Some(marker) = marker {
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&seen).contains(marker) {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => seen.extend_from_slice(&buf[..n]),
                }
            }
        }
        drop(stream);
    }
}

pub mod mock_files {
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Write `content` to a temp file with the given extension.
    pub fn write(content: &str, extension: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .prefix("smoker_mocks_")
            .suffix(&format!(".{}", extension))
            .tempfile()
            .expect("create temp mock file");
        file.write_all(content.as_bytes())
            .expect("write temp mock file");
        file
    }
}
