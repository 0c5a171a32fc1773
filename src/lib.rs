//! # smoker
//!
//! **smoker** is an HTTP request/response bridge over hyper, plus a deterministic
//! mock/record server built on it for integration tests.
//!
//! ## Overview
//!
//! The bridge adapts hyper's connection-oriented HTTP/1.1 transport into a
//! value-oriented model: a handler receives an immutable [`Context`] and returns
//! a [`Response`]. Buffered bodies are sent with a `content-length`. Streamed
//! bodies go through a backpressure-aware writer that stops pulling when the
//! connection falls behind and cancels the producer when the client goes away.
//! Failures turn into a `500` unless the client is already gone. Every response
//! is terminated exactly once.
//!
//! The [`Smoker`] server sits on top: it fingerprints each request by method and
//! path, keeps the latest request per fingerprint, and answers registered mocks
//! with canned responses while appending them to a history log.
//!
//! ## Architecture
//!
//! - **[`server`]** - the bridge: header normalization, context building,
//!   response sink, streaming writer, error responder, server lifecycle
//! - **[`smoker`]** - the mock/record engine
//! - **[`ids`]** - the [`Fingerprint`] request identifier
//! - **[`runtime_config`]** - environment based server configuration
//! - **[`logging`]** - `tracing` subscriber setup
//! - **[`net`]** - TCP reachability probe
//! - **[`cli`]** - the `smoker` command line
//!
//! ### Request Handling Flow
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Client
//!     participant Hyper as hyper connection
//!     participant Service as serve_request
//!     participant Bridge as respond (task)
//!     participant Handler
//!     participant Sink as ResponseSink
//!
//!     Client->>Hyper: HTTP request
//!     Hyper->>Service: http::Request
//!     Service->>Bridge: spawn with IncomingMessage
//!     Bridge->>Bridge: build_context
//!     Bridge->>Handler: call(Context)
//!     alt handler fails or panics
//!         Bridge->>Sink: 500 + "Error: ..." then destroy
//!     else transfer-encoding set
//!         Bridge->>Sink: write_head, then write_from_stream
//!     else buffered
//!         Bridge->>Sink: write_head (content-length), end(body)
//!     end
//!     Sink-->>Service: head
//!     Service-->>Hyper: http::Response<SinkBody>
//!     Hyper-->>Client: body frames as the sink fills
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use smoker::server::{close_server, Context, HttpServer, Response};
//!
//! # async fn run() -> std::io::Result<()> {
//! let server = HttpServer::new(|ctx: Context| async move {
//!     Ok::<_, anyhow::Error>(Response::text(format!("you asked for {}", ctx.path())))
//! })
//! .start("127.0.0.1:0")
//! .await?;
//!
//! println!("listening on {}", server.local_addr());
//! close_server(Some(server)).await;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod ids;
pub mod logging;
pub mod net;
pub mod runtime_config;
pub mod server;
pub mod smoker;

pub use ids::{Fingerprint, FingerprintError};
pub use runtime_config::SmokerConfig;
pub use server::{Context, Handler, HttpServer, Response, ServerHandle};
pub use smoker::{Mock, MockMethod, MockResponse, Smoker, SmokerError};
