//! # CLI Module
//!
//! Command-line front end of the `smoker` binary.
//!
//! ## Commands
//!
//! ### `serve`
//!
//! Run a mock/record server until Ctrl-C:
//!
//! ```bash
//! smoker serve --port 9000 --mocks mocks.yaml --history-out history.json
//! ```
//!
//! Options:
//! - `--host <HOST>` - Interface to bind (default: `SMOKER_HOST` or `0.0.0.0`)
//! - `--port <PORT>` - Port to bind, `0` for ephemeral (default: `SMOKER_PORT` or `0`)
//! - `--mocks <FILE>` - JSON or YAML list of mocks to register
//! - `--history-out <FILE>` - Write the matched-mock history here as JSON on shutdown
//!
//! The bound address is printed to stdout as one JSON line once listening.
//!
//! ### `fingerprint`
//!
//! Print the fingerprint a request would be recorded under:
//!
//! ```bash
//! smoker fingerprint --method GET --path /api/testing
//! ```
//!
//! ### `probe`
//!
//! Check whether a TCP port accepts connections. Exits non-zero when it does not:
//!
//! ```bash
//! smoker probe --port 9000 --host localhost --timeout-ms 500
//! ```
//!
//! ## Mock file format
//!
//! ```yaml
//! - request:
//!     method: GET
//!     path: /api/testing
//!   response:
//!     status: 403
//!     headers:
//!       Content-Type: application/json
//!     body: '{"error":"Oops"}'
//! ```

mod commands;


pub use commands::{run_cli, Cli, Commands};
