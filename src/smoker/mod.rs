//! # Smoker: mock/record HTTP server
//!
//! A [`Smoker`] listens on a port and fingerprints every request by method
//! and path (see [`Fingerprint`]). For each fingerprint it keeps the most
//! recent request as a [`Record`]. When a [`Mock`] is registered for the
//! fingerprint, the request is also appended to the history and answered with
//! the mock's response. Everything else gets an empty `200`.
//!
//! ```no_run
//! use smoker::smoker::{Mock, MockMethod, MockResponse, Smoker};
//!
//! # async fn run() -> Result<(), smoker::smoker::SmokerError> {
//! let mut smoker = Smoker::new(0);
//! smoker.start().await?;
//!
//! let id = smoker.add_mock(
//!     Mock::new(MockMethod::Get, "/health")
//!         .with_response(MockResponse::default().with_body("ok")),
//! );
//!
//! // ... point the system under test at smoker.get_address_info() ...
//!
//! assert!(smoker.get_history(Some(&id)).len() <= 1);
//! smoker.destroy().await;
//! # Ok(())
//! # }
//! ```

mod mock;
mod record;

pub use mock::{build_response, load_mock_file, Mock, MockMethod, MockRequest, MockResponse};
pub use record::{HistoryEntry, Record, RecordedRequest};

use crate::ids::Fingerprint;
use crate::runtime_config::SmokerConfig;
use crate::server::{close_server, AddressInfo, Context, HttpServer, Response, ServerHandle};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Source of request timestamps in milliseconds since the UNIX epoch.
pub type Clock = fn() -> u64;

/// Wall-clock milliseconds since the UNIX epoch.
pub fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Errors raised by [`Smoker`].
#[derive(Debug)]
pub enum SmokerError {
    /// `start` was called while already listening
    AlreadyStarted,
    /// The listening socket could not be bound
    Bind { addr: String, source: io::Error },
    /// A mock file could not be read or parsed
    MockFile { path: PathBuf, reason: String },
}

impl fmt::Display for SmokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmokerError::AlreadyStarted => write!(f, "smoker server is already started"),
            SmokerError::Bind { addr, source } => {
                write!(f, "failed to bind smoker server on {}: {}", addr, source)
            }
            SmokerError::MockFile { path, reason } => {
                write!(f, "invalid mock file {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for SmokerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SmokerError::Bind { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// State shared between a [`Smoker`] and its request handler.
struct SmokerState {
    mocks: RwLock<HashMap<Fingerprint, Mock>>,
    /// Insertion ordered; one entry per fingerprint
    records: Mutex<Vec<Record>>,
    history: Mutex<Vec<HistoryEntry>>,
    clock: Clock,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SmokerState {
    fn new(clock: Clock) -> Self {
        Self {
            mocks: RwLock::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            clock,
        }
    }

    fn mock(&self, id: &Fingerprint) -> Option<Mock> {
        self.mocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn insert_mock(&self, mock: Mock) -> Fingerprint {
        let id = mock.fingerprint();
        self.mocks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), mock);
        id
    }

    fn upsert_record(&self, id: Fingerprint, request: RecordedRequest) {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|record| record.id == id) {
            Some(existing) => existing.request = request,
            None => records.push(Record { id, request }),
        }
    }

    async fn dispatch(&self, ctx: Context) -> Response {
        let id = Fingerprint::compute(ctx.method(), ctx.path());
        let request = RecordedRequest::capture(&ctx, (self.clock)()).await;
        let mock = self.mock(&id);

        if let Some(mock) = &mock {
            lock(&self.history).push(HistoryEntry {
                mock_id: id.clone(),
                request: request.clone(),
                response: mock.response.clone(),
            });
        }

        debug!(
            fingerprint = %id,
            method = %request.method,
            path = %request.path,
            mocked = mock.is_some(),
            "Request recorded"
        );
        self.upsert_record(id, request);

        build_response(mock.as_ref())
    }

    fn clear(&self) {
        lock(&self.records).clear();
        lock(&self.history).clear();
    }
}

/// Mock/record HTTP server.
pub struct Smoker {
    config: SmokerConfig,
    state: Arc<SmokerState>,
    server: Option<ServerHandle>,
    address: Option<AddressInfo>,
}

impl Smoker {
    /// Smoker on `port` (`0` for an ephemeral port), all interfaces.
    pub fn new(port: u16) -> Self {
        Self::with_config(SmokerConfig::default().with_port(port))
    }

    pub fn with_config(config: SmokerConfig) -> Self {
        Self {
            config,
            state: Arc::new(SmokerState::new(system_clock)),
            server: None,
            address: None,
        }
    }

    /// Replace the timestamp source. Registered mocks and recorded requests
    /// are kept.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        let state = SmokerState::new(clock);
        {
            let mut mocks = state.mocks.write().unwrap_or_else(PoisonError::into_inner);
            *mocks = self
                .state
                .mocks
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
        }
        *lock(&state.records) = lock(&self.state.records).clone();
        *lock(&state.history) = lock(&self.state.history).clone();
        self.state = Arc::new(state);
        self
    }

    pub fn config(&self) -> &SmokerConfig {
        &self.config
    }

    pub fn is_listening(&self) -> bool {
        self.server.is_some()
    }

    /// Bind and start serving.
    ///
    /// # Errors
    ///
    /// [`SmokerError::AlreadyStarted`] when already listening, or
    /// [`SmokerError::Bind`] if the address cannot be bound.
    pub async fn start(&mut self) -> Result<&mut Self, SmokerError> {
        if self.server.is_some() {
            return Err(SmokerError::AlreadyStarted);
        }

        let addr = self.config.bind_addr();
        let state = Arc::clone(&self.state);
        let handler = move |ctx: Context| {
            let state = Arc::clone(&state);
            async move { Ok::<_, anyhow::Error>(state.dispatch(ctx).await) }
        };

        let server = HttpServer::new(handler)
            .with_high_water_mark(self.config.high_water_mark)
            .start(addr.clone())
            .await
            .map_err(|source| SmokerError::Bind { addr, source })?;

        let address = server.address_info();
        info!(
            address = %address.address,
            port = address.port,
            family = %address.family,
            "Smoker started"
        );
        self.address = Some(address);
        self.server = Some(server);
        Ok(self)
    }

    /// Clear records and history, then shut the server down gracefully.
    ///
    /// Mocks survive. Does nothing to the server when it is not running.
    pub async fn destroy(&mut self) {
        self.clear_history();
        let was_listening = self.server.is_some();
        close_server(self.server.take()).await;
        self.address = None;
        if was_listening {
            info!("Smoker destroyed");
        }
    }

    /// Register `mock`, replacing any mock with the same method and path.
    pub fn add_mock(&self, mock: Mock) -> Fingerprint {
        let id = self.state.insert_mock(mock);
        debug!(fingerprint = %id, "Mock registered");
        id
    }

    pub fn add_mocks<I>(&self, mocks: I) -> Vec<Fingerprint>
    where
        I: IntoIterator<Item = Mock>,
    {
        mocks.into_iter().map(|mock| self.add_mock(mock)).collect()
    }

    /// Register every mock in a JSON or YAML file.
    pub fn load_mocks(&self, path: impl AsRef<Path>) -> Result<Vec<Fingerprint>, SmokerError> {
        let path = path.as_ref();
        let mocks = load_mock_file(path)?;
        info!(path = %path.display(), count = mocks.len(), "Mocks loaded");
        Ok(self.add_mocks(mocks))
    }

    pub fn mock_count(&self) -> usize {
        self.state
            .mocks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Latest request per fingerprint, in order of first appearance.
    pub fn get_records(&self) -> Vec<Record> {
        lock(&self.state.records).clone()
    }

    /// Requests that matched a mock, oldest first, optionally for one mock.
    pub fn get_history(&self, mock_id: Option<&Fingerprint>) -> Vec<HistoryEntry> {
        let history = lock(&self.state.history);
        match mock_id {
            Some(id) => history
                .iter()
                .filter(|entry| &entry.mock_id == id)
                .cloned()
                .collect(),
            None => history.clone(),
        }
    }

    /// Forget records and history. Mocks stay registered.
    pub fn clear_history(&self) {
        self.state.clear();
    }

    pub fn get_address_info(&self) -> Option<AddressInfo> {
        self.address.clone()
    }

    /// `http://127.0.0.1:<port>` style URL for reaching the server locally.
    pub fn base_url(&self) -> Option<String> {
        self.address.as_ref().map(|address| {
            let host = match address.address.as_str() {
                "0.0.0.0" => "127.0.0.1".to_string(),
                "::" => "[::1]".to_string(),
                other if other.contains(':') => format!("[{}]", other),
                other => other.to_string(),
            };
            format!("http://{}:{}", host, address.port)
        })
    }
}

impl fmt::Debug for Smoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Smoker")
            .field("config", &self.config)
            .field("address", &self.address)
            .field("mocks", &self.mock_count())
            .finish_non_exhaustive()
    }
}
