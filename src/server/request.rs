use super::error::{BodyError, BoxError};
use super::headers::parse_headers;
use bytes::Bytes;
use http::Method;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use serde_json::Value;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

/// Byte source of an incoming request body.
pub struct BodySource(UnsyncBoxBody<Bytes, BoxError>);

impl BodySource {
    pub fn new<B>(body: B) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(Into::into).boxed_unsync())
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Full::new(bytes.into()))
    }

    /// Drain the whole source into memory.
    pub async fn read_to_bytes(self) -> Result<Bytes, BodyError> {
        self.0
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(BodyError)
    }
}

impl fmt::Debug for BodySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodySource").finish_non_exhaustive()
    }
}

/// Transport-level view of an inbound request, before normalization.
#[derive(Debug)]
pub struct IncomingMessage {
    /// HTTP method as sent on the request line
    pub method: String,
    /// Request target: path plus optional `?query`
    pub url: String,
    /// Flat `name, value, name, value, ...` header sequence
    pub raw_headers: Vec<String>,
    /// Body byte source; absent for methods that carry no payload
    pub body: Option<BodySource>,
}

impl IncomingMessage {
    /// Capture an `http::Request` coming off a connection.
    ///
    /// A body source is attached only for methods that conventionally carry a
    /// payload, so GET and HEAD never touch the connection's body stream.
    pub fn from_request<B>(req: http::Request<B>) -> Self
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let raw_headers = parts
            .headers
            .iter()
            .flat_map(|(name, value)| {
                [
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                ]
            })
            .collect();

        let body = carries_body(&parts.method).then(|| BodySource::new(body));

        Self {
            method: parts.method.as_str().to_string(),
            url,
            raw_headers,
            body,
        }
    }
}

fn carries_body(method: &Method) -> bool {
    !(method == Method::GET || method == Method::HEAD)
}

struct LazyBody {
    source: Mutex<Option<BodySource>>,
    value: OnceCell<Value>,
}

/// Immutable, normalized view of an inbound request handed to handlers.
///
/// Cloning is cheap; clones share the same lazily read body.
#[derive(Clone)]
pub struct Context {
    method: String,
    headers: BTreeMap<String, String>,
    path: String,
    query: BTreeMap<String, String>,
    body: Arc<LazyBody>,
}

impl Context {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Headers keyed by lower-cased name.
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Pathname of the request target, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Read and parse the request body.
    ///
    /// The first call drains the byte source; later calls return the same
    /// value. Valid JSON comes back parsed, anything else as `Value::String`
    /// holding the raw text. A request without a body yields an empty string.
    /// A failed drain is reported once; the source is gone afterwards and the
    /// body then reads as empty.
    pub async fn try_body(&self) -> Result<Value, BodyError> {
        self.body
            .value
            .get_or_try_init(|| async {
                let source = self.body.source.lock().await.take();
                let text = match source {
                    Some(source) => {
                        let bytes = source.read_to_bytes().await?;
                        String::from_utf8_lossy(&bytes).into_owned()
                    }
                    None => String::new(),
                };
                Ok::<_, BodyError>(safe_json_parse(&text))
            })
            .await
            .cloned()
    }

    /// Like [`Context::try_body`] but never fails: a transport error while
    /// draining degrades to an empty string.
    pub async fn body(&self) -> Value {
        match self.try_body().await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    method = %self.method,
                    path = %self.path,
                    error = %err,
                    "Request body could not be drained"
                );
                Value::String(String::new())
            }
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("path", &self.path)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

/// Parse `data` as JSON, falling back to the original text.
pub fn safe_json_parse(data: &str) -> Value {
    serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string()))
}

/// Parse the query component of a request target.
///
/// Names and values are percent-decoded; on duplicate names the last value wins.
pub fn parse_query_params(query: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Build a [`Context`] out of an incoming message.
pub fn build_context(message: IncomingMessage) -> Context {
    let IncomingMessage {
        method,
        url,
        raw_headers,
        body,
    } = message;

    let mut headers = BTreeMap::new();
    for (name, value) in parse_headers(&raw_headers) {
        match headers.entry(name.to_ascii_lowercase()) {
            Entry::Occupied(mut existing) => {
                let combined: &mut String = existing.get_mut();
                combined.push_str(", ");
                combined.push_str(&value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }

    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, parse_query_params(query)),
        None => (url.as_str(), BTreeMap::new()),
    };
    let path = if path.is_empty() { "/" } else { path }.to_string();

    debug!(
        method = %method,
        path = %path,
        header_count = headers.len(),
        param_count = query.len(),
        has_body = body.is_some(),
        "Context built"
    );

    Context {
        method,
        headers,
        path,
        query,
        body: Arc::new(LazyBody {
            source: Mutex::new(body),
            value: OnceCell::new(),
        }),
    }
}
