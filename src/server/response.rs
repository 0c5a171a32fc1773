use super::error::StreamError;
use super::headers::DEFAULT_CONTENT_TYPE;
use super::stream::BodyStream;
use bytes::Bytes;
use serde::Serialize;

/// Payload of a [`Response`].
#[derive(Debug)]
pub enum ResponseBody {
    /// No body at all
    Empty,
    /// Body known up front
    Full(Bytes),
    /// Body produced incrementally
    Stream(BodyStream),
}

impl ResponseBody {
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }

    /// Materialize the body in memory.
    pub async fn into_bytes(self) -> Result<Bytes, StreamError> {
        match self {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => stream.reader()?.collect().await,
        }
    }

    /// View the body as a chunk stream.
    pub fn into_stream(self) -> BodyStream {
        match self {
            ResponseBody::Empty => BodyStream::from_chunks(Vec::<Bytes>::new()),
            ResponseBody::Full(bytes) => BodyStream::from_chunks([bytes]),
            ResponseBody::Stream(stream) => stream,
        }
    }
}

/// Value returned by a handler for one request.
#[derive(Debug)]
pub struct Response {
    pub status: u16,
    /// Headers in insertion order; names keep their casing
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl Default for Response {
    fn default() -> Self {
        Self::new(200)
    }
}

impl Response {
    /// Empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::new(200)
            .with_header("content-type", DEFAULT_CONTENT_TYPE)
            .with_body(body.into())
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(200)
            .with_header("content-type", "application/json")
            .with_body(body))
    }

    /// Chunked response fed from `stream`.
    ///
    /// The `transfer-encoding: chunked` header is what routes the response
    /// through the streaming writer instead of being buffered.
    pub fn stream(stream: BodyStream) -> Self {
        Self {
            status: 200,
            headers: vec![("transfer-encoding".to_string(), "chunked".to_string())],
            body: ResponseBody::Stream(stream),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Append a header. Repeated names are kept, the last one wins on the wire.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = ResponseBody::Full(body.into());
        self
    }

    /// Replace every header named `name` (case-insensitive) with a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// Case-insensitive header lookup; the last matching entry wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the response goes out chunked through the streaming writer.
    pub fn is_streamed(&self) -> bool {
        self.header("transfer-encoding").is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_response_defaults() {
        let res = Response::text("hello");
        assert_eq!(res.status, 200);
        assert_eq!(res.header("Content-Type"), Some(DEFAULT_CONTENT_TYPE));
        assert!(!res.is_streamed());
        assert!(matches!(res.body, ResponseBody::Full(ref b) if b.as_ref() == b"hello"));
    }

    #[test]
    fn test_stream_response_is_chunked() {
        let res = Response::stream(BodyStream::from_chunks(vec!["a"])).with_status(201);
        assert!(res.is_streamed());
        assert_eq!(res.status, 201);
        assert_eq!(res.header("Transfer-Encoding"), Some("chunked"));
    }

    #[test]
    fn test_set_header_replaces_all_casings() {
        let mut res = Response::new(204)
            .with_header("Content-Length", "1")
            .with_header("content-length", "2");
        res.set_header("content-length", "0");
        assert_eq!(res.headers.len(), 1);
        assert_eq!(res.header("CONTENT-LENGTH"), Some("0"));
    }

    #[tokio::test]
    async fn test_json_body_materializes() {
        let res = Response::json(&json!({"ok": true})).unwrap();
        assert_eq!(res.header("content-type"), Some("application/json"));
        let bytes = res.body.into_bytes().await.unwrap();
        assert_eq!(bytes, Bytes::from_static(br#"{"ok":true}"#));
    }

    #[tokio::test]
    async fn test_stream_body_materializes() {
        let body = ResponseBody::Stream(BodyStream::from_chunks(vec!["a", "b"]));
        assert_eq!(body.into_bytes().await.unwrap(), Bytes::from_static(b"ab"));
        assert!(ResponseBody::Empty.into_bytes().await.unwrap().is_empty());
    }
}
