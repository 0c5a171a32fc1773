use super::error::{is_premature_close, SinkError};
use super::sink::ResponseSink;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Terminate `sink` after a failure while producing its response.
///
/// A client that went away is only logged. For anything else a plain-text 500
/// head is sent if no head went out yet, the error message is written as the
/// last chunk and the sink is destroyed with the error. Every step is a no-op
/// when the sink was already terminated.
pub fn handle_response_error(err: &anyhow::Error, sink: &ResponseSink) {
    if is_premature_close(err) {
        info!(error = %err, "The client aborted the request");
        return;
    }

    error!(
        error = %format!("{:#}", err),
        headers_sent = sink.headers_sent(),
        "Failed to produce response"
    );

    if !sink.headers_sent() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        if let Err(head_err) = sink.write_head(500, &headers) {
            warn!(error = %head_err, "Could not send error response head");
        }
    }

    sink.end(Some(Bytes::from(format!("Error: {}", err))));
    sink.destroy(Some(SinkError::from_error(err)));
}
