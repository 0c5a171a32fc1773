use std::fmt;
use std::io;

/// Boxed error used for body chunks flowing through the bridge.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure reported by the outgoing response sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The peer went away before the response was complete.
    PrematureClose,
    /// `write_head` was called after the head had already been sent.
    HeadersAlreadySent,
    /// A chunk was written after `end`.
    WriteAfterEnd,
    /// The status line or a header could not be encoded.
    InvalidHead {
        /// What was rejected
        reason: String,
    },
    /// The sink was destroyed, optionally carrying the triggering message.
    Destroyed {
        /// Message of the error that destroyed the sink
        message: String,
    },
}

impl SinkError {
    pub fn destroyed(message: impl Into<String>) -> Self {
        SinkError::Destroyed {
            message: message.into(),
        }
    }

    /// Build a sink error out of an arbitrary failure, keeping its message.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<SinkError>() {
            Some(sink_err) => sink_err.clone(),
            None => SinkError::destroyed(err.to_string()),
        }
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::PrematureClose => write!(f, "premature close"),
            SinkError::HeadersAlreadySent => {
                write!(f, "cannot write response head: headers already sent")
            }
            SinkError::WriteAfterEnd => write!(f, "write after end"),
            SinkError::InvalidHead { reason } => write!(f, "invalid response head: {}", reason),
            SinkError::Destroyed { message } => write!(f, "response destroyed: {}", message),
        }
    }
}

impl std::error::Error for SinkError {}

/// Failure raised while consuming a response body stream.
#[derive(Debug)]
pub enum StreamError {
    /// The stream is already locked to another reader.
    AlreadyConsumed,
    /// The producer of the stream failed.
    Source(BoxError),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::AlreadyConsumed => write!(f, "body stream is already locked"),
            StreamError::Source(err) => write!(f, "body stream failed: {}", err),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::AlreadyConsumed => None,
            StreamError::Source(err) => Some(err.as_ref()),
        }
    }
}

/// Failure raised while draining an incoming request body.
#[derive(Debug)]
pub struct BodyError(pub BoxError);

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to read request body: {}", self.0)
    }
}

impl std::error::Error for BodyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Whether a failure means the client disconnected before the response was done.
///
/// Walks the whole error chain looking for [`SinkError::PrematureClose`] or an
/// I/O error of a disconnect kind.
pub fn is_premature_close(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(sink_err) = cause.downcast_ref::<SinkError>() {
            return *sink_err == SinkError::PrematureClose;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return matches!(
                io_err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
            );
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_premature_close_detected_through_context() {
        let err = Err::<(), _>(SinkError::PrematureClose)
            .context("streaming response")
            .unwrap_err();
        assert!(is_premature_close(&err));
    }

    #[test]
    fn test_disconnect_io_kinds_are_premature_close() {
        let err = anyhow::Error::new(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(is_premature_close(&err));

        let err = anyhow::Error::new(io::Error::from(io::ErrorKind::NotFound));
        assert!(!is_premature_close(&err));
    }

    #[test]
    fn test_plain_errors_are_not_premature_close() {
        assert!(!is_premature_close(&anyhow::anyhow!("fail")));
        assert!(!is_premature_close(&anyhow::Error::new(SinkError::WriteAfterEnd)));
    }

    #[test]
    fn test_sink_error_from_error_keeps_message() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(SinkError::from_error(&err), SinkError::destroyed("boom"));

        let err = anyhow::Error::new(SinkError::PrematureClose);
        assert_eq!(SinkError::from_error(&err), SinkError::PrematureClose);
    }
}
