use super::error::{BoxError, SinkError, StreamError};
use super::sink::{ResponseSink, SinkStatus};
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

type ChunkStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// A response body produced incrementally.
///
/// Only one reader may consume the stream. Clones share the same underlying
/// source, so locking one clone locks them all.
#[derive(Clone)]
pub struct BodyStream {
    inner: Arc<Mutex<Option<ChunkStream>>>,
}

impl BodyStream {
    pub fn new<S, E>(source: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let source: ChunkStream = source.map(|chunk| chunk.map_err(Into::into)).boxed();
        Self {
            inner: Arc::new(Mutex::new(Some(source))),
        }
    }

    /// Stream that yields the given chunks in order.
    pub fn from_chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, BoxError>> =
            chunks.into_iter().map(|chunk| Ok(chunk.into())).collect();
        Self::new(stream::iter(chunks))
    }

    fn slot(&self) -> MutexGuard<'_, Option<ChunkStream>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a reader has already taken the stream.
    pub fn is_locked(&self) -> bool {
        self.slot().is_none()
    }

    /// Lock the stream to a new reader.
    pub fn reader(&self) -> Result<BodyReader, StreamError> {
        self.slot()
            .take()
            .map(|source| BodyReader {
                source: Some(source),
            })
            .ok_or(StreamError::AlreadyConsumed)
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BodyStream")
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exclusive reader of a [`BodyStream`].
pub struct BodyReader {
    source: Option<ChunkStream>,
}

impl BodyReader {
    /// Pull the next chunk. `None` once the stream is exhausted or cancelled.
    pub async fn next(&mut self) -> Option<Result<Bytes, BoxError>> {
        match self.source.as_mut() {
            Some(source) => source.next().await,
            None => None,
        }
    }

    /// Stop consuming and release the underlying producer.
    pub fn cancel(&mut self, reason: &str) {
        if self.source.take().is_some() {
            debug!(reason = %reason, "Body stream cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_none()
    }

    /// Read every remaining chunk into one buffer.
    pub async fn collect(mut self) -> Result<Bytes, StreamError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk.map_err(StreamError::Source)?);
        }
        Ok(buf.freeze())
    }
}

enum Step {
    Terminated(SinkStatus),
    Chunk(Option<Result<Bytes, BoxError>>),
}

/// Pipe `source` into `sink`.
///
/// Locking the source happens before the returned future is polled, so a
/// stream that is already being read fails right away with
/// [`StreamError::AlreadyConsumed`] and nothing is written.
///
/// The returned future writes chunks until the source ends, waiting for the
/// sink to drain whenever a write reports a full buffer. A failing source or
/// sink cancels the source and destroys the sink. A sink closed from the
/// outside cancels the source, and an errored sink is destroyed with that
/// error. The close listener is released on every exit.
pub fn write_from_stream(
    source: &BodyStream,
    sink: &ResponseSink,
) -> Result<impl Future<Output = ()> + Send + 'static, StreamError> {
    let mut reader = source.reader()?;
    let sink = sink.clone();

    Ok(async move {
        if sink.is_destroyed() {
            reader.cancel("response sink already destroyed");
            return;
        }

        let mut subscription = sink.subscribe();
        let mut chunks_written = 0usize;

        loop {
            let step = tokio::select! {
                biased;
                status = subscription.terminated() => Step::Terminated(status),
                chunk = reader.next() => Step::Chunk(chunk),
            };

            match step {
                Step::Terminated(SinkStatus::Errored(err)) => {
                    reader.cancel("response sink errored");
                    sink.destroy(Some(err));
                    break;
                }
                Step::Terminated(status) => {
                    debug!(
                        status = ?status,
                        chunks_written,
                        "Response sink closed while streaming"
                    );
                    reader.cancel("response sink closed");
                    break;
                }
                Step::Chunk(None) => {
                    sink.end(None);
                    debug!(chunks_written, "Response stream finished");
                    break;
                }
                Step::Chunk(Some(Ok(chunk))) => match sink.write(chunk) {
                    Ok(true) => chunks_written += 1,
                    Ok(false) => {
                        chunks_written += 1;
                        sink.drained().await;
                    }
                    Err(err) => {
                        reader.cancel("response sink write failed");
                        sink.destroy(Some(err));
                        break;
                    }
                },
                Step::Chunk(Some(Err(err))) => {
                    reader.cancel("response stream failed");
                    sink.destroy(Some(SinkError::destroyed(err.to_string())));
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sink::DEFAULT_HIGH_WATER_MARK;
    use http_body_util::BodyExt;
    use tokio::sync::mpsc;

    fn channel_stream() -> (mpsc::Sender<Result<Bytes, BoxError>>, BodyStream) {
        let (tx, rx) = mpsc::channel::<Result<Bytes, BoxError>>(4);
        let source = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        (tx, BodyStream::new(source))
    }

    #[tokio::test]
    async fn test_writes_all_chunks_and_ends() {
        let (sink, _head_rx, body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let source = BodyStream::from_chunks(vec!["hello ", "world"]);

        let task = tokio::spawn(write_from_stream(&source, &sink).unwrap());
        let collected = body.collect().await.unwrap().to_bytes();
        task.await.unwrap();

        assert_eq!(collected, Bytes::from_static(b"hello world"));
        assert!(sink.is_ended());
        assert_eq!(sink.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_locked_stream_is_rejected() {
        let (sink, _head_rx, _body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let source = BodyStream::from_chunks(vec!["a"]);
        let _reader = source.clone().reader().unwrap();

        assert!(source.is_locked());
        assert!(matches!(
            write_from_stream(&source, &sink),
            Err(StreamError::AlreadyConsumed)
        ));
        assert!(!sink.headers_sent());
    }

    #[tokio::test]
    async fn test_destroyed_sink_cancels_source() {
        let (sink, _head_rx, _body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let (tx, source) = channel_stream();
        sink.destroy(None);

        write_from_stream(&source, &sink).unwrap().await;

        assert!(tx.is_closed());
        assert!(!sink.headers_sent());
        assert_eq!(sink.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_backpressure_keeps_order() {
        let (sink, _head_rx, mut body) = ResponseSink::channel(1);
        let source = BodyStream::from_chunks(vec!["A", "B"]);
        let task = tokio::spawn(write_from_stream(&source, &sink).unwrap());

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(body.frame().await.is_none());
        task.await.unwrap();

        assert_eq!(first, Bytes::from_static(b"A"));
        assert_eq!(second, Bytes::from_static(b"B"));
        assert!(sink.is_ended());
        assert_eq!(sink.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_external_error_cancels_source() {
        let (sink, _head_rx, mut body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let (tx, source) = channel_stream();
        let task = tokio::spawn(write_from_stream(&source, &sink).unwrap());

        tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, Bytes::from_static(b"first"));

        sink.destroy(Some(SinkError::destroyed("client error")));
        task.await.unwrap();

        assert!(tx.is_closed());
        assert_eq!(
            sink.status(),
            SinkStatus::Errored(SinkError::destroyed("client error"))
        );
        assert_eq!(sink.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_cancels_source() {
        let (sink, _head_rx, body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let (tx, source) = channel_stream();
        let task = tokio::spawn(write_from_stream(&source, &sink).unwrap());

        drop(body);
        task.await.unwrap();

        assert!(tx.is_closed());
        assert_eq!(sink.status(), SinkStatus::Closed);
        assert!(!sink.is_ended());
    }

    #[tokio::test]
    async fn test_source_error_destroys_sink() {
        let (sink, _head_rx, _body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let source = BodyStream::new(stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(BoxError::from("bad chunk")),
        ]));

        write_from_stream(&source, &sink).unwrap().await;

        assert!(sink.is_destroyed());
        assert!(!sink.is_ended());
        assert_eq!(
            sink.status(),
            SinkStatus::Errored(SinkError::destroyed("bad chunk"))
        );
    }

    #[tokio::test]
    async fn test_empty_stream_ends_immediately() {
        let (sink, _head_rx, body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        let source = BodyStream::from_chunks(Vec::<Bytes>::new());

        write_from_stream(&source, &sink).unwrap().await;

        assert!(sink.is_ended());
        assert!(body.collect().await.unwrap().to_bytes().is_empty());
    }

    #[tokio::test]
    async fn test_reader_collect() {
        let source = BodyStream::from_chunks(vec!["x", "y", "z"]);
        let bytes = source.reader().unwrap().collect().await.unwrap();
        assert_eq!(bytes, Bytes::from_static(b"xyz"));
    }
}
