//! # Outgoing response sink
//!
//! [`ResponseSink`] is the writer side of a single HTTP response. It mirrors the
//! shape of a socket-backed response writer: a head is written once, chunks are
//! written with a backpressure flag, and the response is terminated by exactly
//! one `end` or `destroy`.
//!
//! The reader side is [`SinkBody`], an [`http_body::Body`] that hyper polls to
//! put bytes on the wire. The head travels separately over a oneshot channel so
//! the connection task can build the `http::Response` before any body chunk is
//! produced.
//!
//! ```text
//! handler task                         connection task (hyper)
//! ------------                         -----------------------
//! write_head(200, headers) --oneshot-> HeadReceiver -> http::Response<SinkBody>
//! write(chunk) -> queue ------------------------------> SinkBody::poll_frame
//! drained().await <------- drain notify --------------- queue emptied
//! end() / destroy()  --------------------------------->  end of body / abort
//! subscribe() <----------- status: Closed ------------- SinkBody dropped early
//! ```
//!
//! Close and error notifications are delivered through a `watch` channel.
//! A [`SinkSubscription`] is a receiver on that channel, so unsubscribing is
//! simply dropping it and [`ResponseSink::listener_count`] counts live ones.

use super::error::SinkError;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body::{Body, Frame, SizeHint};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context as TaskContext, Poll, Waker};
use tokio::sync::{oneshot, watch, Notify};
use tracing::trace;

/// Buffered byte count at which [`ResponseSink::write`] starts reporting backpressure.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16 * 1024;

/// Status line and headers of a response, delivered once per sink.
#[derive(Debug)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    fn build(status: u16, headers: &HashMap<String, String>) -> Result<Self, SinkError> {
        let status = StatusCode::from_u16(status).map_err(|_| SinkError::InvalidHead {
            reason: format!("status code {}", status),
        })?;

        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| SinkError::InvalidHead {
                    reason: format!("header name {:?}", name),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| SinkError::InvalidHead {
                reason: format!("value of header {:?}", name),
            })?;
            map.insert(header_name, header_value);
        }

        Ok(Self {
            status,
            headers: map,
        })
    }

    /// Head sent when a chunk is written before any explicit `write_head`.
    fn implicit() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
    }

    pub fn into_response<B>(self, body: B) -> http::Response<B> {
        let mut response = http::Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Receiving end of the response head.
pub type HeadReceiver = oneshot::Receiver<ResponseHead>;

/// Observable lifecycle of a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    /// Accepting writes
    Open,
    /// `end` was called; remaining bytes are flushing
    Finished,
    /// The peer went away, or the sink was destroyed without an error
    Closed,
    /// The sink was destroyed with an error
    Errored(SinkError),
}

impl SinkStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SinkStatus::Open)
    }

    pub fn error(&self) -> Option<&SinkError> {
        match self {
            SinkStatus::Errored(err) => Some(err),
            _ => None,
        }
    }
}

struct SinkState {
    head: Option<oneshot::Sender<ResponseHead>>,
    headers_sent: bool,
    queue: VecDeque<Bytes>,
    buffered: usize,
    needs_drain: bool,
    ended: bool,
    destroyed: bool,
    closed: bool,
    failure: Option<SinkError>,
    abort_pending: bool,
    body_waker: Option<Waker>,
}

impl SinkState {
    /// Error reported to writers once the sink is no longer usable.
    fn terminal_error(&self) -> SinkError {
        self.failure
            .clone()
            .unwrap_or_else(|| SinkError::destroyed("response sink destroyed"))
    }

    /// Hand the head to the connection; `false` when nobody is listening anymore.
    fn deliver_head(&mut self, head: ResponseHead) -> bool {
        match self.head.take() {
            Some(tx) => match tx.send(head) {
                Ok(()) => {
                    self.headers_sent = true;
                    true
                }
                Err(_) => false,
            },
            None => false,
        }
    }
}

struct Shared {
    state: Mutex<SinkState>,
    status: watch::Sender<SinkStatus>,
    drain: Notify,
    high_water_mark: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: impl FnOnce(&SinkStatus) -> Option<SinkStatus>) {
        self.status.send_if_modified(|current| match next(current) {
            Some(status) => {
                *current = status;
                true
            }
            None => false,
        });
    }

    /// The reading side went away. Before `end` this is a premature close.
    fn mark_closed(&self) {
        let (premature, waker) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let premature = !state.ended && !state.destroyed;
            if premature {
                state.destroyed = true;
                state.head = None;
                state.queue.clear();
                state.buffered = 0;
                state.failure = Some(SinkError::PrematureClose);
            }
            (premature, state.body_waker.take())
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        if premature {
            trace!("response sink closed before the response was complete");
            self.transition(|current| current.is_open().then_some(SinkStatus::Closed));
        }
        self.drain.notify_waiters();
    }
}

/// Writer side of one HTTP response. Clones share the same response.
#[derive(Clone)]
pub struct ResponseSink {
    shared: Arc<Shared>,
}

impl ResponseSink {
    /// Create a sink together with the head receiver and the body hyper polls.
    pub fn channel(high_water_mark: usize) -> (ResponseSink, HeadReceiver, SinkBody) {
        let (head_tx, head_rx) = oneshot::channel();
        let (status, _) = watch::channel(SinkStatus::Open);
        let shared = Arc::new(Shared {
            state: Mutex::new(SinkState {
                head: Some(head_tx),
                headers_sent: false,
                queue: VecDeque::new(),
                buffered: 0,
                needs_drain: false,
                ended: false,
                destroyed: false,
                closed: false,
                failure: None,
                abort_pending: false,
                body_waker: None,
            }),
            status,
            drain: Notify::new(),
            high_water_mark: high_water_mark.max(1),
        });

        (
            ResponseSink {
                shared: Arc::clone(&shared),
            },
            head_rx,
            SinkBody { shared },
        )
    }

    /// Send the status line and headers.
    pub fn write_head(
        &self,
        status: u16,
        headers: &HashMap<String, String>,
    ) -> Result<(), SinkError> {
        let head = ResponseHead::build(status, headers)?;

        let mut state = self.shared.lock();
        if state.headers_sent {
            return Err(SinkError::HeadersAlreadySent);
        }
        if state.destroyed {
            return Err(state.terminal_error());
        }
        if state.deliver_head(head) {
            return Ok(());
        }
        drop(state);

        self.shared.mark_closed();
        Err(SinkError::PrematureClose)
    }

    /// Queue a chunk.
    ///
    /// The chunk is always accepted. `Ok(false)` means the buffer reached the
    /// high-water mark and the caller should wait for [`ResponseSink::drained`]
    /// before writing again.
    pub fn write(&self, chunk: Bytes) -> Result<bool, SinkError> {
        let mut state = self.shared.lock();
        if state.ended {
            return Err(SinkError::WriteAfterEnd);
        }
        if state.destroyed {
            return Err(state.terminal_error());
        }
        if !state.headers_sent && !state.deliver_head(ResponseHead::implicit()) {
            drop(state);
            self.shared.mark_closed();
            return Err(SinkError::PrematureClose);
        }

        if !chunk.is_empty() {
            state.buffered += chunk.len();
            state.queue.push_back(chunk);
        }
        let has_capacity = state.buffered < self.shared.high_water_mark;
        if !has_capacity {
            state.needs_drain = true;
        }
        let waker = state.body_waker.take();
        drop(state);

        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(has_capacity)
    }

    /// Finish the response, optionally with a last chunk.
    ///
    /// Returns `true` only for the call that actually terminated the sink.
    pub fn end(&self, chunk: Option<Bytes>) -> bool {
        let mut state = self.shared.lock();
        if state.ended || state.destroyed {
            return false;
        }
        if !state.headers_sent && !state.deliver_head(ResponseHead::implicit()) {
            drop(state);
            self.shared.mark_closed();
            return false;
        }

        if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
            state.buffered += chunk.len();
            state.queue.push_back(chunk);
        }
        state.ended = true;
        let waker = state.body_waker.take();
        drop(state);

        if let Some(waker) = waker {
            waker.wake();
        }
        self.shared
            .transition(|current| current.is_open().then_some(SinkStatus::Finished));
        self.shared.drain.notify_waiters();
        true
    }

    /// Tear the response down.
    ///
    /// Before `end` this drops queued bytes and aborts the body, so the
    /// connection is cut instead of finishing cleanly. After `end` the
    /// committed bytes still flush. Calling it again is a no-op.
    pub fn destroy(&self, error: Option<SinkError>) {
        let waker = {
            let mut state = self.shared.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.head = None;
            if !state.ended {
                state.queue.clear();
                state.buffered = 0;
                state.abort_pending = true;
            }
            state.failure = error.clone();
            state.body_waker.take()
        };

        if let Some(waker) = waker {
            waker.wake();
        }
        match error {
            Some(err) => self.shared.transition(|current| match current {
                SinkStatus::Open | SinkStatus::Finished => Some(SinkStatus::Errored(err)),
                _ => None,
            }),
            None => self
                .shared
                .transition(|current| current.is_open().then_some(SinkStatus::Closed)),
        }
        self.shared.drain.notify_waiters();
    }

    pub fn headers_sent(&self) -> bool {
        self.shared.lock().headers_sent
    }

    pub fn is_ended(&self) -> bool {
        self.shared.lock().ended
    }

    /// Destroyed explicitly, or closed by the peer before the end.
    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    pub fn status(&self) -> SinkStatus {
        self.shared.status.borrow().clone()
    }

    /// Listen for close and error notifications until the returned guard drops.
    pub fn subscribe(&self) -> SinkSubscription {
        SinkSubscription {
            rx: self.shared.status.subscribe(),
        }
    }

    /// Number of live [`SinkSubscription`]s.
    pub fn listener_count(&self) -> usize {
        self.shared.status.receiver_count()
    }

    /// Wait until a full buffer has been flushed, or the sink terminated.
    pub async fn drained(&self) {
        loop {
            let notified = self.shared.drain.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.shared.lock();
                if !state.needs_drain || state.ended || state.destroyed {
                    return;
                }
            }
            notified.await;
        }
    }
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("ResponseSink")
            .field("headers_sent", &state.headers_sent)
            .field("buffered", &state.buffered)
            .field("ended", &state.ended)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}

/// Scoped close/error listener on a [`ResponseSink`].
pub struct SinkSubscription {
    rx: watch::Receiver<SinkStatus>,
}

impl SinkSubscription {
    /// Resolve once the sink leaves the `Open` state.
    pub async fn terminated(&mut self) -> SinkStatus {
        match self.rx.wait_for(|status| !status.is_open()).await {
            Ok(status) => SinkStatus::clone(&status),
            Err(_) => SinkStatus::Closed,
        }
    }
}

/// Response body fed by a [`ResponseSink`].
///
/// Dropping it before the sink ended marks the sink as prematurely closed.
pub struct SinkBody {
    shared: Arc<Shared>,
}

impl Body for SinkBody {
    type Data = Bytes;
    type Error = SinkError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut state = self.shared.lock();

        if let Some(chunk) = state.queue.pop_front() {
            state.buffered = state.buffered.saturating_sub(chunk.len());
            let drained = state.needs_drain && state.buffered == 0;
            if drained {
                state.needs_drain = false;
            }
            drop(state);
            if drained {
                self.shared.drain.notify_waiters();
            }
            return Poll::Ready(Some(Ok(Frame::data(chunk))));
        }

        if state.abort_pending {
            state.abort_pending = false;
            return Poll::Ready(Some(Err(state.terminal_error())));
        }

        if state.ended || state.destroyed {
            return Poll::Ready(None);
        }

        state.body_waker = Some(cx.waker().clone());
        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        let state = self.shared.lock();
        state.queue.is_empty() && !state.abort_pending && (state.ended || state.destroyed)
    }

    fn size_hint(&self) -> SizeHint {
        let state = self.shared.lock();
        if state.ended && !state.abort_pending {
            SizeHint::with_exact(state.buffered as u64)
        } else {
            SizeHint::default()
        }
    }
}

impl Drop for SinkBody {
    fn drop(&mut self) {
        self.shared.mark_closed();
    }
}
