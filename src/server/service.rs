//! Request bridge: turns a hyper request into a [`Context`], runs the
//! [`Handler`] and writes whatever it returns into a [`ResponseSink`].

use super::error::{BoxError, SinkError};
use super::headers::to_outgoing_headers;
use super::request::{build_context, Context, IncomingMessage};
use super::responder::handle_response_error;
use super::response::{Response, ResponseBody};
use super::sink::{ResponseSink, SinkBody};
use super::stream::write_from_stream;
use anyhow::anyhow;
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Produces a [`Response`] for every request.
///
/// Implemented for any `Fn(Context) -> impl Future<Output = anyhow::Result<Response>>`,
/// so plain async closures work as handlers.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<Response>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Response>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<Response>> {
        (self)(ctx).boxed()
    }
}

/// Shared handler as held by the server.
pub type SharedHandler = Arc<dyn Handler>;

/// Hyper entry point for one request.
///
/// The bridge task is spawned before this returns, so the handler runs even
/// when hyper drops the returned future without polling it (the client sent a
/// full request and closed its side). The future only waits for the response
/// head; the body keeps flowing from the bridge task afterwards. Dropping the
/// future marks the sink closed.
pub fn serve_request<B>(
    handler: SharedHandler,
    req: http::Request<B>,
    high_water_mark: usize,
) -> impl Future<Output = Result<http::Response<SinkBody>, SinkError>> + Send + 'static
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (sink, head_rx, body) = ResponseSink::channel(high_water_mark);
    let message = IncomingMessage::from_request(req);
    tokio::spawn(respond(handler, message, sink));

    async move {
        match head_rx.await {
            Ok(head) => Ok(head.into_response(body)),
            Err(_) => Err(SinkError::destroyed(
                "response abandoned before the head was sent",
            )),
        }
    }
}

/// Run `handler` for `message` and write the outcome into `sink`.
pub async fn respond(handler: SharedHandler, message: IncomingMessage, sink: ResponseSink) {
    let ctx = build_context(message);
    let method = ctx.method().to_string();
    let path = ctx.path().to_string();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(async move { handler.call(ctx).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(anyhow!("handler panicked: {}", panic_message(&*panic))));

    let result = match outcome {
        Ok(response) => {
            let status = response.status;
            let written = write_response(response, &sink).await;
            if written.is_ok() {
                debug!(
                    method = %method,
                    path = %path,
                    status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Response written"
                );
            }
            written
        }
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        handle_response_error(&err, &sink);
    }
}

async fn write_response(mut response: Response, sink: &ResponseSink) -> anyhow::Result<()> {
    if sink.is_destroyed() {
        info!(status = response.status, "Client went away before the response was ready");
        return Err(SinkError::PrematureClose.into());
    }

    let body = std::mem::replace(&mut response.body, ResponseBody::Empty);

    if response.is_streamed() {
        sink.write_head(response.status, &to_outgoing_headers(response.headers))?;
        write_from_stream(&body.into_stream(), sink)?.await;
        return Ok(());
    }

    let bytes = if body.is_empty() {
        None
    } else {
        let bytes = body.into_bytes().await?;
        response.set_header("content-length", bytes.len().to_string());
        Some(bytes)
    };

    sink.write_head(response.status, &to_outgoing_headers(response.headers))?;
    sink.end(bytes);
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::sink::{SinkStatus, DEFAULT_HIGH_WATER_MARK};
    use crate::server::stream::BodyStream;
    use http_body_util::{BodyExt, Full};

    fn get(uri: &str) -> http::Request<Full<Bytes>> {
        http::Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn run(
        handler: SharedHandler,
        req: http::Request<Full<Bytes>>,
    ) -> (http::StatusCode, http::HeaderMap, Bytes) {
        let res = serve_request(handler, req, DEFAULT_HIGH_WATER_MARK)
            .await
            .unwrap();
        let (parts, body) = res.into_parts();
        let bytes = body.collect().await.unwrap().to_bytes();
        (parts.status, parts.headers, bytes)
    }

    #[tokio::test]
    async fn test_buffered_response_sets_content_length() {
        let handler: SharedHandler = Arc::new(|ctx: Context| async move {
            Ok::<_, anyhow::Error>(Response::text(format!("hi {}", ctx.path())))
        });
        let (status, headers, body) = run(handler, get("/there")).await;

        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(headers.get("content-length").unwrap(), "9");
        assert_eq!(body, Bytes::from_static(b"hi /there"));
    }

    #[tokio::test]
    async fn test_empty_response_gets_default_content_type() {
        let handler: SharedHandler =
            Arc::new(|_ctx: Context| async { Ok::<_, anyhow::Error>(Response::new(204)) });
        let (status, headers, body) = run(handler, get("/")).await;

        assert_eq!(status, http::StatusCode::NO_CONTENT);
        assert_eq!(
            headers.get("content-type").unwrap(),
            "text/plain; charset=UTF-8"
        );
        assert!(headers.get("content-length").is_none());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_streamed_response() {
        let handler: SharedHandler = Arc::new(|_ctx: Context| async {
            Ok::<_, anyhow::Error>(Response::stream(BodyStream::from_chunks(vec!["one,", "two"])))
        });
        let (status, headers, body) = run(handler, get("/stream")).await;

        assert_eq!(status, http::StatusCode::OK);
        assert_eq!(headers.get("transfer-encoding").unwrap(), "chunked");
        assert_eq!(body, Bytes::from_static(b"one,two"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_500() {
        let handler: SharedHandler =
            Arc::new(|_ctx: Context| async { Err::<Response, _>(anyhow!("fail")) });
        let (status, headers, body) = run(handler, get("/")).await;

        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(body, Bytes::from_static(b"Error: fail"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_500() {
        let handler: SharedHandler = Arc::new(|ctx: Context| async move {
            if ctx.path() == "/panic" {
                panic!("kaboom");
            }
            Ok::<_, anyhow::Error>(Response::new(200))
        });
        let (status, _headers, body) = run(handler, get("/panic")).await;

        assert_eq!(status, http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Bytes::from_static(b"Error: handler panicked: kaboom"));
    }

    #[tokio::test]
    async fn test_post_body_reaches_handler() {
        let handler: SharedHandler = Arc::new(|ctx: Context| async move {
            let body = ctx.body().await;
            Ok::<_, anyhow::Error>(Response::json(&body)?)
        });
        let req = http::Request::builder()
            .method("POST")
            .uri("/echo")
            .body(Full::new(Bytes::from_static(br#"{"a":1}"#)))
            .unwrap();
        let (_status, headers, body) = run(handler, req).await;

        assert_eq!(headers.get("content-type").unwrap(), "application/json");
        assert_eq!(body, Bytes::from_static(br#"{"a":1}"#));
    }

    #[tokio::test]
    async fn test_closed_sink_skips_writes() {
        let (sink, _head_rx, body) = ResponseSink::channel(DEFAULT_HIGH_WATER_MARK);
        drop(body);

        let handler: SharedHandler =
            Arc::new(|_ctx: Context| async { Ok::<_, anyhow::Error>(Response::text("late")) });
        let message = IncomingMessage::from_request(get("/slow"));
        respond(handler, message, sink.clone()).await;

        assert!(!sink.headers_sent());
        assert!(!sink.is_ended());
        assert_eq!(sink.status(), SinkStatus::Closed);
    }

    #[tokio::test]
    async fn test_handler_runs_when_service_future_is_never_polled() {
        let (ran_tx, ran_rx) = tokio::sync::oneshot::channel();
        let ran_tx = std::sync::Mutex::new(Some(ran_tx));
        let handler: SharedHandler = Arc::new(move |ctx: Context| {
            let ran_tx = ran_tx.lock().unwrap().take();
            async move {
                let body = ctx.body().await;
                if let Some(tx) = ran_tx {
                    let _ = tx.send(body);
                }
                Ok::<_, anyhow::Error>(Response::new(204))
            }
        });

        let req = http::Request::builder()
            .method("POST")
            .uri("/hook")
            .body(Full::new(Bytes::from_static(b"fired")))
            .unwrap();
        drop(serve_request(handler, req, DEFAULT_HIGH_WATER_MARK));

        let body = tokio::time::timeout(std::time::Duration::from_secs(5), ran_rx)
            .await
            .expect("handler did not run")
            .unwrap();
        assert_eq!(body, serde_json::json!("fired"));
    }
}
