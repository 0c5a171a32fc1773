//! HTTP request/response bridge.
//!
//! Incoming hyper requests become a [`Context`], the [`Handler`] returns a
//! [`Response`], and the response is written through a [`ResponseSink`] that
//! hyper drains as the connection allows.

pub mod error;
pub mod headers;
pub mod http_server;
pub mod request;
pub mod responder;
pub mod response;
pub mod service;
pub mod sink;
pub mod stream;

pub use error::{is_premature_close, BodyError, BoxError, SinkError, StreamError};
pub use headers::{parse_headers, to_outgoing_headers, DEFAULT_CONTENT_TYPE};
pub use http_server::{close_server, AddressFamily, AddressInfo, HttpServer, ServerHandle};
pub use request::{
    build_context, parse_query_params, safe_json_parse, BodySource, Context, IncomingMessage,
};
pub use responder::handle_response_error;
pub use response::{Response, ResponseBody};
pub use service::{respond, serve_request, Handler, SharedHandler};
pub use sink::{
    HeadReceiver, ResponseHead, ResponseSink, SinkBody, SinkStatus, SinkSubscription,
    DEFAULT_HIGH_WATER_MARK,
};
pub use stream::{write_from_stream, BodyReader, BodyStream};
