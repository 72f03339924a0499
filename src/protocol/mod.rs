pub mod handler;
#[cfg(feature = "http")]
pub mod http;
pub mod jsonrpc;
pub mod transport;

pub use handler::{ProtocolHandler, ProtocolState, PROTOCOL_VERSION};
pub use jsonrpc::{ProtocolError, Request, RequestId, Response};
pub use transport::{
    serve_lines, serve_lines_with_limit, serve_listener, serve_stdio, serve_tcp, MAX_LINE_BYTES,
};
