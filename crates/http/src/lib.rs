//! Single-request HTTP/1.x connection engine for prefork workers.
//!
//! Each accepted connection carries exactly one request: the head is parsed,
//! the body (fixed-length or chunked) is buffered into memory or a temporary
//! file, the [`Application`](handler::Application) is called once, and the
//! response is written with `Connection: close` before the socket is shut
//! down. Reads share one deadline per connection and every write is bounded,
//! so a slow or silent peer can never hold a worker indefinitely.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use http::Response;
//! use tokio::net::TcpListener;
//! use prefork_http::connection::HttpConnection;
//! use prefork_http::handler::make_application;
//! use prefork_http::protocol::{ConnectionInfo, RequestFields, ResponseBody};
//!
//! async fn hello(req: RequestFields) -> Result<Response<ResponseBody>, std::io::Error> {
//!     Ok(Response::new(ResponseBody::from(format!("hello {}\n", req.path_info()))))
//! }
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:9292").await?;
//! let app = make_application(hello);
//! loop {
//!     let (stream, peer) = listener.accept().await?;
//!     let info = ConnectionInfo::new("127.0.0.1", 9292).with_remote(Some(peer));
//!     let (reader, writer) = stream.into_split();
//!     let _ = HttpConnection::new(reader, writer, info, Duration::from_secs(300)).process(&app).await;
//! }
//! # }
//! ```
//!
//! # Modules
//!
//! - [`connection`]: the per-connection engine and bounded response writer
//! - [`protocol`]: request fields, response bodies, body buffering, errors
//! - [`codec`]: request decoding and response head encoding
//! - [`handler`]: the application contract
//!
//! # Limits
//!
//! - request line plus headers: 16 KiB
//! - header count: 128
//! - bodies above 1 MiB are buffered on disk

pub mod codec;
pub mod connection;
pub mod handler;
pub mod protocol;

mod utils;
pub(crate) use utils::ensure;
