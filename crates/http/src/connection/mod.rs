//! The per-connection engine.
//!
//! [`HttpConnection`] takes one accepted connection through parse, body
//! buffering, application dispatch and response writing, then closes it.
//! [`ResponseWriter`] bounds every write by the configured timeout.

mod http_connection;
mod response_writer;

pub use http_connection::HttpConnection;
pub use response_writer::ResponseWriter;
