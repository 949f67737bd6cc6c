//! Wire codecs.
//!
//! [`RequestDecoder`] is a `tokio_util` [`Decoder`](tokio_util::codec::Decoder)
//! that yields the request head followed by body items; it is driven by a
//! `FramedRead` in the connection engine. [`HeaderEncoder`] serializes the
//! response head. Response bodies are written raw, never chunk-encoded.

mod body;
mod header;
mod request_decoder;

pub use body::{ChunkedDecoder, LengthDecoder, PayloadDecoder};
pub use header::{DEFAULT_SERVER, HeaderDecoder, HeaderEncoder, MAX_HEADER_BYTES, MAX_HEADERS};
pub use request_decoder::RequestDecoder;
