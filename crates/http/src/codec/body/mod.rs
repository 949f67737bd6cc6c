//! Request body decoders.
//!
//! - [`ChunkedDecoder`]: strips `Transfer-Encoding: chunked` framing
//! - [`LengthDecoder`]: reads exactly `Content-Length` bytes
//! - [`PayloadDecoder`]: picks one of the above from a [`PayloadSize`](crate::protocol::PayloadSize)

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

pub use chunked_decoder::ChunkedDecoder;
pub use length_decoder::LengthDecoder;
pub use payload_decoder::PayloadDecoder;
