//! Header-level codecs: [`HeaderDecoder`] for request heads, [`HeaderEncoder`]
//! for response heads.

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_decoder::{MAX_HEADER_BYTES, MAX_HEADERS};
pub use header_encoder::DEFAULT_SERVER;
pub use header_encoder::HeaderEncoder;
