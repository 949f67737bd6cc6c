//! Protocol types shared by the codec and the connection engine.
//!
//! - [`message`]: decoder output ([`Message`], [`PayloadItem`], [`PayloadSize`])
//! - [`request`]: the decoded head and the [`RequestFields`] map applications see
//! - [`response`]: [`ResponseBody`], [`Chunk`] and reason phrases
//! - [`body`]: request body buffering
//! - [`error`]: connection-level errors

mod message;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;

mod request;
pub use request::ConnectionInfo;
pub use request::RequestFields;
pub use request::RequestHeader;
pub use request::keys;

mod response;
pub(crate) use response::BodyKind;
pub use response::Chunk;
pub use response::ResponseBody;
pub use response::ResponseHead;
pub use response::reason_phrase;

mod error;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;

pub mod body;
