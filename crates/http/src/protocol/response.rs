//! Response types produced by applications.
//!
//! An application answers with an `http::Response<ResponseBody>`. The head is
//! written as-is apart from the connection-management headers; the body is
//! either a finite list of [`Chunk`]s or a lazily produced stream of them.

use std::fmt;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use http::{Response, StatusCode};

/// Response head before the body is attached.
pub type ResponseHead = Response<()>;

/// One piece of a response body.
///
/// Empty strings, `None` and the integer `0` are valid placeholders that
/// produce no output; they are skipped by the writer and never end the body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk(Option<Bytes>);

impl Chunk {
    /// A placeholder that writes nothing.
    pub const fn skip() -> Self {
        Chunk(None)
    }

    pub fn is_skipped(&self) -> bool {
        self.0.as_ref().is_none_or(Bytes::is_empty)
    }

    /// The bytes to write, or `None` for a placeholder.
    pub fn into_bytes(self) -> Option<Bytes> {
        self.0.filter(|bytes| !bytes.is_empty())
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk(Some(bytes))
    }
}

impl From<&'static str> for Chunk {
    fn from(s: &'static str) -> Self {
        Chunk(Some(Bytes::from_static(s.as_bytes())))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(s: &'static [u8]) -> Self {
        Chunk(Some(Bytes::from_static(s)))
    }
}

impl From<String> for Chunk {
    fn from(s: String) -> Self {
        Chunk(Some(Bytes::from(s)))
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(v: Vec<u8>) -> Self {
        Chunk(Some(Bytes::from(v)))
    }
}

impl<T: Into<Chunk>> From<Option<T>> for Chunk {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

macro_rules! chunk_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Chunk {
                fn from(n: $ty) -> Self {
                    if n == 0 { Chunk(None) } else { Chunk(Some(Bytes::from(n.to_string()))) }
                }
            }
        )*
    };
}

chunk_from_integer!(i32, i64, u32, u64, usize);

type CloseHook = Box<dyn FnOnce() + Send>;

/// The body half of an application response.
pub struct ResponseBody {
    kind: BodyKind,
    on_close: Option<CloseHook>,
}

pub(crate) enum BodyKind {
    Chunks(Vec<Chunk>),
    Stream(BoxStream<'static, Chunk>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::chunks(Vec::<Chunk>::new())
    }

    /// A finite body, written in order.
    pub fn chunks<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Chunk>,
    {
        Self { kind: BodyKind::Chunks(chunks.into_iter().map(Into::into).collect()), on_close: None }
    }

    /// A lazily produced body; the writer pulls until the stream ends or a write fails.
    pub fn stream<S, C>(stream: S) -> Self
    where
        S: Stream<Item = C> + Send + 'static,
        C: Into<Chunk> + 'static,
    {
        Self { kind: BodyKind::Stream(stream.map(Into::into).boxed()), on_close: None }
    }

    /// Registers a release callback, invoked once after the last chunk however writing ended.
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(f));
        self
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, BodyKind::Stream(_))
    }

    pub(crate) fn into_parts(self) -> (BodyKind, Option<CloseHook>) {
        (self.kind, self.on_close)
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            BodyKind::Chunks(chunks) => format!("Chunks({})", chunks.len()),
            BodyKind::Stream(_) => "Stream".to_string(),
        };
        f.debug_struct("ResponseBody").field("kind", &kind).field("on_close", &self.on_close.is_some()).finish()
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        Self::chunks([s])
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        Self::chunks([s])
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(v: Vec<u8>) -> Self {
        Self::chunks([v])
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::chunks([bytes])
    }
}

/// Human-readable reason phrase for a status line.
///
/// Unregistered codes fall back to a phrase for their class.
pub fn reason_phrase(status: StatusCode) -> &'static str {
    if let Some(reason) = status.canonical_reason() {
        return reason;
    }
    match status.as_u16() {
        100..=199 => "Informational",
        200..=299 => "Success",
        300..=399 => "Redirection",
        400..=499 => "Client Error",
        _ => "Error",
    }
}
