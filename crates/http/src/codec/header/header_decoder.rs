//! Request line and header block decoding.
//!
//! Parsing is delegated to `httparse`; this decoder enforces the size limits,
//! converts the result into an `http::Request<()>` and works out how the body
//! is framed.

use bytes::BytesMut;
use http::{HeaderName, HeaderValue, Request, Version, header};
use httparse::Status;
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHeader};

/// Maximum number of header fields in one request.
pub const MAX_HEADERS: usize = 128;

/// Maximum size of the request line plus header block, terminator included.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Decodes one request head and reports how its payload is framed.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = (RequestHeader, PayloadSize);
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let status = req.parse(&src[..]).map_err(|e| match e {
            httparse::Error::TooManyHeaders => ParseError::too_many_headers(MAX_HEADERS),
            httparse::Error::Version => ParseError::InvalidVersion(None),
            e => ParseError::invalid_header(e),
        })?;

        let head_len = match status {
            Status::Complete(head_len) => head_len,
            Status::Partial => {
                ensure!(src.len() < MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
                return Ok(None);
            }
        };
        trace!(head_len, header_count = req.headers.len(), "parsed request head");
        ensure!(head_len <= MAX_HEADER_BYTES, ParseError::too_large_header(head_len, MAX_HEADER_BYTES));

        let version = match req.version {
            Some(0) => Version::HTTP_10,
            Some(1) => Version::HTTP_11,
            other => return Err(ParseError::InvalidVersion(other)),
        };

        let mut builder = Request::builder()
            .method(req.method.ok_or(ParseError::InvalidMethod)?)
            .uri(req.path.ok_or(ParseError::InvalidUri)?)
            .version(version);

        for field in req.headers.iter() {
            let name = HeaderName::from_bytes(field.name.as_bytes()).map_err(ParseError::invalid_header)?;
            let value = HeaderValue::from_bytes(field.value).map_err(ParseError::invalid_header)?;
            builder = builder.header(name, value);
        }

        let request = builder.body(()).map_err(|e| {
            if e.is::<http::uri::InvalidUri>() {
                ParseError::InvalidUri
            } else if e.is::<http::method::InvalidMethod>() {
                ParseError::InvalidMethod
            } else {
                ParseError::invalid_header(e)
            }
        })?;
        let header = RequestHeader::from(request);
        let payload_size = parse_payload(&header)?;

        let _ = src.split_to(head_len);
        Ok(Some((header, payload_size)))
    }
}

/// Works out the body framing from `Transfer-Encoding` and `Content-Length`.
///
/// A request carrying both is rejected; a transfer coding other than chunked
/// is treated as having no body.
fn parse_payload(header: &RequestHeader) -> Result<PayloadSize, ParseError> {
    let te_header = header.headers().get(header::TRANSFER_ENCODING);
    let cl_headers = header.headers().get_all(header::CONTENT_LENGTH);

    match (te_header, cl_headers.iter().next()) {
        (None, None) => Ok(PayloadSize::Empty),

        (Some(te_value), None) => {
            if is_chunked(te_value) {
                Ok(PayloadSize::Chunked)
            } else {
                Ok(PayloadSize::Empty)
            }
        }

        (None, Some(_)) => {
            let mut length = None;
            for value in cl_headers.iter() {
                let cl_str = value.to_str().map_err(|_| ParseError::invalid_content_length("value is not visible ascii"))?;
                let parsed = cl_str
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ParseError::invalid_content_length(format!("value {cl_str} is not u64")))?;
                match length {
                    Some(previous) if previous != parsed => {
                        return Err(ParseError::invalid_content_length("conflicting values"));
                    }
                    _ => length = Some(parsed),
                }
            }
            Ok(PayloadSize::new_length(length.unwrap_or(0)))
        }

        (Some(_), Some(_)) => Err(ParseError::invalid_content_length("transfer-encoding and content-length both present")),
    }
}

/// Chunked must be the final coding when present.
fn is_chunked(value: &HeaderValue) -> bool {
    value
        .as_bytes()
        .rsplit(|b| *b == b',')
        .next()
        .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"))
}
