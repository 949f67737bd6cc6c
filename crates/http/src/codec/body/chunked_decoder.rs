//! `Transfer-Encoding: chunked` request bodies.
//!
//! Chunk-size lines, extensions, trailers and CRLF framing are consumed here;
//! only application bytes are yielded.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::protocol::{ParseError, PayloadItem};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDecoder {
    state: State,
    remaining: u64,
    size_digits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Hex digits of the chunk size
    Size,
    /// Whitespace or extensions after the size, up to CR
    SizeTail,
    SizeLf,
    Data,
    DataCr,
    DataLf,
    /// Start of a trailer field, or the CR of the final empty line
    TrailerStart,
    TrailerLine,
    TrailerLf,
    FinalLf,
    Done,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: State::Size, remaining: 0, size_digits: 0 }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn advance(&mut self, byte: u8) -> Result<State, ParseError> {
        use State::*;

        let next = match (self.state, byte) {
            (Size, b) if b.is_ascii_hexdigit() => {
                let digit = (b as char).to_digit(16).unwrap_or(0) as u64;
                self.remaining = self
                    .remaining
                    .checked_mul(16)
                    .and_then(|n| n.checked_add(digit))
                    .ok_or_else(|| ParseError::invalid_body("chunk size overflow"))?;
                self.size_digits = self.size_digits.saturating_add(1);
                Size
            }
            (Size, b' ' | b'\t' | b';') if self.size_digits > 0 => SizeTail,
            (Size, b'\r') if self.size_digits > 0 => SizeLf,
            (Size, _) => return Err(ParseError::invalid_body("invalid chunk size line")),

            (SizeTail, b'\r') => SizeLf,
            (SizeTail, b'\n') => return Err(ParseError::invalid_body("bare LF in chunk extension")),
            (SizeTail, _) => SizeTail,

            (SizeLf, b'\n') if self.remaining == 0 => TrailerStart,
            (SizeLf, b'\n') => Data,
            (SizeLf, _) => return Err(ParseError::invalid_body("expected LF after chunk size")),

            (DataCr, b'\r') => DataLf,
            (DataCr, _) => return Err(ParseError::invalid_body("expected CR after chunk data")),

            (DataLf, b'\n') => {
                self.size_digits = 0;
                Size
            }
            (DataLf, _) => return Err(ParseError::invalid_body("expected LF after chunk data")),

            (TrailerStart, b'\r') => FinalLf,
            (TrailerStart, _) => TrailerLine,
            (TrailerLine, b'\r') => TrailerLf,
            (TrailerLine, _) => TrailerLine,

            (TrailerLf, b'\n') => TrailerStart,
            (TrailerLf, _) => return Err(ParseError::invalid_body("expected LF after trailer field")),

            (FinalLf, b'\n') => Done,
            (FinalLf, _) => return Err(ParseError::invalid_body("expected LF after last chunk")),

            (Data | Done, _) => self.state,
        };
        Ok(next)
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                State::Done => {
                    trace!("finished reading chunked body");
                    return Ok(Some(PayloadItem::Eof));
                }

                State::Data if self.remaining == 0 => self.state = State::DataCr,

                State::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = self.remaining.min(src.len() as u64) as usize;
                    self.remaining -= take as u64;
                    return Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())));
                }

                _ => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let byte = src.get_u8();
                    self.state = self.advance(byte)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn collect(decoder: &mut ChunkedDecoder, buffer: &mut BytesMut) -> (Vec<u8>, bool) {
        let mut body = Vec::new();
        while let Some(item) = decoder.decode(buffer).unwrap() {
            match item {
                PayloadItem::Chunk(bytes) => body.extend_from_slice(&bytes),
                PayloadItem::Eof => return (body, true),
            }
        }
        (body, false)
    }

    #[test]
    fn single_chunk() {
        let mut buffer = BytesMut::from(&b"10\r\n1234567890abcdef\r\n0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(item.as_bytes().unwrap(), &Bytes::from_static(b"1234567890abcdef"));

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(buffer.is_empty());
    }

    #[test]
    fn multiple_chunks_concatenate() {
        let mut buffer = BytesMut::from(&b"5\r\nhello\r\n7\r\n, world\r\n0\r\n\r\n"[..]);
        let (body, finished) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert!(finished);
        assert_eq!(body, b"hello, world");
    }

    #[test]
    fn extensions_and_trailers_are_dropped() {
        let mut buffer = BytesMut::from(&b"5;name=value\r\nhello\r\n0\r\nX-Trailer: v\r\nX-Other: w\r\n\r\n"[..]);
        let (body, finished) = collect(&mut ChunkedDecoder::new(), &mut buffer);
        assert!(finished);
        assert_eq!(body, b"hello");
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let wire = b"4\r\nWiki\r\n5\r\npedia\r\nE\r\n in\r\n\r\nchunks.\r\n0\r\n\r\n";
        let mut decoder = ChunkedDecoder::new();
        let mut buffer = BytesMut::new();
        let mut body = Vec::new();
        let mut finished = false;

        for b in wire.iter() {
            buffer.extend_from_slice(&[*b]);
            let (piece, done) = collect(&mut decoder, &mut buffer);
            body.extend(piece);
            finished |= done;
        }

        assert!(finished);
        assert_eq!(body, b"Wikipedia in\r\n\r\nchunks.");
    }

    #[test]
    fn partial_chunk_yields_what_is_available() {
        let mut buffer = BytesMut::from(&b"5\r\nhel"[..]);
        let mut decoder = ChunkedDecoder::new();

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(item.as_bytes().unwrap(), &Bytes::from_static(b"hel"));
        assert!(decoder.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let (rest, finished) = collect(&mut decoder, &mut buffer);
        assert!(finished);
        assert_eq!(rest, b"lo");
    }

    #[test]
    fn invalid_size_is_rejected() {
        let mut buffer = BytesMut::from(&b"xyz\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());

        let mut buffer = BytesMut::from(&b"\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn missing_data_crlf_is_rejected() {
        let mut buffer = BytesMut::from(&b"5\r\nhelloBad"[..]);
        let mut decoder = ChunkedDecoder::new();

        decoder.decode(&mut buffer).unwrap().unwrap();
        assert!(decoder.decode(&mut buffer).is_err());
    }

    #[test]
    fn oversized_size_overflows() {
        let mut buffer = BytesMut::from(&b"fffffffffffffffff\r\n"[..]);
        assert!(ChunkedDecoder::new().decode(&mut buffer).is_err());
    }

    #[test]
    fn zero_size_body() {
        let mut buffer = BytesMut::from(&b"0\r\n\r\n"[..]);
        let mut decoder = ChunkedDecoder::new();
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
        assert!(decoder.is_done());
    }
}
