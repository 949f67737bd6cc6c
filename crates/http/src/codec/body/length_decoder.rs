use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::{ParseError, PayloadItem};

/// Yields exactly `remaining` bytes, then `Eof`.
///
/// Bytes past the declared length stay in the buffer untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthDecoder {
    remaining: u64,
}

impl LengthDecoder {
    pub fn new(length: u64) -> Self {
        Self { remaining: length }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Decoder for LengthDecoder {
    type Item = PayloadItem;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.remaining == 0 {
            return Ok(Some(PayloadItem::Eof));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let take = self.remaining.min(src.len() as u64) as usize;
        self.remaining -= take as u64;
        Ok(Some(PayloadItem::Chunk(src.split_to(take).freeze())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_declared_length() {
        let mut buffer = BytesMut::from(&b"101234567890abcdef\r\n\r\n"[..]);
        let mut decoder = LengthDecoder::new(10);

        let item = decoder.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(&item.as_bytes().unwrap()[..], b"1012345678");
        assert_eq!(&buffer[..], b"90abcdef\r\n\r\n");

        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }

    #[test]
    fn fragments_add_up() {
        let mut decoder = LengthDecoder::new(5);
        let mut buffer = BytesMut::from(&b"ab"[..]);

        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().into_bytes().unwrap(), "ab");
        assert!(decoder.decode(&mut buffer).unwrap().is_none());
        assert_eq!(decoder.remaining(), 3);

        buffer.extend_from_slice(b"cde");
        assert_eq!(decoder.decode(&mut buffer).unwrap().unwrap().into_bytes().unwrap(), "cde");
        assert!(decoder.decode(&mut buffer).unwrap().unwrap().is_eof());
    }
}
