use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::header::HeaderDecoder;
use crate::protocol::{Message, ParseError, PayloadItem, PayloadSize, RequestHeader};

/// Decodes one request: a `Message::Header`, then payload items up to and including `Eof`.
///
/// `payload_decoder` is `None` while the head is being read. Once the body's
/// `Eof` has been emitted the decoder is back in head mode, though the
/// connection engine never reads a second request from one connection.
#[derive(Debug, Default)]
pub struct RequestDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Whether the head has been decoded and the body is still pending.
    pub fn in_body(&self) -> bool {
        self.payload_decoder.is_some()
    }
}

impl Decoder for RequestDecoder {
    type Item = Message<(RequestHeader, PayloadSize)>;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let item = payload_decoder.decode(src)?;
            if matches!(item, Some(PayloadItem::Eof)) {
                self.payload_decoder = None;
            }
            return Ok(item.map(Message::Payload));
        }

        Ok(self.header_decoder.decode(src)?.map(|(header, payload_size)| {
            self.payload_decoder = Some(payload_size.into());
            Message::Header((header, payload_size))
        }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if self.in_body() || !buf.is_empty() => Err(ParseError::ConnectionClosed),
            None => Ok(None),
        }
    }
}
