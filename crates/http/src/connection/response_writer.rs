use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Encoder;

use crate::codec::HeaderEncoder;
use crate::protocol::{ResponseHead, SendError};

/// Small chunks are coalesced up to this size before hitting the socket.
const WRITE_BUFFER_SIZE: usize = 8 * 1024;

/// Buffered, timeout-bounded writer for one response.
///
/// Every socket write is bounded by `timeout`; a write that cannot make
/// progress in time fails with [`SendError::Timeout`].
#[derive(Debug)]
pub struct ResponseWriter<W> {
    writer: W,
    buffer: BytesMut,
    encoder: HeaderEncoder,
    timeout: Duration,
}

impl<W> ResponseWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, timeout: Duration) -> Self {
        Self { writer, buffer: BytesMut::with_capacity(WRITE_BUFFER_SIZE), encoder: HeaderEncoder, timeout }
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Serializes the head into the buffer; nothing reaches the socket until the next flush.
    pub fn write_head(&mut self, head: ResponseHead) -> Result<(), SendError> {
        self.encoder.encode(head, &mut self.buffer)
    }

    /// Queues a body chunk, flushing when the buffer would grow past its capacity.
    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), SendError> {
        if self.buffer.len() + chunk.len() <= WRITE_BUFFER_SIZE {
            self.buffer.extend_from_slice(&chunk);
            return Ok(());
        }

        self.flush().await?;
        self.write_bounded(&chunk).await
    }

    /// Writes pre-formatted bytes immediately, bypassing the head encoder.
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        self.flush().await?;
        self.write_bounded(bytes).await?;
        self.flush_socket().await
    }

    pub async fn flush(&mut self) -> Result<(), SendError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let pending = self.buffer.split().freeze();
        self.write_bounded(&pending).await?;
        self.flush_socket().await
    }

    /// Shuts the write half down; bounded like every other write.
    pub async fn shutdown(&mut self) -> Result<(), SendError> {
        self.buffer.clear();
        match timeout(self.timeout, self.writer.shutdown()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SendError::Timeout),
        }
    }

    async fn write_bounded(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        match timeout(self.timeout, self.writer.write_all(bytes)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SendError::Timeout),
        }
    }

    async fn flush_socket(&mut self) -> Result<(), SendError> {
        match timeout(self.timeout, self.writer.flush()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SendError::Timeout),
        }
    }
}
