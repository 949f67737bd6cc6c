use std::error::Error;
use std::time::Duration;

use futures::StreamExt;
use http::{Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, timeout_at};
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace, warn};

use crate::codec::RequestDecoder;
use crate::handler::Application;
use crate::protocol::body::{BufferedBody, DEFAULT_MEMORY_MAX};
use crate::protocol::{
    BodyKind, ConnectionInfo, HttpError, Message, ParseError, PayloadItem, PayloadSize, RequestFields, RequestHeader,
    ResponseBody, ResponseHead, keys,
};

use super::ResponseWriter;

const BAD_REQUEST: &[u8] = b"HTTP/1.0 400 Bad Request\r\nConnection: close\r\n\r\n400 Bad Request\r\n";
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";
const EXPECTATION_FAILED: &[u8] = b"HTTP/1.1 417 Expectation Failed\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\nExpectation Failed\r\n";

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Longest read deadline; larger timeouts are clamped so the deadline stays representable.
const MAX_READ_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Serves exactly one request on one accepted connection, then closes it.
///
/// Reading the head and body shares a single deadline of `timeout` from the
/// moment processing starts, so a client trickling bytes cannot extend it.
/// Each response write gets its own `timeout`.
#[derive(Debug)]
pub struct HttpConnection<R, W> {
    framed_read: FramedRead<R, RequestDecoder>,
    writer: ResponseWriter<W>,
    info: ConnectionInfo,
    timeout: Duration,
    memory_max: u64,
}

impl<R, W> HttpConnection<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, info: ConnectionInfo, timeout: Duration) -> Self {
        Self {
            framed_read: FramedRead::with_capacity(reader, RequestDecoder::new(), READ_BUFFER_SIZE),
            writer: ResponseWriter::new(writer, timeout),
            info,
            timeout,
            memory_max: DEFAULT_MEMORY_MAX,
        }
    }

    /// Overrides the in-memory threshold for request bodies.
    pub fn with_memory_max(mut self, memory_max: u64) -> Self {
        self.memory_max = memory_max;
        self
    }

    /// Reads the request, calls `app`, writes the response and shuts the connection down.
    ///
    /// The write half is shut down whatever the outcome; errors only describe
    /// why this one connection ended.
    pub async fn process<A>(mut self, app: &A) -> Result<(), HttpError>
    where
        A: Application,
    {
        let deadline = Instant::now() + self.timeout.min(MAX_READ_TIMEOUT);
        let result = self.serve(app, deadline).await;

        if let Err(e) = self.writer.shutdown().await {
            trace!(cause = %e, "shutdown after response failed");
        }
        result
    }

    async fn serve<A>(&mut self, app: &A, deadline: Instant) -> Result<(), HttpError>
    where
        A: Application,
    {
        let (header, payload_size) = match self.read_head(deadline).await {
            Ok(Some(head)) => head,
            Ok(None) => {
                debug!("peer closed before sending a request");
                return Ok(());
            }
            Err(e) => {
                if matches!(e, ParseError::TooLargeHeader { .. } | ParseError::TooManyHeaders { .. }) {
                    let _ = self.writer.write_raw(BAD_REQUEST).await;
                }
                return Err(e.into());
            }
        };
        debug!(method = %header.method(), uri = %header.uri(), "request received");

        self.handle_expectation(&header).await?;

        let mut fields = RequestFields::from_header(&header, &self.info)?;

        if let Some(body) = self.read_body(payload_size, deadline).await? {
            if payload_size.is_chunked() {
                fields.insert(keys::CONTENT_LENGTH, body.size().to_string());
                fields.remove(keys::HTTP_TRANSFER_ENCODING);
            }
            fields.set_input(body.rewind().map_err(ParseError::io)?);
        }

        let response = match app.call(fields).await {
            Ok(response) => response,
            Err(e) => {
                let e: Box<dyn Error + Send + Sync> = e.into();
                error!(cause = %e, "application failed, responding 500");
                internal_error()
            }
        };

        self.send_response(response, header.version()).await
    }

    async fn handle_expectation(&mut self, header: &RequestHeader) -> Result<(), HttpError> {
        let Some(expect) = header.expectation() else {
            return Ok(());
        };

        if expect.eq_ignore_ascii_case(b"100-continue") {
            self.writer.write_raw(CONTINUE).await?;
            trace!("sent 100 continue");
            return Ok(());
        }

        let value = String::from_utf8_lossy(expect).into_owned();
        warn!(expect = %value, "unsupported expectation");
        let _ = self.writer.write_raw(EXPECTATION_FAILED).await;
        Err(ParseError::expectation_failed(value).into())
    }

    async fn next_message(&mut self, deadline: Instant) -> Result<Option<Message<(RequestHeader, PayloadSize)>>, ParseError> {
        match timeout_at(deadline, self.framed_read.next()).await {
            Ok(Some(Ok(message))) => Ok(Some(message)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(ParseError::Timeout),
        }
    }

    async fn read_head(&mut self, deadline: Instant) -> Result<Option<(RequestHeader, PayloadSize)>, ParseError> {
        match self.next_message(deadline).await? {
            Some(Message::Header(head)) => Ok(Some(head)),
            Some(Message::Payload(_)) => Err(ParseError::invalid_body("payload received before request head")),
            None => Ok(None),
        }
    }

    /// Reads the whole body into a [`BufferedBody`]; `None` when the request has none.
    async fn read_body(&mut self, payload_size: PayloadSize, deadline: Instant) -> Result<Option<BufferedBody>, ParseError> {
        let declared = match payload_size {
            PayloadSize::Empty => return Ok(None),
            PayloadSize::Length(n) => n,
            PayloadSize::Chunked => 0,
        };

        let mut body = BufferedBody::with_length(declared, self.memory_max).map_err(ParseError::io)?;
        match self.fill_body(&mut body, deadline).await {
            Ok(()) => {
                trace!(size = body.size(), on_disk = body.is_on_disk(), "request body buffered");
                Ok(Some(body))
            }
            Err(e) => {
                if let Err(release_err) = body.release() {
                    warn!(cause = %release_err, "failed to release request body");
                }
                Err(e)
            }
        }
    }

    async fn fill_body(&mut self, body: &mut BufferedBody, deadline: Instant) -> Result<(), ParseError> {
        loop {
            match self.next_message(deadline).await? {
                Some(Message::Payload(PayloadItem::Chunk(bytes))) => body.write(&bytes)?,
                Some(Message::Payload(PayloadItem::Eof)) => return Ok(()),
                Some(Message::Header(_)) => return Err(ParseError::invalid_body("request head received inside body")),
                None => return Err(ParseError::ConnectionClosed),
            }
        }
    }

    async fn send_response(&mut self, response: Response<ResponseBody>, version: Version) -> Result<(), HttpError> {
        let (mut parts, body) = response.into_parts();
        parts.version = version;
        let status = parts.status;
        let (kind, on_close) = body.into_parts();

        let result = self.write_response(ResponseHead::from_parts(parts, ()), kind).await;

        if let Some(on_close) = on_close {
            on_close();
        }

        match &result {
            Ok(()) => debug!(status = status.as_u16(), "response written"),
            Err(e) => debug!(status = status.as_u16(), cause = %e, "response aborted"),
        }
        result
    }

    async fn write_response(&mut self, head: ResponseHead, kind: BodyKind) -> Result<(), HttpError> {
        self.writer.write_head(head)?;

        match kind {
            BodyKind::Chunks(chunks) => {
                for bytes in chunks.into_iter().filter_map(|chunk| chunk.into_bytes()) {
                    self.writer.write_chunk(bytes).await?;
                }
            }
            BodyKind::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    if let Some(bytes) = chunk.into_bytes() {
                        self.writer.write_chunk(bytes).await?;
                        self.writer.flush().await?;
                    }
                }
            }
        }

        self.writer.flush().await?;
        Ok(())
    }
}

fn internal_error() -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
