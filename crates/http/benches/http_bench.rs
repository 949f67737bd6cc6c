use std::hint::black_box;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use criterion::{Criterion, criterion_group, criterion_main};
use http::Response;
use prefork_http::codec::{HeaderEncoder, RequestDecoder};
use prefork_http::connection::HttpConnection;
use prefork_http::handler::make_application;
use prefork_http::protocol::{ConnectionInfo, Message, PayloadItem, RequestFields, ResponseBody};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_util::codec::{Decoder, Encoder};

/// Serves `read_data` to the reader and discards everything written.
struct MockIO {
    read_data: &'static [u8],
    read_pos: usize,
}

impl MockIO {
    fn new(read_data: &'static [u8]) -> Self {
        Self { read_data, read_pos: 0 }
    }
}

impl AsyncRead for MockIO {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.read_data[self.read_pos..];
        let amt = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..amt]);
        self.read_pos += amt;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockIO {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const SIMPLE_GET: &[u8] = b"GET /index.html?q=1 HTTP/1.1\r\nHost: localhost\r\nUser-Agent: bench\r\nAccept: */*\r\n\r\n";
const CHUNKED_POST: &[u8] = b"POST /upload HTTP/1.1\r\nHost: localhost\r\nTransfer-Encoding: chunked\r\n\r\n\
    10\r\n0123456789abcdef\r\n10\r\n0123456789abcdef\r\n0\r\n\r\n";

fn drain(request: &[u8]) {
    let mut decoder = RequestDecoder::new();
    let mut bytes = BytesMut::from(request);
    while let Some(message) = decoder.decode(&mut bytes).unwrap() {
        if let Message::Payload(PayloadItem::Eof) = message {
            break;
        }
        black_box(message);
    }
}

fn bench_request_decoder(c: &mut Criterion) {
    c.bench_function("decode_simple_get", |b| b.iter(|| drain(black_box(SIMPLE_GET))));
    c.bench_function("decode_chunked_post", |b| b.iter(|| drain(black_box(CHUNKED_POST))));
}

fn bench_header_encoder(c: &mut Criterion) {
    c.bench_function("encode_response_head", |b| {
        b.iter(|| {
            let head = Response::builder().header("Content-Type", "text/plain").body(()).unwrap();
            let mut dst = BytesMut::new();
            HeaderEncoder.encode(head, &mut dst).unwrap();
            black_box(dst);
        });
    });
}

async fn hello(_req: RequestFields) -> Result<Response<ResponseBody>, io::Error> {
    Ok(Response::new(ResponseBody::from("Hello World!")))
}

fn bench_http_connection(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    let app = make_application(hello);

    c.bench_function("process_simple_get", |b| {
        b.to_async(&runtime).iter(|| async {
            let info = ConnectionInfo::new("127.0.0.1", 9292);
            let connection =
                HttpConnection::new(MockIO::new(SIMPLE_GET), MockIO::new(b""), info, Duration::from_secs(5));
            black_box(connection.process(&app).await.unwrap());
        });
    });
}

criterion_group!(benches, bench_request_decoder, bench_header_encoder, bench_http_connection);
criterion_main!(benches);
