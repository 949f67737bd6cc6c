//! Response head serialization.
//!
//! The status line uses the version recorded on the head. Application headers
//! are copied through except `Connection`, which is always replaced by
//! `Connection: close`. `Date` and `Server` are synthesized when absent.

use std::io::{self, Write};

use bytes::{BufMut, BytesMut};
use http::{Version, header};
use tokio_util::codec::Encoder;

use crate::protocol::{ResponseHead, SendError, reason_phrase};

/// Value of the synthesized `Server` header.
pub const DEFAULT_SERVER: &str = "prefork-http";

const INIT_HEADER_SIZE: usize = 1024;

#[derive(Debug, Default, Clone, Copy)]
pub struct HeaderEncoder;

impl Encoder<ResponseHead> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, head: ResponseHead, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(INIT_HEADER_SIZE);

        let version = match head.version() {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };
        let status = head.status();
        write!(BufWriter(dst), "{} {} {}\r\n", version, status.as_str(), reason_phrase(status))?;

        let headers = head.headers();
        for (name, value) in headers.iter() {
            if name == header::CONNECTION {
                continue;
            }
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }

        dst.put_slice(b"Connection: close\r\n");

        if !headers.contains_key(header::DATE) {
            let mut date = faf_http_date::get_date_buff_no_key();
            faf_http_date::get_date_no_key(&mut date);
            dst.put_slice(b"Date: ");
            dst.put_slice(&date[..]);
            dst.put_slice(b"\r\n");
        }

        if !headers.contains_key(header::SERVER) {
            dst.put_slice(b"Server: ");
            dst.put_slice(DEFAULT_SERVER.as_bytes());
            dst.put_slice(b"\r\n");
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

struct BufWriter<'a>(&'a mut BytesMut);

impl Write for BufWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{Response, StatusCode};

    fn encode(head: ResponseHead) -> String {
        let mut dst = BytesMut::new();
        HeaderEncoder.encode(head, &mut dst).unwrap();
        String::from_utf8(dst.to_vec()).unwrap()
    }

    #[test]
    fn synthesizes_connection_date_and_server() {
        let head = Response::builder().status(StatusCode::OK).header("Content-Type", "text/plain").body(()).unwrap();
        let text = encode(head);

        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
        assert!(text.contains("content-type: text/plain\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("Date: "));
        assert!(text.contains("Server: prefork-http\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn application_connection_header_is_replaced() {
        let head = Response::builder().header("Connection", "keep-alive").body(()).unwrap();
        let text = encode(head);

        assert!(!text.to_ascii_lowercase().contains("keep-alive"));
        assert_eq!(text.matches("Connection: close").count(), 1);
    }

    #[test]
    fn supplied_date_and_server_are_not_duplicated() {
        let head = Response::builder()
            .header("Date", "Sun, 06 Nov 1994 08:49:37 GMT")
            .header("Server", "custom")
            .body(())
            .unwrap();
        let text = encode(head).to_ascii_lowercase();

        assert_eq!(text.matches("date:").count(), 1);
        assert_eq!(text.matches("server:").count(), 1);
        assert!(text.contains("server: custom\r\n"));
    }

    #[test]
    fn status_line_follows_request_version() {
        let head = Response::builder().status(StatusCode::NOT_FOUND).version(Version::HTTP_10).body(()).unwrap();
        assert!(encode(head).starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn repeated_headers_become_repeated_lines() {
        let head = Response::builder().header("Set-Cookie", "a=1").header("Set-Cookie", "b=2").body(()).unwrap();
        let text = encode(head);
        assert!(text.contains("set-cookie: a=1\r\nset-cookie: b=2\r\n"));
    }

    #[test]
    fn unknown_status_uses_class_phrase() {
        let head = Response::builder().status(StatusCode::from_u16(299).unwrap()).body(()).unwrap();
        assert!(encode(head).starts_with("HTTP/1.1 299 Success\r\n"));
    }
}
