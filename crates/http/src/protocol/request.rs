//! Request head and the canonical field map handed to applications.
//!
//! The decoder produces a [`RequestHeader`] (a bodyless `http::Request`). The
//! connection engine folds it, together with the [`ConnectionInfo`] of the
//! accepted socket, into [`RequestFields`]: a CGI-style string map plus the
//! rewound request body.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use http::request::Parts;
use http::{HeaderMap, Method, Request, Uri, Version, header};

use crate::protocol::ParseError;
use crate::protocol::body::RequestInput;

/// Canonical keys present in every [`RequestFields`].
pub mod keys {
    pub const REQUEST_METHOD: &str = "REQUEST_METHOD";
    pub const REQUEST_URI: &str = "REQUEST_URI";
    pub const SCRIPT_NAME: &str = "SCRIPT_NAME";
    pub const PATH_INFO: &str = "PATH_INFO";
    pub const QUERY_STRING: &str = "QUERY_STRING";
    pub const SERVER_PROTOCOL: &str = "SERVER_PROTOCOL";
    pub const SERVER_NAME: &str = "SERVER_NAME";
    pub const SERVER_PORT: &str = "SERVER_PORT";
    pub const REMOTE_ADDR: &str = "REMOTE_ADDR";
    pub const REMOTE_PORT: &str = "REMOTE_PORT";
    pub const CONTENT_LENGTH: &str = "CONTENT_LENGTH";
    pub const CONTENT_TYPE: &str = "CONTENT_TYPE";
    pub const HTTP_TRANSFER_ENCODING: &str = "HTTP_TRANSFER_ENCODING";
}

/// The decoded request line and header block.
#[derive(Debug)]
pub struct RequestHeader {
    inner: Request<()>,
}

impl RequestHeader {
    pub fn into_inner(self) -> Request<()> {
        self.inner
    }

    pub fn method(&self) -> &Method {
        self.inner.method()
    }

    pub fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    pub fn version(&self) -> Version {
        self.inner.version()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The `Expect` header value, if the client sent one.
    pub fn expectation(&self) -> Option<&[u8]> {
        self.headers().get(header::EXPECT).map(|value| value.as_bytes())
    }
}

impl From<Parts> for RequestHeader {
    #[inline]
    fn from(parts: Parts) -> Self {
        Self { inner: Request::from_parts(parts, ()) }
    }
}

impl From<Request<()>> for RequestHeader {
    #[inline]
    fn from(inner: Request<()>) -> Self {
        Self { inner }
    }
}

/// Identity of the listening and peer sockets for one accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub server_name: String,
    pub server_port: u16,
    /// `None` for Unix-domain peers.
    pub remote: Option<SocketAddr>,
}

impl ConnectionInfo {
    pub fn new(server_name: impl Into<String>, server_port: u16) -> Self {
        Self { server_name: server_name.into(), server_port, remote: None }
    }

    pub fn with_remote(mut self, remote: Option<SocketAddr>) -> Self {
        self.remote = remote;
        self
    }
}

/// Per-request view handed to the application.
///
/// `env` holds string-valued metadata under canonical keys (see [`keys`]); the
/// fixed flags and the body are exposed as typed accessors.
#[derive(Debug, Default)]
pub struct RequestFields {
    env: BTreeMap<String, String>,
    input: RequestInput,
}

impl RequestFields {
    /// Builds the field map for a decoded request head.
    ///
    /// Fails only when the path carries a malformed percent escape.
    pub fn from_header(header: &RequestHeader, info: &ConnectionInfo) -> Result<Self, ParseError> {
        let mut env = BTreeMap::new();
        let uri = header.uri();

        env.insert(keys::REQUEST_METHOD.to_string(), header.method().as_str().to_string());
        env.insert(keys::REQUEST_URI.to_string(), uri.to_string());
        env.insert(keys::SCRIPT_NAME.to_string(), String::new());
        env.insert(keys::PATH_INFO.to_string(), percent_decode(uri.path())?);
        env.insert(keys::QUERY_STRING.to_string(), uri.query().unwrap_or_default().to_string());
        env.insert(keys::SERVER_PROTOCOL.to_string(), protocol_name(header.version()).to_string());
        env.insert(keys::SERVER_NAME.to_string(), info.server_name.clone());
        env.insert(keys::SERVER_PORT.to_string(), info.server_port.to_string());

        let (remote_addr, remote_port) = match info.remote {
            Some(addr) => (addr.ip().to_string(), addr.port().to_string()),
            None => (String::new(), "0".to_string()),
        };
        env.insert(keys::REMOTE_ADDR.to_string(), remote_addr);
        env.insert(keys::REMOTE_PORT.to_string(), remote_port);

        let headers = header.headers();
        for name in headers.keys() {
            let joined = headers
                .get_all(name)
                .iter()
                .map(|value| String::from_utf8_lossy(value.as_bytes()))
                .collect::<Vec<_>>()
                .join(", ");
            env.insert(header_key(name.as_str()), joined);
        }

        Ok(Self { env, input: RequestInput::empty() })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.env.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.env.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.env.remove(key)
    }

    /// Iterates the string-valued fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn method(&self) -> &str {
        self.get(keys::REQUEST_METHOD).unwrap_or_default()
    }

    pub fn path_info(&self) -> &str {
        self.get(keys::PATH_INFO).unwrap_or_default()
    }

    pub fn query_string(&self) -> &str {
        self.get(keys::QUERY_STRING).unwrap_or_default()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get(keys::CONTENT_LENGTH).and_then(|value| value.trim().parse().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get(keys::CONTENT_TYPE)
    }

    pub fn url_scheme(&self) -> &'static str {
        "http"
    }

    pub fn multithread(&self) -> bool {
        false
    }

    pub fn multiprocess(&self) -> bool {
        true
    }

    pub fn run_once(&self) -> bool {
        false
    }

    /// The request body, positioned at its start when the application receives it.
    pub fn input(&mut self) -> &mut RequestInput {
        &mut self.input
    }

    pub fn into_input(self) -> RequestInput {
        self.input
    }

    pub(crate) fn set_input(&mut self, input: RequestInput) {
        self.input = input;
    }
}

fn protocol_name(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_09 => "HTTP/0.9",
        _ => "HTTP/1.1",
    }
}

/// `Content-Type` and `Content-Length` keep their bare names, everything else
/// becomes `HTTP_` + upper-cased name with `-` turned into `_`.
fn header_key(name: &str) -> String {
    if name.eq_ignore_ascii_case("content-type") {
        return keys::CONTENT_TYPE.to_string();
    }
    if name.eq_ignore_ascii_case("content-length") {
        return keys::CONTENT_LENGTH.to_string();
    }

    let mut key = String::with_capacity(name.len() + 5);
    key.push_str("HTTP_");
    key.extend(name.chars().map(|c| if c == '-' { '_' } else { c.to_ascii_uppercase() }));
    key
}

fn percent_decode(path: &str) -> Result<String, ParseError> {
    let bytes = path.as_bytes();
    if !bytes.contains(&b'%') {
        return Ok(path.to_string());
    }

    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).and_then(|b| hex_value(*b));
            let lo = bytes.get(i + 2).and_then(|b| hex_value(*b));
            match (hi, lo) {
                (Some(hi), Some(lo)) => decoded.push(hi << 4 | lo),
                _ => return Err(ParseError::invalid_path(format!("malformed percent escape in {path}"))),
            }
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn header_of(builder: http::request::Builder) -> RequestHeader {
        RequestHeader::from(builder.body(()).unwrap())
    }

    fn tcp_info() -> ConnectionInfo {
        ConnectionInfo::new("127.0.0.1", 9292).with_remote(Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 51234)))
    }

    #[test]
    fn builds_canonical_fields() {
        let header = header_of(
            Request::builder()
                .method(Method::GET)
                .uri("/foo%20bar/baz?a=1&b=2")
                .version(Version::HTTP_11)
                .header("Host", "127.0.0.1:9292")
                .header("User-Agent", "curl/8.0"),
        );

        let fields = RequestFields::from_header(&header, &tcp_info()).unwrap();

        assert_eq!(fields.method(), "GET");
        assert_eq!(fields.get(keys::REQUEST_URI), Some("/foo%20bar/baz?a=1&b=2"));
        assert_eq!(fields.path_info(), "/foo bar/baz");
        assert_eq!(fields.query_string(), "a=1&b=2");
        assert_eq!(fields.get(keys::SCRIPT_NAME), Some(""));
        assert_eq!(fields.get(keys::SERVER_PROTOCOL), Some("HTTP/1.1"));
        assert_eq!(fields.get(keys::SERVER_NAME), Some("127.0.0.1"));
        assert_eq!(fields.get(keys::SERVER_PORT), Some("9292"));
        assert_eq!(fields.get(keys::REMOTE_ADDR), Some("127.0.0.1"));
        assert_eq!(fields.get(keys::REMOTE_PORT), Some("51234"));
        assert_eq!(fields.get("HTTP_HOST"), Some("127.0.0.1:9292"));
        assert_eq!(fields.get("HTTP_USER_AGENT"), Some("curl/8.0"));
        assert_eq!(fields.url_scheme(), "http");
        assert!(fields.multiprocess());
        assert!(!fields.multithread());
        assert!(!fields.run_once());
    }

    #[test]
    fn content_headers_keep_bare_names() {
        let header = header_of(
            Request::builder()
                .method(Method::POST)
                .uri("/")
                .header("Content-Type", "application/x-www-form-urlencoded")
                .header("Content-Length", "23"),
        );

        let fields = RequestFields::from_header(&header, &tcp_info()).unwrap();

        assert_eq!(fields.content_type(), Some("application/x-www-form-urlencoded"));
        assert_eq!(fields.content_length(), Some(23));
        assert_eq!(fields.get("HTTP_CONTENT_TYPE"), None);
        assert_eq!(fields.get("HTTP_CONTENT_LENGTH"), None);
    }

    #[test]
    fn repeated_headers_are_joined() {
        let header = header_of(
            Request::builder().uri("/").header("X-Forwarded-For", "10.0.0.1").header("X-Forwarded-For", "10.0.0.2"),
        );

        let fields = RequestFields::from_header(&header, &tcp_info()).unwrap();
        assert_eq!(fields.get("HTTP_X_FORWARDED_FOR"), Some("10.0.0.1, 10.0.0.2"));
    }

    #[test]
    fn unix_peer_has_vacant_remote() {
        let header = header_of(Request::builder().uri("/"));
        let fields = RequestFields::from_header(&header, &ConnectionInfo::new("0.0.0.0", 0)).unwrap();

        assert_eq!(fields.get(keys::REMOTE_ADDR), Some(""));
        assert_eq!(fields.get(keys::REMOTE_PORT), Some("0"));
        assert_eq!(fields.get(keys::SERVER_PORT), Some("0"));
    }

    #[test]
    fn http10_protocol_name() {
        let header = header_of(Request::builder().uri("/").version(Version::HTTP_10));
        let fields = RequestFields::from_header(&header, &tcp_info()).unwrap();
        assert_eq!(fields.get(keys::SERVER_PROTOCOL), Some("HTTP/1.0"));
    }

    #[test]
    fn malformed_escape_is_rejected() {
        assert!(percent_decode("/a%2").is_err());
        assert!(percent_decode("/a%zz").is_err());
        assert_eq!(percent_decode("/a%2Fb").unwrap(), "/a/b");
        assert_eq!(percent_decode("/plain").unwrap(), "/plain");
    }

    #[test]
    fn header_key_folding() {
        assert_eq!(header_key("accept-encoding"), "HTTP_ACCEPT_ENCODING");
        assert_eq!(header_key("content-type"), "CONTENT_TYPE");
        assert_eq!(header_key("x-a"), "HTTP_X_A");
    }
}
