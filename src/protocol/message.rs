//! RTSP request and response messages
//!
//! A message is a start line, a header block and an optional body whose
//! length comes from `Content-Length`. The protocol token must be exactly
//! `RTSP/1.0`.

use std::fmt;
use std::str::FromStr;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{expect_byte, read_until_limited, HeaderMap};

/// RTSP protocol version token.
pub const RTSP_PROTOCOL_10: &str = "RTSP/1.0";

const MAX_METHOD_LENGTH: usize = 64;
const MAX_URI_LENGTH: usize = 2048;
const MAX_PROTOCOL_LENGTH: usize = 64;
const MAX_RESPONSE_PROTOCOL_LENGTH: usize = 255;
const MAX_STATUS_LENGTH: usize = 4;
const MAX_REASON_LENGTH: usize = 255;

/// RTSP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Announce,
    Describe,
    GetParameter,
    Options,
    Pause,
    Play,
    Record,
    Setup,
    SetParameter,
    Teardown,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Announce => "ANNOUNCE",
            Method::Describe => "DESCRIBE",
            Method::GetParameter => "GET_PARAMETER",
            Method::Options => "OPTIONS",
            Method::Pause => "PAUSE",
            Method::Play => "PLAY",
            Method::Record => "RECORD",
            Method::Setup => "SETUP",
            Method::SetParameter => "SET_PARAMETER",
            Method::Teardown => "TEARDOWN",
        }
    }

    /// All methods, in the order they are advertised in `Public`.
    pub const ALL: [Method; 10] = [
        Method::Describe,
        Method::Setup,
        Method::Teardown,
        Method::Play,
        Method::Pause,
        Method::Options,
        Method::Announce,
        Method::Record,
        Method::GetParameter,
        Method::SetParameter,
    ];
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ANNOUNCE" => Ok(Method::Announce),
            "DESCRIBE" => Ok(Method::Describe),
            "GET_PARAMETER" => Ok(Method::GetParameter),
            "OPTIONS" => Ok(Method::Options),
            "PAUSE" => Ok(Method::Pause),
            "PLAY" => Ok(Method::Play),
            "RECORD" => Ok(Method::Record),
            "SETUP" => Ok(Method::Setup),
            "SET_PARAMETER" => Ok(Method::SetParameter),
            "TEARDOWN" => Ok(Method::Teardown),
            other => Err(Error::Protocol(format!("unsupported method '{}'", other))),
        }
    }
}

/// Numeric RTSP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const METHOD_NOT_ALLOWED: StatusCode = StatusCode(405);
    pub const NOT_ACCEPTABLE: StatusCode = StatusCode(406);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const SESSION_NOT_FOUND: StatusCode = StatusCode(454);
    pub const METHOD_NOT_VALID_IN_THIS_STATE: StatusCode = StatusCode(455);
    pub const UNSUPPORTED_TRANSPORT: StatusCode = StatusCode(461);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);
    pub const RTSP_VERSION_NOT_SUPPORTED: StatusCode = StatusCode(505);
    pub const OPTION_NOT_SUPPORTED: StatusCode = StatusCode(551);

    /// Default reason phrase for this code, if it is a known one.
    pub fn reason(&self) -> Option<&'static str> {
        Some(match self.0 {
            100 => "Continue",
            200 => "OK",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            305 => "Use Proxy",
            400 => "Bad Request",
            401 => "Unauthorized",
            402 => "Payment Required",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            406 => "Not Acceptable",
            407 => "Proxy Auth Required",
            408 => "Request Timeout",
            410 => "Gone",
            412 => "Precondition Failed",
            413 => "Request Entity Too Large",
            414 => "Request URI Too Long",
            415 => "Unsupported Media Type",
            451 => "Parameter Not Understood",
            453 => "Not Enough Bandwidth",
            454 => "Session Not Found",
            455 => "Method Not Valid In This State",
            456 => "Header Field Not Valid for Resource",
            457 => "Invalid Range",
            458 => "Parameter Is Read-Only",
            459 => "Aggregate Operation Not Allowed",
            460 => "Only Aggregate Operation Allowed",
            461 => "Unsupported Transport",
            462 => "Destination Unreachable",
            463 => "Destination Prohibited",
            464 => "Data Transport Not Ready Yet",
            465 => "Notification Reason Unknown",
            466 => "Key Management Error",
            470 => "Connection Authorization Required",
            471 => "Connection Credentials Not Accepted",
            472 => "Failure to Establish Secure Connection",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "RTSP Version Not Supported",
            551 => "Option Not Supported",
            553 => "Proxy Unavailable",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// RTSP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub header: HeaderMap,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            header: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Read a request from the stream.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Request> {
        let first = r.read_u8().await?;
        Self::read_after(r, first).await
    }

    /// Read a request whose first byte was already consumed by the
    /// interleaved demultiplexer.
    pub async fn read_after<R: AsyncRead + Unpin>(r: &mut R, first: u8) -> Result<Request> {
        let mut method = vec![first];
        method.extend(read_until_limited(r, b' ', MAX_METHOD_LENGTH).await?);
        let method = std::str::from_utf8(&method)
            .map_err(|_| Error::Malformed("method is not valid UTF-8".into()))?
            .parse::<Method>()?;

        let raw_url = read_until_limited(r, b' ', MAX_URI_LENGTH).await?;
        let raw_url = std::str::from_utf8(&raw_url)
            .map_err(|_| Error::Malformed("request URI is not valid UTF-8".into()))?;
        let url = Url::parse(raw_url)
            .map_err(|e| Error::Malformed(format!("invalid request URI '{}': {}", raw_url, e)))?;

        let proto = read_until_limited(r, b'\r', MAX_PROTOCOL_LENGTH).await?;
        if proto != RTSP_PROTOCOL_10.as_bytes() {
            return Err(Error::Protocol(format!(
                "expected '{}', got '{}'",
                RTSP_PROTOCOL_10,
                String::from_utf8_lossy(&proto)
            )));
        }
        expect_byte(r, b'\n').await?;

        let header = HeaderMap::read(r).await?;
        let body = read_body(r, &header).await?;

        Ok(Request {
            method,
            url,
            header,
            body,
        })
    }

    /// Encode into a buffer, setting `Content-Length` iff a body is present.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(self.method.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.url.as_str().as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(RTSP_PROTOCOL_10.as_bytes());
        buf.put_slice(b"\r\n");
        encode_header_and_body(&self.header, &self.body, buf);
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

/// RTSP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    /// Reason phrase; when empty, the default for the status code is
    /// emitted on write.
    pub reason: String,
    pub header: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: String::new(),
            header: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Read a response from the stream.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Response> {
        let first = r.read_u8().await?;
        Self::read_after(r, first).await
    }

    /// Read a response whose first byte was already consumed.
    pub async fn read_after<R: AsyncRead + Unpin>(r: &mut R, first: u8) -> Result<Response> {
        let mut proto = vec![first];
        proto.extend(read_until_limited(r, b' ', MAX_RESPONSE_PROTOCOL_LENGTH).await?);
        if proto != RTSP_PROTOCOL_10.as_bytes() {
            return Err(Error::Protocol(format!(
                "expected '{}', got '{}'",
                RTSP_PROTOCOL_10,
                String::from_utf8_lossy(&proto)
            )));
        }

        let status = read_until_limited(r, b' ', MAX_STATUS_LENGTH).await?;
        if status.len() != 3 || !status.iter().all(u8::is_ascii_digit) {
            return Err(Error::Malformed(format!(
                "status code '{}' is not 3 digits",
                String::from_utf8_lossy(&status)
            )));
        }
        let status = StatusCode(
            status
                .iter()
                .fold(0u16, |code, b| code * 10 + u16::from(b - b'0')),
        );

        let reason = read_until_limited(r, b'\r', MAX_REASON_LENGTH).await?;
        let reason = String::from_utf8(reason)
            .map_err(|_| Error::Malformed("reason phrase is not valid UTF-8".into()))?;
        if reason.is_empty() {
            return Err(Error::Malformed("empty reason phrase".into()));
        }
        expect_byte(r, b'\n').await?;

        let header = HeaderMap::read(r).await?;
        let body = read_body(r, &header).await?;

        Ok(Response {
            status,
            reason,
            header,
            body,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(RTSP_PROTOCOL_10.as_bytes());
        buf.put_u8(b' ');
        buf.put_slice(self.status.to_string().as_bytes());
        buf.put_u8(b' ');
        if self.reason.is_empty() {
            buf.put_slice(self.status.reason().unwrap_or("Unknown").as_bytes());
        } else {
            buf.put_slice(self.reason.as_bytes());
        }
        buf.put_slice(b"\r\n");
        encode_header_and_body(&self.header, &self.body, buf);
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        w.write_all(&buf).await?;
        w.flush().await?;
        Ok(())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        f.write_str(&String::from_utf8_lossy(&buf))
    }
}

fn encode_header_and_body(header: &HeaderMap, body: &Bytes, buf: &mut BytesMut) {
    if body.is_empty() {
        header.encode(buf);
    } else {
        let mut header = header.clone();
        header.set("Content-Length", body.len().to_string());
        header.encode(buf);
        buf.put_slice(body);
    }
}

async fn read_body<R: AsyncRead + Unpin>(r: &mut R, header: &HeaderMap) -> Result<Bytes> {
    let len = match header.get("Content-Length") {
        Some(v) => v
            .trim()
            .parse::<usize>()
            .map_err(|_| Error::Malformed(format!("invalid Content-Length '{}'", v)))?,
        None => return Ok(Bytes::new()),
    };
    if len == 0 {
        return Ok(Bytes::new());
    }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body).await?;
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_request() {
        let mut input: &[u8] =
            b"OPTIONS rtsp://example/stream RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: t\r\n\r\n";
        let req = Request::read(&mut input).await.unwrap();
        assert_eq!(req.method, Method::Options);
        assert_eq!(req.url.path(), "/stream");
        assert_eq!(req.header.get("CSeq"), Some("1"));
        assert_eq!(req.header.get("User-Agent"), Some("t"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let raw = b"OPTIONS rtsp://example/stream RTSP/1.0\r\nCSeq: 1\r\nUser-Agent: t\r\n\r\n";
        let mut input: &[u8] = raw;
        let req = Request::read(&mut input).await.unwrap();

        let mut buf = BytesMut::new();
        req.encode(&mut buf);
        assert_eq!(&buf[..], raw);
    }

    #[tokio::test]
    async fn test_read_request_with_body() {
        let mut input: &[u8] = b"ANNOUNCE rtsp://h/s RTSP/1.0\r\nCSeq: 2\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let req = Request::read(&mut input).await.unwrap();
        assert_eq!(req.method, Method::Announce);
        assert_eq!(&req.body[..], b"v=0\r\n");
    }

    #[tokio::test]
    async fn test_read_request_wrong_protocol() {
        let mut input: &[u8] = b"OPTIONS rtsp://h/s RTSP/2.0\r\n\r\n";
        let err = Request::read(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_request_unknown_method() {
        let mut input: &[u8] = b"FETCH rtsp://h/s RTSP/1.0\r\n\r\n";
        let err = Request::read(&mut input).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_response() {
        let mut input: &[u8] =
            b"RTSP/1.0 200 OK\r\nCSeq: 1\r\nSession: ab12\r\nContent-Length: 3\r\n\r\nxyz";
        let res = Response::read(&mut input).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.reason, "OK");
        assert_eq!(res.header.get("Session"), Some("ab12"));
        assert_eq!(&res.body[..], b"xyz");
    }

    #[tokio::test]
    async fn test_read_response_bad_status() {
        let mut input: &[u8] = b"RTSP/1.0 20x Bad\r\n\r\n";
        assert!(Response::read(&mut input).await.is_err());

        let mut input: &[u8] = b"RTSP/1.0 2000 Bad\r\n\r\n";
        assert!(Response::read(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_read_response_empty_reason() {
        let mut input: &[u8] = b"RTSP/1.0 200 \r\n\r\n";
        assert!(Response::read(&mut input).await.is_err());
    }

    #[test]
    fn test_response_default_reason() {
        let mut res = Response::new(StatusCode::NOT_FOUND);
        res.header.set("CSeq", "4");
        let mut buf = BytesMut::new();
        res.encode(&mut buf);
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("RTSP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn test_content_length_matches_body() {
        let res = Response::new(StatusCode::OK).with_body(&b"v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\n"[..]);
        let mut buf = BytesMut::new();
        res.encode(&mut buf);
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains(&format!("Content-Length: {}\r\n", res.body.len())));
        // no trailing CRLF after the body
        assert!(buf.ends_with(b"0.0.0.0\r\n"));
        assert!(!buf.ends_with(b"0.0.0.0\r\n\r\n"));
    }

    #[test]
    fn test_method_strings() {
        for m in Method::ALL {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), m);
        }
        assert!("GET".parse::<Method>().is_err());
    }

    #[test]
    fn test_status_reason_table() {
        assert_eq!(StatusCode::OK.reason(), Some("OK"));
        assert_eq!(StatusCode(461).reason(), Some("Unsupported Transport"));
        assert_eq!(StatusCode(599).reason(), None);
    }
}
