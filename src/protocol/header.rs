//! Typed RTSP header block
//!
//! Header names are canonicalized on insertion so lookups and output are
//! deterministic regardless of the casing a peer sends. A few RTSP names
//! do not follow HTTP title-casing and are special-cased.

use std::collections::btree_map::{BTreeMap, Entry};

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::protocol::{expect_byte, read_until_limited};

const MAX_ENTRY_COUNT: usize = 255;
const MAX_KEY_LENGTH: usize = 512;
const MAX_VALUE_LENGTH: usize = 2048;

/// Canonicalize a header name.
///
/// Standard HTTP title-casing, with fixed overrides for the RTSP names
/// that break the pattern. Names containing non-token characters are
/// returned unchanged.
pub fn canonical_key(name: &str) -> String {
    match name.to_ascii_lowercase().as_str() {
        "rtp-info" => return "RTP-Info".to_string(),
        "www-authenticate" => return "WWW-Authenticate".to_string(),
        "cseq" => return "CSeq".to_string(),
        _ => {}
    }

    if !name.bytes().all(is_token_byte) {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for b in name.bytes() {
        if upper {
            out.push(b.to_ascii_uppercase() as char);
        } else {
            out.push(b.to_ascii_lowercase() as char);
        }
        upper = b == b'-';
    }
    out
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-!#$%&'*+.^_`|~".contains(&b)
}

/// Ordered map from canonical header name to one or more values.
///
/// Repeated headers keep their values in arrival order. Iteration and
/// encoding are in ascending lexicographic order of the canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: BTreeMap<String, Vec<String>>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(canonical_key(name), vec![value.into()]);
    }

    /// Append a value, keeping any existing ones.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        match self.entries.entry(canonical_key(name)) {
            Entry::Vacant(e) => {
                e.insert(vec![value.into()]);
            }
            Entry::Occupied(mut e) => e.get_mut().push(value.into()),
        }
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&canonical_key(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&canonical_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&canonical_key(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&canonical_key(name))
    }

    /// Copy all values for `name` from another map, if present there.
    pub fn echo(&mut self, name: &str, from: &HeaderMap) {
        let values = from.get_all(name);
        if !values.is_empty() {
            self.entries
                .insert(canonical_key(name), values.to_vec());
        }
    }

    /// Read a header block: `name ":" OWS value CRLF` lines terminated by
    /// a bare CRLF. Enforces the entry-count and key/value size limits;
    /// exceeding any of them fails the whole parse.
    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        let mut count = 0usize;

        loop {
            let b = r.read_u8().await?;
            if b == b'\r' {
                expect_byte(r, b'\n').await?;
                break;
            }

            if count >= MAX_ENTRY_COUNT {
                return Err(Error::Malformed(format!(
                    "header count exceeds {}",
                    MAX_ENTRY_COUNT
                )));
            }

            let mut key = vec![b];
            key.extend(read_until_limited(r, b':', MAX_KEY_LENGTH).await?);
            let key = String::from_utf8(key)
                .map_err(|_| Error::Malformed("header name is not valid UTF-8".into()))?;

            // skip the run of spaces after the colon; trailing whitespace
            // inside the value is preserved
            let mut first = r.read_u8().await?;
            while first == b' ' {
                first = r.read_u8().await?;
            }

            let mut value = Vec::new();
            if first != b'\r' {
                value.push(first);
                value.extend(read_until_limited(r, b'\r', MAX_VALUE_LENGTH).await?);
            }
            expect_byte(r, b'\n').await?;

            let value = String::from_utf8(value)
                .map_err(|_| Error::Malformed("header value is not valid UTF-8".into()))?;

            map.append(&key, value);
            count += 1;
        }

        Ok(map)
    }

    /// Encode the block, terminated by a bare CRLF. Only non-empty
    /// canonical names are emitted, in ascending order.
    pub fn encode(&self, buf: &mut BytesMut) {
        for (key, values) in &self.entries {
            if key.is_empty() {
                continue;
            }
            for value in values {
                buf.put_slice(key.as_bytes());
                buf.put_slice(b": ");
                buf.put_slice(value.as_bytes());
                buf.put_slice(b"\r\n");
            }
        }
        buf.put_slice(b"\r\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("cseq"), "CSeq");
        assert_eq!(canonical_key("CSEQ"), "CSeq");
        assert_eq!(canonical_key("rtp-info"), "RTP-Info");
        assert_eq!(canonical_key("WWW-AUTHENTICATE"), "WWW-Authenticate");
        assert_eq!(canonical_key("content-length"), "Content-Length");
        assert_eq!(canonical_key("user-agent"), "User-Agent");
        // non-token bytes leave the name untouched
        assert_eq!(canonical_key("bad key"), "bad key");
    }

    #[tokio::test]
    async fn test_read_basic() {
        let mut input: &[u8] = b"CSeq: 1\r\nuser-agent:   t\r\n\r\n";
        let h = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(h.get("CSeq"), Some("1"));
        assert_eq!(h.get("User-Agent"), Some("t"));
        assert_eq!(h.len(), 2);
    }

    #[tokio::test]
    async fn test_read_preserves_trailing_whitespace() {
        let mut input: &[u8] = b"X-Pad: value  \r\n\r\n";
        let h = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(h.get("X-Pad"), Some("value  "));
    }

    #[tokio::test]
    async fn test_read_empty_value() {
        let mut input: &[u8] = b"X-Empty:\r\n\r\n";
        let h = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(h.get("X-Empty"), Some(""));
    }

    #[tokio::test]
    async fn test_read_repeated_values_keep_order() {
        let mut input: &[u8] = b"Via: a\r\nVia: b\r\n\r\n";
        let h = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(h.get_all("Via"), &["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_read_key_at_limit() {
        let key = "X".repeat(MAX_KEY_LENGTH);
        let raw = format!("{}: v\r\n\r\n", key).into_bytes();
        let mut input: &[u8] = &raw;
        let h = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(h.get(&key), Some("v"));
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_key() {
        let key = "X".repeat(MAX_KEY_LENGTH + 1);
        let raw = format!("{}: v\r\n\r\n", key).into_bytes();
        let mut input: &[u8] = &raw;
        assert!(HeaderMap::read(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_value() {
        let mut raw = b"X-Big: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(MAX_VALUE_LENGTH + 1));
        raw.extend_from_slice(b"\r\n\r\n");
        let mut input: &[u8] = &raw;
        assert!(HeaderMap::read(&mut input).await.is_err());
    }

    #[tokio::test]
    async fn test_read_rejects_too_many_entries() {
        let mut raw = Vec::new();
        for i in 0..=MAX_ENTRY_COUNT {
            raw.extend_from_slice(format!("X-{}: v\r\n", i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");
        let mut input: &[u8] = &raw;
        assert!(HeaderMap::read(&mut input).await.is_err());
    }

    #[test]
    fn test_encode_sorted() {
        let mut h = HeaderMap::new();
        h.set("User-Agent", "t");
        h.set("CSeq", "2");
        h.set("Session", "abc");

        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        assert_eq!(&buf[..], b"CSeq: 2\r\nSession: abc\r\nUser-Agent: t\r\n\r\n");
    }

    #[tokio::test]
    async fn test_round_trip() {
        let mut h = HeaderMap::new();
        h.set("CSeq", "7");
        h.append("Public", "OPTIONS, DESCRIBE");
        h.set("Session", "xyz");

        let mut buf = BytesMut::new();
        h.encode(&mut buf);

        let mut input: &[u8] = &buf;
        let parsed = HeaderMap::read(&mut input).await.unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn test_echo() {
        let mut req = HeaderMap::new();
        req.set("cseq", "3");

        let mut res = HeaderMap::new();
        res.echo("CSeq", &req);
        res.echo("Session", &req);
        assert_eq!(res.get("CSeq"), Some("3"));
        assert!(!res.contains("Session"));
    }
}
