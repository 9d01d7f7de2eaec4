//! Basic and Digest authentication
//!
//! Covers all three flows: challenge issuance (server), Authorization
//! generation (client), and Authorization verification (server). Digest
//! responses are the RFC 2069 form:
//! `MD5(MD5(user:realm:pass) ":" nonce ":" MD5(method:uri))`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{Error, Result};
use crate::protocol::{HeaderMap, Method, Request};

/// Authentication scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Basic,
    Digest,
}

impl AuthMethod {
    fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Basic => "Basic",
            AuthMethod::Digest => "Digest",
        }
    }
}

/// Stored credentials a server verifies against.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Parsed `WWW-Authenticate` challenge or Digest `Authorization` value.
#[derive(Debug, Clone, Default)]
pub struct Authenticate {
    pub method: Option<AuthMethod>,
    pub username: Option<String>,
    pub realm: Option<String>,
    pub nonce: Option<String>,
    pub uri: Option<String>,
    pub response: Option<String>,
    pub opaque: Option<String>,
    pub stale: Option<String>,
    pub algorithm: Option<String>,
}

impl Authenticate {
    /// Parse a header value. Parameter values may be quoted or bare;
    /// commas inside quoted strings do not split parameters.
    pub fn parse(value: &str) -> Result<Authenticate> {
        let (method, rest) = value
            .split_once(' ')
            .ok_or_else(|| Error::Auth(format!("unable to split method from '{}'", value)))?;

        let method = match method {
            "Basic" => AuthMethod::Basic,
            "Digest" => AuthMethod::Digest,
            other => return Err(Error::Auth(format!("invalid auth method '{}'", other))),
        };

        let mut auth = Authenticate {
            method: Some(method),
            ..Default::default()
        };

        for part in split_quoted(rest, ',') {
            let Some((key, raw)) = part.split_once('=') else {
                continue;
            };
            let value = unquote(raw.trim()).to_string();
            match key.trim() {
                "username" => auth.username = Some(value),
                "realm" => auth.realm = Some(value),
                "nonce" => auth.nonce = Some(value),
                "uri" => auth.uri = Some(value),
                "response" => auth.response = Some(value),
                "opaque" => auth.opaque = Some(value),
                "stale" => auth.stale = Some(value),
                "algorithm" => auth.algorithm = Some(value),
                _ => {}
            }
        }

        Ok(auth)
    }

    /// Encode as a header value, quoting every emitted field.
    pub fn format(&self) -> String {
        let mut out = self
            .method
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        out.push(' ');

        let mut fields = Vec::new();
        let mut push = |name: &str, value: &Option<String>| {
            if let Some(v) = value {
                fields.push(format!("{}=\"{}\"", name, v));
            }
        };
        push("username", &self.username);
        push("realm", &self.realm);
        push("nonce", &self.nonce);
        push("uri", &self.uri);
        push("response", &self.response);
        push("opaque", &self.opaque);
        push("stale", &self.stale);
        push("algorithm", &self.algorithm);

        out.push_str(&fields.join(", "));
        out
    }
}

/// Split on `sep`, honoring double-quoted sections.
fn split_quoted(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in s.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c == sep && !in_quotes {
            parts.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Hex-encoded MD5 of a string.
pub fn md5_hex(data: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(data.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Digest response over the given request parameters.
pub fn digest_response(
    username: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    md5_hex(&format!(
        "{}:{}:{}",
        md5_hex(&format!("{}:{}:{}", username, realm, password)),
        nonce,
        md5_hex(&format!("{}:{}", method, uri))
    ))
}

/// Build a fresh Digest challenge for a 401 response.
pub fn challenge(realm: &str) -> Authenticate {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    Authenticate {
        method: Some(AuthMethod::Digest),
        realm: Some(realm.to_string()),
        nonce: Some(md5_hex(&token)),
        algorithm: Some("MD5".to_string()),
        ..Default::default()
    }
}

/// Verify an `Authorization` header value against stored credentials.
///
/// Digest responses are recomputed over the request's method and the URI
/// the client signed; Basic credentials are decoded and compared.
pub fn verify(creds: &Credentials, method: Method, authorization: &str) -> Result<()> {
    if let Some(token) = authorization.strip_prefix("Basic ") {
        let decoded = BASE64
            .decode(token.trim())
            .map_err(|_| Error::Auth("invalid Basic token".into()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| Error::Auth("Basic credentials are not valid UTF-8".into()))?;
        let (user, pass) = decoded
            .split_once(':')
            .ok_or_else(|| Error::Auth("Basic credentials missing ':'".into()))?;
        if user != creds.username || pass != creds.password {
            return Err(Error::Auth("credentials mismatch".into()));
        }
        return Ok(());
    }

    let auth = Authenticate::parse(authorization)?;
    if auth.method != Some(AuthMethod::Digest) {
        return Err(Error::Auth("expected Digest authorization".into()));
    }

    let realm = auth
        .realm
        .as_deref()
        .ok_or_else(|| Error::Auth("realm is missing".into()))?;
    let nonce = auth
        .nonce
        .as_deref()
        .ok_or_else(|| Error::Auth("nonce is missing".into()))?;
    let uri = auth
        .uri
        .as_deref()
        .ok_or_else(|| Error::Auth("uri is missing".into()))?;
    let response = auth
        .response
        .as_deref()
        .ok_or_else(|| Error::Auth("response is missing".into()))?;

    let expected = digest_response(
        &creds.username,
        realm,
        &creds.password,
        nonce,
        method.as_str(),
        uri,
    );
    if expected != response {
        return Err(Error::Auth("response mismatch".into()));
    }
    Ok(())
}

/// Client-side credential generator, built once from the first 401.
#[derive(Debug, Clone)]
pub struct Sender {
    username: String,
    password: String,
    method: AuthMethod,
    auth: Authenticate,
}

impl Sender {
    /// Pick a challenge from the `WWW-Authenticate` values, preferring
    /// Digest over Basic.
    pub fn new(values: &[String], username: &str, password: &str) -> Result<Sender> {
        if let Some(v) = values.iter().find(|v| v.starts_with("Digest")) {
            let auth = Authenticate::parse(v)?;
            if auth.realm.is_none() {
                return Err(Error::Auth("realm is missing".into()));
            }
            if auth.nonce.is_none() {
                return Err(Error::Auth("nonce is missing".into()));
            }
            return Ok(Sender {
                username: username.to_string(),
                password: password.to_string(),
                method: AuthMethod::Digest,
                auth,
            });
        }

        if let Some(v) = values.iter().find(|v| v.starts_with("Basic")) {
            let auth = Authenticate::parse(v)?;
            if auth.realm.is_none() {
                return Err(Error::Auth("realm is missing".into()));
            }
            return Ok(Sender {
                username: username.to_string(),
                password: password.to_string(),
                method: AuthMethod::Basic,
                auth,
            });
        }

        Err(Error::Auth("no authentication methods available".into()))
    }

    /// Add the `Authorization` header to an outgoing request.
    pub fn apply(&self, req: &mut Request) {
        let value = self.authorization_value(req.method, req.url.as_str());
        req.header.set("Authorization", value);
    }

    fn authorization_value(&self, method: Method, uri: &str) -> String {
        match self.method {
            AuthMethod::Basic => format!(
                "Basic {}",
                BASE64.encode(format!("{}:{}", self.username, self.password))
            ),
            AuthMethod::Digest => {
                let response = digest_response(
                    &self.username,
                    self.auth.realm.as_deref().unwrap_or_default(),
                    &self.password,
                    self.auth.nonce.as_deref().unwrap_or_default(),
                    method.as_str(),
                    uri,
                );
                Authenticate {
                    method: Some(AuthMethod::Digest),
                    username: Some(self.username.clone()),
                    realm: self.auth.realm.clone(),
                    nonce: self.auth.nonce.clone(),
                    uri: Some(uri.to_string()),
                    response: Some(response),
                    opaque: self.auth.opaque.clone(),
                    stale: self.auth.stale.clone(),
                    algorithm: self.auth.algorithm.clone(),
                }
                .format()
            }
        }
    }
}

/// Attach a 401 challenge to a response header block.
pub fn set_challenge(header: &mut HeaderMap, realm: &str) {
    header.set("WWW-Authenticate", challenge(realm).format());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_digest_response_value() {
        // MD5(MD5("u:r:p") + ":n:" + MD5("DESCRIBE:rtsp://h/s"))
        let expected = md5_hex(&format!(
            "{}:n:{}",
            md5_hex("u:r:p"),
            md5_hex("DESCRIBE:rtsp://h/s")
        ));
        assert_eq!(
            digest_response("u", "r", "p", "n", "DESCRIBE", "rtsp://h/s"),
            expected
        );
    }

    #[test]
    fn test_parse_quoted_and_bare() {
        let auth = Authenticate::parse(
            "Digest realm=\"EasyRelay\", nonce=abcdef, algorithm=\"MD5\", opaque=\"a,b\"",
        )
        .unwrap();
        assert_eq!(auth.method, Some(AuthMethod::Digest));
        assert_eq!(auth.realm.as_deref(), Some("EasyRelay"));
        assert_eq!(auth.nonce.as_deref(), Some("abcdef"));
        assert_eq!(auth.algorithm.as_deref(), Some("MD5"));
        // comma inside quotes does not split
        assert_eq!(auth.opaque.as_deref(), Some("a,b"));
    }

    #[test]
    fn test_parse_rejects_unknown_method() {
        assert!(Authenticate::parse("Bearer token").is_err());
        assert!(Authenticate::parse("Digest").is_err());
    }

    #[test]
    fn test_format_round_trip() {
        let auth = Authenticate {
            method: Some(AuthMethod::Digest),
            username: Some("u".into()),
            realm: Some("r".into()),
            nonce: Some("n".into()),
            uri: Some("rtsp://h/s".into()),
            response: Some("x".into()),
            ..Default::default()
        };
        let parsed = Authenticate::parse(&auth.format()).unwrap();
        assert_eq!(parsed.username.as_deref(), Some("u"));
        assert_eq!(parsed.realm.as_deref(), Some("r"));
        assert_eq!(parsed.nonce.as_deref(), Some("n"));
        assert_eq!(parsed.uri.as_deref(), Some("rtsp://h/s"));
        assert_eq!(parsed.response.as_deref(), Some("x"));
    }

    #[test]
    fn test_verify_digest_round_trip() {
        let creds = Credentials::new("admin", "secret");
        let ch = challenge("relay");
        let realm = ch.realm.as_deref().unwrap();
        let nonce = ch.nonce.as_deref().unwrap();

        let response = digest_response("admin", realm, "secret", nonce, "DESCRIBE", "rtsp://h/s");
        let header = Authenticate {
            method: Some(AuthMethod::Digest),
            username: Some("admin".into()),
            realm: Some(realm.to_string()),
            nonce: Some(nonce.to_string()),
            uri: Some("rtsp://h/s".into()),
            response: Some(response),
            ..Default::default()
        }
        .format();

        assert!(verify(&creds, Method::Describe, &header).is_ok());
        // tampering with the method inverts the result
        assert!(verify(&creds, Method::Setup, &header).is_err());

        // tampering with nonce, realm or uri inverts the result
        for (field, value) in [("nonce", "other"), ("realm", "other"), ("uri", "rtsp://h/x")] {
            let tampered = header.replace(
                &format!("{}=\"{}\"", field, match field {
                    "nonce" => nonce.to_string(),
                    "realm" => realm.to_string(),
                    _ => "rtsp://h/s".to_string(),
                }),
                &format!("{}=\"{}\"", field, value),
            );
            assert!(verify(&creds, Method::Describe, &tampered).is_err(), "{}", field);
        }
    }

    #[test]
    fn test_verify_basic() {
        let creds = Credentials::new("u", "p");
        let good = format!("Basic {}", BASE64.encode("u:p"));
        assert!(verify(&creds, Method::Describe, &good).is_ok());

        let bad = format!("Basic {}", BASE64.encode("u:wrong"));
        assert!(verify(&creds, Method::Describe, &bad).is_err());
    }

    #[test]
    fn test_sender_prefers_digest() {
        let values = vec![
            "Basic realm=\"r\"".to_string(),
            "Digest realm=\"r\", nonce=\"n\"".to_string(),
        ];
        let sender = Sender::new(&values, "u", "p").unwrap();
        let value = sender.authorization_value(Method::Describe, "rtsp://h/s");
        assert!(value.starts_with("Digest"));
        assert!(value.contains("username=\"u\""));
        assert!(value.contains(&format!(
            "response=\"{}\"",
            digest_response("u", "r", "p", "n", "DESCRIBE", "rtsp://h/s")
        )));
    }

    #[test]
    fn test_sender_requires_realm_and_nonce() {
        assert!(Sender::new(&["Digest realm=\"r\"".to_string()], "u", "p").is_err());
        assert!(Sender::new(&["Basic foo=bar".to_string()], "u", "p").is_err());
        assert!(Sender::new(&[], "u", "p").is_err());
    }

    #[test]
    fn test_sender_generated_verifies() {
        let creds = Credentials::new("cam", "pw");
        let ch = challenge("relay").format();
        let sender = Sender::new(&[ch], "cam", "pw").unwrap();
        let value = sender.authorization_value(Method::Play, "rtsp://h/live");
        assert!(verify(&creds, Method::Play, &value).is_ok());
    }
}
