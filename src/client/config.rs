//! Client configuration

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::registry::PayloadTransform;

pub const AGENT_COPYRIGHT: &str = "rtsp-relay";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AGENT_BUILD: &str = "release";

/// Default User-Agent: `<copyright>/<version>(<build>)`.
pub fn default_agent() -> String {
    format!("{}/{}({})", AGENT_COPYRIGHT, AGENT_VERSION, AGENT_BUILD)
}

/// Payload encryption hook: `(payload tail, sequence number) -> rewritten tail`.
pub type EncryptFn = Arc<dyn Fn(&[u8], u16) -> Vec<u8> + Send + Sync>;
/// Payload decryption hook: `payload tail -> rewritten tail`.
pub type DecryptFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Client configuration
#[derive(Clone)]
pub struct ClientConfig {
    /// RTSP URL to pull from (`rtsp://[user:pass@]host[:port]/path`)
    pub rtsp_address: String,

    /// Path the pulled stream is registered under (defaults to the URL
    /// path)
    pub custom_path: Option<String>,

    /// User-Agent header value
    pub agent: String,

    /// Dial timeout
    pub timeout: Duration,

    /// Log full requests and responses at debug level
    pub debug: bool,

    /// Optional payload encryption hook. Mutually exclusive with
    /// `decrypt`.
    pub encrypt: Option<EncryptFn>,

    /// Optional payload decryption hook. Mutually exclusive with
    /// `encrypt`.
    pub decrypt: Option<DecryptFn>,
}

impl ClientConfig {
    pub fn new(rtsp_address: impl Into<String>) -> Self {
        Self {
            rtsp_address: rtsp_address.into(),
            custom_path: None,
            agent: default_agent(),
            timeout: Duration::from_secs(10),
            debug: false,
            encrypt: None,
            decrypt: None,
        }
    }

    pub fn custom_path(mut self, path: impl Into<String>) -> Self {
        self.custom_path = Some(path.into());
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn encrypt(mut self, f: EncryptFn) -> Self {
        self.encrypt = Some(f);
        self
    }

    pub fn decrypt(mut self, f: DecryptFn) -> Self {
        self.decrypt = Some(f);
        self
    }

    /// A config may carry at most one payload transform: applying both
    /// would have the second overwrite the first.
    pub fn validate(&self) -> Result<()> {
        if self.encrypt.is_some() && self.decrypt.is_some() {
            return Err(Error::Config(
                "encrypt and decrypt hooks are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// The single configured transform, if any.
    pub(crate) fn transform(&self) -> Result<Option<PayloadTransform>> {
        self.validate()?;
        if let Some(f) = &self.encrypt {
            return Ok(Some(PayloadTransform::Encrypt(f.clone())));
        }
        if let Some(f) = &self.decrypt {
            return Ok(Some(PayloadTransform::Decrypt(f.clone())));
        }
        Ok(None)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("rtsp_address", &self.rtsp_address)
            .field("custom_path", &self.custom_path)
            .field("agent", &self.agent)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("encrypt", &self.encrypt.is_some())
            .field("decrypt", &self.decrypt.is_some())
            .finish()
    }
}
