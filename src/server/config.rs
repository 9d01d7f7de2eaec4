//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Whether an ANNOUNCE on an occupied path rebinds the existing
    /// pusher (true) or is rejected with 406 (false)
    pub close_old: bool,

    /// Require Digest authentication on non-OPTIONS requests
    pub authorization: bool,

    /// Credentials verified when `authorization` is enabled
    pub username: String,
    pub password: String,

    /// Realm advertised in Digest challenges
    pub realm: String,

    /// Idle timeout for connections that are expected to keep sending
    /// (pushers and sessions that have not picked a role yet)
    pub timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// Enable GOP caching so late joiners start on a keyframe
    pub gop_cache_enabled: bool,

    /// Maximum GOP cache size in bytes per pusher
    pub gop_cache_max_size: usize,

    /// Per-player queue limit in frames (0 = unbounded, drop-head on
    /// overflow otherwise)
    pub queue_limit: usize,

    /// Discard frames for paused players at enqueue time
    pub drop_when_paused: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:554".parse().unwrap(),
            close_old: true,
            authorization: false,
            username: String::new(),
            password: String::new(),
            realm: "rtsp-relay".to_string(),
            timeout: Duration::from_secs(10),
            tcp_nodelay: true,
            read_buffer_size: 1024 * 1024,
            write_buffer_size: 1024 * 1024,
            gop_cache_enabled: true,
            gop_cache_max_size: 4 * 1024 * 1024,
            queue_limit: 0,
            drop_when_paused: false,
        }
    }
}

impl ServerConfig {
    /// Create a new config with a custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set whether a second ANNOUNCE on an occupied path rebinds it
    pub fn close_old(mut self, close_old: bool) -> Self {
        self.close_old = close_old;
        self
    }

    /// Require Digest authentication with the given credentials
    pub fn authorization(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.authorization = true;
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the per-connection idle timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disable GOP caching
    pub fn disable_gop_cache(mut self) -> Self {
        self.gop_cache_enabled = false;
        self
    }

    /// Bound each player queue, dropping the oldest frame on overflow
    pub fn queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }
}
