//! Unified error types for rtsp-relay

use std::fmt;
use std::io;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all RTSP relay operations
#[derive(Debug)]
pub enum Error {
    /// I/O error during network operations
    Io(io::Error),
    /// Framing or header grammar violation
    Malformed(String),
    /// RTSP protocol violation (wrong version, missing header, bad transport)
    Protocol(String),
    /// Authentication failure (bad challenge, response mismatch)
    Auth(String),
    /// No pusher registered for the requested path
    NotFound(String),
    /// Path already owned and rebinding refused
    Conflict(String),
    /// Request not valid in the current session state
    State(String),
    /// Operation timed out
    Timeout,
    /// Connection was closed
    ConnectionClosed,
    /// Invalid configuration
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Malformed(msg) => write!(f, "Malformed message: {}", msg),
            Error::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            Error::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Error::NotFound(path) => write!(f, "Stream not found: {}", path),
            Error::Conflict(path) => write!(f, "Path already in use: {}", path),
            Error::State(msg) => write!(f, "Invalid state: {}", msg),
            Error::Timeout => write!(f, "Operation timed out"),
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(err)
        }
    }
}
