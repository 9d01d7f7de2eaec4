//! Server side: accept loop and per-connection sessions

pub mod config;
pub mod listener;
pub mod session;

pub use config::ServerConfig;
pub use listener::RtspServer;
pub use session::{Session, SessionWriter};
