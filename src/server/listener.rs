//! RTSP server listener
//!
//! Handles the TCP accept loop and spawns one session task per
//! connection.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::error::Result;
use crate::registry::PusherRegistry;
use crate::server::config::ServerConfig;
use crate::server::session::Session;

/// RTSP server
pub struct RtspServer {
    config: ServerConfig,
    registry: Arc<PusherRegistry>,
}

impl RtspServer {
    /// Create a new server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(PusherRegistry::new()),
        }
    }

    /// Create a server over an existing registry, so pulling clients and
    /// the server can share one pusher namespace.
    pub fn with_registry(config: ServerConfig, registry: Arc<PusherRegistry>) -> Self {
        Self { config, registry }
    }

    /// The registry behind this server.
    pub fn registry(&self) -> Arc<PusherRegistry> {
        self.registry.clone()
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server.
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "RTSP server listening");
        self.accept_loop(&listener).await
    }

    /// Run the accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "RTSP server listening");
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "RTSP server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        }
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::warn!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
            }
        }

        let session = Session::new(socket, self.config.clone(), self.registry.clone());
        tracing::debug!(session = %session.id(), peer = %peer_addr, "New connection");
        tokio::spawn(session.run());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Response, StatusCode};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_accepts_connections_over_tcp() {
        let config = ServerConfig::with_addr("127.0.0.1:0".parse().unwrap());
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RtspServer::new(config);
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"OPTIONS rtsp://example/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n")
            .await
            .unwrap();
        let res = Response::read(&mut stream).await.unwrap();
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.header.get("Public").is_some());
    }
}
