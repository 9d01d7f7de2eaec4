//! Cooperative stop signaling
//!
//! Every session, pusher, player and client connection carries a
//! `StopToken`. Stopping is idempotent: the first call wins, later calls
//! are no-ops, and every task waiting on the token wakes exactly once.

use std::sync::Arc;

use tokio::sync::watch;

/// A one-way, idempotent stop flag that tasks can await.
#[derive(Debug)]
pub struct StopToken {
    tx: watch::Sender<bool>,
}

impl StopToken {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    /// Signal stop. Returns true only for the call that actually flipped
    /// the flag.
    pub fn stop(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the token is stopped. Returns immediately if it
    /// already is.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }
}
