//! Stream registry: path → pusher routing
//!
//! The registry is the single authority on which pusher owns which path.
//! All four operations run under one reader/writer lock over the map;
//! writers hold it only across map mutation, never across I/O.

pub mod player;
pub mod pusher;

pub use player::Player;
pub use pusher::{PayloadTransform, Pusher, PusherMedia, PusherSource, SourceKind};

use std::collections::HashMap;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::RwLock;

use crate::error::{Error, Result};

/// Short random identifier for sessions and pushers.
pub(crate) fn random_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}

/// Outcome of an atomic rebind-or-create check.
#[derive(Debug)]
pub enum AttachOutcome {
    /// The path was occupied and the new session now feeds the existing
    /// pusher; its subscribers are intact.
    Attached(Arc<Pusher>),
    /// The path is vacant; the caller should create a new pusher.
    CreateNew,
    /// The path is occupied and the current owner refuses rebinding.
    Rejected,
}

/// Concurrent map from stream path to its owning pusher.
#[derive(Debug, Default)]
pub struct PusherRegistry {
    pushers: RwLock<HashMap<String, Arc<Pusher>>>,
}

impl PusherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pusher if its path is vacant and start its dispatcher
    /// task. Occupied paths are a `Conflict`.
    pub async fn add_pusher(&self, pusher: Arc<Pusher>) -> Result<()> {
        {
            let mut pushers = self.pushers.write().await;
            if pushers.contains_key(pusher.path()) {
                return Err(Error::Conflict(pusher.path().to_string()));
            }
            pushers.insert(pusher.path().to_string(), pusher.clone());
            tracing::info!(
                path = %pusher.path(),
                id = %pusher.id(),
                total = pushers.len(),
                "Pusher registered"
            );
        }

        tokio::spawn(pusher.run());
        Ok(())
    }

    /// Delete a pusher, but only if the registered entry is the same
    /// instance (path and ID). A late stop from a stale pusher must not
    /// evict its successor.
    pub async fn remove_pusher(&self, pusher: &Pusher) {
        let mut pushers = self.pushers.write().await;
        if let Some(current) = pushers.get(pusher.path()) {
            if current.id() == pusher.id() {
                pushers.remove(pusher.path());
                tracing::info!(
                    path = %pusher.path(),
                    id = %pusher.id(),
                    total = pushers.len(),
                    "Pusher removed"
                );
            }
        }
    }

    pub async fn get_pusher(&self, path: &str) -> Option<Arc<Pusher>> {
        self.pushers.read().await.get(path).cloned()
    }

    pub async fn pusher_count(&self) -> usize {
        self.pushers.read().await.len()
    }

    /// Atomic "rebind or tell the caller to create": if the path is
    /// occupied, try to rebind the existing pusher to the new source.
    pub async fn try_attach(
        &self,
        path: &str,
        source: PusherSource,
        media: PusherMedia,
    ) -> AttachOutcome {
        let pushers = self.pushers.write().await;
        match pushers.get(path) {
            Some(pusher) => match pusher.rebind(source, media) {
                Ok(()) => AttachOutcome::Attached(pusher.clone()),
                Err(_) => AttachOutcome::Rejected,
            },
            None => AttachOutcome::CreateNew,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::StopToken;

    fn session_pusher(path: &str, source_id: &str) -> Arc<Pusher> {
        let source = PusherSource {
            id: source_id.to_string(),
            kind: SourceKind::Session,
            stop: StopToken::new(),
        };
        Pusher::from_session(path, source, PusherMedia::default(), true, 1 << 20)
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let registry = PusherRegistry::new();
        let pusher = session_pusher("/live/a", "s1");

        registry.add_pusher(pusher.clone()).await.unwrap();
        let found = registry.get_pusher("/live/a").await.unwrap();
        assert_eq!(found.id(), pusher.id());
        assert!(registry.get_pusher("/live/b").await.is_none());
    }

    #[tokio::test]
    async fn test_add_rejects_occupied_path() {
        let registry = PusherRegistry::new();
        registry.add_pusher(session_pusher("/live/a", "s1")).await.unwrap();

        let err = registry
            .add_pusher(session_pusher("/live/a", "s2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(registry.pusher_count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_checks_identity() {
        let registry = PusherRegistry::new();
        let first = session_pusher("/live/a", "s1");
        registry.add_pusher(first.clone()).await.unwrap();

        // a stale pusher with the same path but a different identity
        // must not evict the registered one
        let stale = session_pusher("/live/a", "s0");
        registry.remove_pusher(&stale).await;
        assert_eq!(registry.pusher_count().await, 1);

        registry.remove_pusher(&first).await;
        assert_eq!(registry.pusher_count().await, 0);
    }

    #[tokio::test]
    async fn test_try_attach_vacant_path() {
        let registry = PusherRegistry::new();
        let source = PusherSource {
            id: "s1".into(),
            kind: SourceKind::Session,
            stop: StopToken::new(),
        };
        let outcome = registry
            .try_attach("/live/a", source, PusherMedia::default())
            .await;
        assert!(matches!(outcome, AttachOutcome::CreateNew));
    }

    #[tokio::test]
    async fn test_try_attach_rebinds_and_keeps_registry_size() {
        let registry = PusherRegistry::new();
        let pusher = session_pusher("/live/a", "s1");
        registry.add_pusher(pusher.clone()).await.unwrap();

        let source = PusherSource {
            id: "s2".into(),
            kind: SourceKind::Session,
            stop: StopToken::new(),
        };
        let outcome = registry
            .try_attach("/live/a", source, PusherMedia::default())
            .await;

        match outcome {
            AttachOutcome::Attached(attached) => {
                assert_eq!(attached.id(), pusher.id());
                assert_eq!(attached.source_id(), "s2");
            }
            other => panic!("expected Attached, got {:?}", other),
        }
        assert_eq!(registry.pusher_count().await, 1);
    }

    #[tokio::test]
    async fn test_try_attach_rejects_client_pusher() {
        let registry = PusherRegistry::new();
        let client_source = PusherSource {
            id: "c1".into(),
            kind: SourceKind::Client,
            stop: StopToken::new(),
        };
        let pusher = Pusher::from_client(
            "/live/a",
            client_source,
            PusherMedia::default(),
            true,
            1 << 20,
            None,
        );
        registry.add_pusher(pusher).await.unwrap();

        let source = PusherSource {
            id: "s2".into(),
            kind: SourceKind::Session,
            stop: StopToken::new(),
        };
        let outcome = registry
            .try_attach("/live/a", source, PusherMedia::default())
            .await;
        assert!(matches!(outcome, AttachOutcome::Rejected));
    }

    #[test]
    fn test_random_id_shape() {
        let id = random_id();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(random_id(), random_id());
    }
}
