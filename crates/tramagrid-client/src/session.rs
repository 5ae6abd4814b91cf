//! Session Manager: creates, restores, and clears the session handle.
//!
//! The id lives in two places: [`ClientState`] for the running process and a
//! [`SessionStore`] so it survives restarts. This module is the only writer of
//! both (apart from import rollback).

use std::sync::Arc;

use tracing::{debug, info, warn};

use tramagrid_core::error::Result;
use tramagrid_core::session_store::SessionStore;
use tramagrid_core::types::{ReadRequest, Session};

use crate::bus::RefreshBus;
use crate::gateway::CanvasGateway;
use crate::reader::cache_token;
use crate::state::ClientState;

/// What [`SessionManager::restore`] found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The persisted id is live and now active.
    Restored(String),
    /// Nothing was persisted.
    NoSavedSession,
    /// The server confirmed the id is gone; it has been purged.
    Invalidated,
    /// The check could not complete. The persisted id was kept.
    Unconfirmed,
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored(_))
    }
}

pub struct SessionManager {
    gateway: Arc<dyn CanvasGateway>,
    store: Arc<dyn SessionStore>,
    state: Arc<ClientState>,
    bus: Arc<RefreshBus>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn CanvasGateway>,
        store: Arc<dyn SessionStore>,
        state: Arc<ClientState>,
        bus: Arc<RefreshBus>,
    ) -> Self {
        Self {
            gateway,
            store,
            state,
            bus,
        }
    }

    /// Currently active session, if any.
    pub async fn session(&self) -> Option<Session> {
        self.state.session_id().await.map(Session::active)
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.session_id().await
    }

    /// Request a new session and make it the active one.
    ///
    /// On failure neither memory nor the durable store is left holding an id.
    pub async fn create_session(&self) -> Result<Session> {
        let created = match self.gateway.create_session().await {
            Ok(id) => self.store.save(&id).await.map(|_| id),
            Err(e) => Err(e),
        };

        match created {
            Ok(id) => {
                self.state.set_session(id.clone()).await;
                info!(session_id = %id, "Session created");
                Ok(Session::active(id))
            }
            Err(e) => {
                warn!(error = %e, "Session creation failed");
                self.purge().await;
                Err(e)
            }
        }
    }

    /// Restore the persisted session if the server still knows it.
    pub async fn restore(&self) -> RestoreOutcome {
        let saved = match self.store.load().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!("No persisted session to restore");
                return RestoreOutcome::NoSavedSession;
            }
            Err(e) => {
                warn!(error = %e, "Could not read persisted session");
                return RestoreOutcome::NoSavedSession;
            }
        };

        let token = cache_token();
        match self.gateway.read(&saved, ReadRequest::Params, &token).await {
            Ok(_) => {
                self.state.set_session(saved.clone()).await;
                info!(session_id = %saved, "Session restored");
                self.bus.publish();
                RestoreOutcome::Restored(saved)
            }
            Err(e) if e.is_session_gone() => {
                info!(session_id = %saved, "Persisted session no longer exists on the server");
                if let Err(e) = self.store.clear().await {
                    warn!(error = %e, "Failed to purge persisted session");
                }
                RestoreOutcome::Invalidated
            }
            Err(e) => {
                warn!(session_id = %saved, error = %e, "Could not confirm persisted session");
                RestoreOutcome::Unconfirmed
            }
        }
    }

    /// [`Self::restore`] reduced to "is there an active session now".
    pub async fn restore_session(&self) -> bool {
        self.restore().await.is_restored()
    }

    /// Explicitly end the session locally.
    pub async fn logout(&self) -> Result<()> {
        let previous = self.state.clear_session().await;
        self.store.clear().await?;
        if let Some(id) = previous {
            info!(session_id = %id, "Session cleared");
        }
        Ok(())
    }

    /// Drop the in-memory id only. The persisted id stays restorable.
    pub(crate) async fn deactivate(&self) {
        if let Some(id) = self.state.clear_session().await {
            debug!(session_id = %id, "Session deactivated");
        }
    }

    /// Clear both copies, logging rather than returning store errors.
    pub(crate) async fn purge(&self) {
        self.state.clear_session().await;
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear persisted session");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tramagrid_core::error::TramaGridError;
    use tramagrid_core::session_store::{FileSessionStore, MemorySessionStore};

    use super::*;
    use crate::testing::{Call, FakeGateway, refresh_counter};

    fn manager(
        gateway: &FakeGateway,
        store: Arc<dyn SessionStore>,
    ) -> (SessionManager, Arc<ClientState>, Arc<RefreshBus>) {
        let state = Arc::new(ClientState::new());
        let bus = Arc::new(RefreshBus::new());
        let manager = SessionManager::new(
            Arc::new(gateway.clone()),
            store,
            state.clone(),
            bus.clone(),
        );
        (manager, state, bus)
    }

    #[tokio::test]
    async fn test_create_session_persists() {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemorySessionStore::new());
        let (manager, state, _bus) = manager(&gateway, store.clone());

        let session = manager.create_session().await.unwrap();
        assert!(session.valid);
        assert_eq!(state.session_id().await, Some(session.id.clone()));
        assert_eq!(store.load().await.unwrap(), Some(session.id));
    }

    #[tokio::test]
    async fn test_create_failure_clears_both_copies() {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemorySessionStore::with_session("stale"));
        let (manager, state, _bus) = manager(&gateway, store.clone());
        state.set_session("stale".into()).await;

        gateway.fail_next("create", TramaGridError::Transport("connection reset".into()));
        let err = manager.create_session().await.unwrap_err();
        assert!(matches!(err, TramaGridError::Transport(_)));
        assert!(state.session_id().await.is_none());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_then_restore_in_fresh_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let gateway = FakeGateway::new();

        let (first, _, _) = manager(&gateway, Arc::new(FileSessionStore::new(path.clone())));
        let created = first.create_session().await.unwrap();

        // New state, bus, and store instance: a process restart
        let (second, state, bus) = manager(&gateway, Arc::new(FileSessionStore::new(path)));
        let refreshes = refresh_counter(&bus);
        assert!(second.restore_session().await);
        assert_eq!(state.session_id().await, Some(created.id));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_rejected_purges() {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemorySessionStore::with_session("gone"));
        let (manager, state, bus) = manager(&gateway, store.clone());
        let refreshes = refresh_counter(&bus);

        assert_eq!(manager.restore().await, RestoreOutcome::Invalidated);
        assert!(state.session_id().await.is_none());
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_restore_after_server_forgot_session() {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemorySessionStore::new());
        let (first, _, _) = manager(&gateway, store.clone());
        let created = first.create_session().await.unwrap();

        gateway.forget_session(&created.id);
        let (second, state, _bus) = manager(&gateway, store.clone());
        assert_eq!(second.restore().await, RestoreOutcome::Invalidated);
        assert!(state.session_id().await.is_none());
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_transport_failure_keeps_id() {
        let gateway = FakeGateway::new().with_session("live");
        let store = Arc::new(MemorySessionStore::with_session("live"));
        let (manager, state, bus) = manager(&gateway, store.clone());
        let refreshes = refresh_counter(&bus);

        gateway.fail_next("read", TramaGridError::Transport("dns failure".into()));
        assert_eq!(manager.restore().await, RestoreOutcome::Unconfirmed);
        assert!(state.session_id().await.is_none());
        assert_eq!(store.load().await.unwrap().as_deref(), Some("live"));

        // Once the network is back the same id restores
        assert!(manager.restore_session().await);
        assert_eq!(state.session_id().await.as_deref(), Some("live"));
        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restore_server_error_is_not_invalidation() {
        let gateway = FakeGateway::new().with_session("live");
        let store = Arc::new(MemorySessionStore::with_session("live"));
        let (manager, _state, _bus) = manager(&gateway, store.clone());

        gateway.fail_next(
            "read",
            TramaGridError::Server {
                status: 503,
                detail: None,
            },
        );
        assert_eq!(manager.restore().await, RestoreOutcome::Unconfirmed);
        assert_eq!(store.load().await.unwrap().as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_restore_without_saved_session_skips_network() {
        let gateway = FakeGateway::new();
        let (manager, _state, _bus) = manager(&gateway, Arc::new(MemorySessionStore::new()));
        assert_eq!(manager.restore().await, RestoreOutcome::NoSavedSession);
        assert_eq!(gateway.network_calls(), 0);
    }

    #[tokio::test]
    async fn test_restore_check_is_cache_busted() {
        let gateway = FakeGateway::new().with_session("live");
        let (manager, _state, _bus) =
            manager(&gateway, Arc::new(MemorySessionStore::with_session("live")));
        manager.restore().await;
        match &gateway.calls()[..] {
            [Call::Read(id, ReadRequest::Params, token)] => {
                assert_eq!(id, "live");
                assert!(!token.is_empty());
            }
            other => panic!("unexpected calls: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logout() {
        let gateway = FakeGateway::new();
        let store = Arc::new(MemorySessionStore::new());
        let (manager, state, _bus) = manager(&gateway, store.clone());
        manager.create_session().await.unwrap();

        manager.logout().await.unwrap();
        assert!(manager.session().await.is_none());
        assert!(state.session_id().await.is_none());
        assert_eq!(store.load().await.unwrap(), None);
    }
}
