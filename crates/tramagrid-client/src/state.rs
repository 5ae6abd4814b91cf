//! Client state shared by the session manager, dispatcher, and readers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::RwLock;

use tramagrid_core::types::{ColorIndex, MergeUiState};

/// Single owner of the mutable client-side state.
///
/// Anyone may read the session id; only [`crate::SessionManager`] and the
/// import rollback write it.
#[derive(Default)]
pub struct ClientState {
    session_id: RwLock<Option<String>>,
    active_color: AtomicU32,
    merge: Mutex<MergeUiState>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current session id, `None` when no session is active.
    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub async fn has_session(&self) -> bool {
        self.session_id.read().await.is_some()
    }

    pub(crate) async fn set_session(&self, id: String) {
        *self.session_id.write().await = Some(id);
    }

    /// Forget the in-memory session id, returning what was there.
    pub(crate) async fn clear_session(&self) -> Option<String> {
        self.session_id.write().await.take()
    }

    /// Palette entry subsequent paints use.
    pub fn active_color(&self) -> ColorIndex {
        self.active_color.load(Ordering::SeqCst)
    }

    pub fn set_active_color(&self, index: ColorIndex) {
        self.active_color.store(index, Ordering::SeqCst);
    }

    pub fn merge_state(&self) -> MergeUiState {
        *self.merge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn update_merge<R>(&self, f: impl FnOnce(&mut MergeUiState) -> R) -> R {
        let mut merge = self.merge.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut merge)
    }
}
