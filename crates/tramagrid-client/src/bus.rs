//! Refresh Bus: process-wide "re-fetch now" signal.
//!
//! Writers publish after any state-affecting success; readers and UI subscribe
//! without knowing anything about the transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::trace;

use tramagrid_core::types::RefreshEvent;

/// Returns false once the listener can no longer be reached.
type Listener = Arc<dyn Fn() -> bool + Send + Sync>;

/// Handle returned by [`RefreshBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct RefreshBus {
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl RefreshBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Arc::new(move || {
            listener();
            true
        }))
    }

    /// Subscribe with a channel instead of a callback. The receiver gets one
    /// [`RefreshEvent`] per publish. Dropping the receiver unsubscribes it
    /// at the next publish.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RefreshEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.register(Arc::new(move || tx.send(RefreshEvent).is_ok()));
        (id, rx)
    }

    fn register(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock().push((id, listener));
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Notify every current subscriber in subscription order. Returns how
    /// many were notified.
    ///
    /// Listeners run against a snapshot taken before the first call, so
    /// (un)subscribing from inside a listener only affects later publishes.
    pub fn publish(&self) -> usize {
        let snapshot: Vec<(SubscriptionId, Listener)> = self.lock().clone();
        trace!(listeners = snapshot.len(), "Publishing refresh");
        let mut closed = Vec::new();
        for (id, listener) in &snapshot {
            if !listener() {
                closed.push(*id);
            }
        }
        if !closed.is_empty() {
            trace!(closed = closed.len(), "Dropping closed channel subscribers");
            self.lock().retain(|(id, _)| !closed.contains(id));
        }
        snapshot.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
