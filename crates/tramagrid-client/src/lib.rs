//! Client-side controller for the TramaGrid canvas service.
//!
//! All editing happens server-side against a session; this crate owns the
//! session handle, issues mutations, reads snapshots past any caches, runs the
//! project import transaction, and tells observers when to re-fetch.

pub mod bus;
pub mod dispatcher;
pub mod gateway;
pub mod import;
pub mod reader;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{RefreshBus, SubscriptionId};
pub use dispatcher::{MergeProgress, MutationDispatcher};
pub use gateway::{CanvasGateway, HttpGateway};
pub use import::ImportOrchestrator;
pub use reader::{GridImage, GridPayload, SnapshotReader};
pub use session::{RestoreOutcome, SessionManager};
pub use state::ClientState;
