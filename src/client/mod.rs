//! Client sync engine
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SyncScheduler                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ItemCache        - materialized items, folds pulled changes │
//! │  PendingQueue     - unacknowledged local changes by (id,kind)│
//! │  SyncMachine      - idle / pending / syncing + ownership     │
//! │  SyncTransport    - push + changes_since (HTTP or direct)    │
//! │  ClientStateStore - cursor, items and queue on disk          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod handle;
pub mod machine;
pub mod queue;
pub mod scheduler;
pub mod state_store;
pub mod transport;

// Re-exports
pub use cache::ItemCache;
pub use handle::{LocalMutation, SyncHandle};
pub use machine::{OwnerToken, SyncMachine, SyncPhase, SyncTrigger};
pub use queue::{PendingChange, PendingQueue};
pub use scheduler::{ClientSnapshot, SchedulerConfig, SyncScheduler};
pub use state_store::{ClientState, ClientStateStore};
pub use transport::{DirectTransport, HttpTransport, SyncTransport};
