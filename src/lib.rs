//! listsync - offline-first list sync over an append-only change log
//!
//! The server never overwrites rows. It keeps a forward-only log of item
//! changes, each stamped with a strictly increasing sequence number. Clients
//! keep a local copy of the list, queue their own edits, push them in
//! batches and pull everything after the last sequence number they have
//! seen.
//!
//! ## Architecture
//!
//! - **server**: `ChangeLogStore` (SQLite log), the HTTP gateway and the
//!   password gate
//! - **client**: `ItemCache`, `PendingQueue`, `SyncMachine` and the
//!   `SyncScheduler` that drives push/pull from timers
//!
//! ## Storage Layout
//!
//! ```text
//! listsync.db           # server: changes + auth_attempts tables
//! listsync-client.db    # client: cursor, items and pending queue as JSON
//! ```

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod server;

// Re-exports
pub use client::{SyncHandle, SyncScheduler};
pub use config::Config;
pub use error::SyncError;
pub use model::{ChangeKind, ChangeRecord, ChangesPage, Item, NewChange};
pub use server::{create_router, AppState, ChangeLogStore};
