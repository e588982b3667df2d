//! Client CLI - edit the local list and drive sync from a terminal
//!
//! Edits are applied to the local state store and queued; they reach the
//! server on the next `sync` or while `watch` is running.

use std::sync::Arc;

use clap::Subcommand;
use tracing::info;

use crate::client::{
    ClientStateStore, HttpTransport, LocalMutation, SchedulerConfig, SyncScheduler, SyncTransport,
};
use crate::config::ClientConfig;
use crate::error::SyncError;

/// Client CLI commands
#[derive(Debug, Subcommand)]
pub enum ClientCommands {
    /// Add an item
    Add {
        /// Item name
        name: String,
    },

    /// Flip an item's completed flag
    Toggle {
        /// Item id
        id: String,
    },

    /// Rename an item
    Rename {
        /// Item id
        id: String,
        /// New name
        name: String,
    },

    /// Soft-delete an item
    Delete {
        /// Item id
        id: String,
    },

    /// Show visible items and sync status
    List,

    /// Push pending changes and pull new ones
    Sync,

    /// Keep syncing in the background until Ctrl-C
    Watch,
}

/// Open the scheduler over the configured state store and server.
fn open_scheduler(config: &ClientConfig) -> Result<SyncScheduler, SyncError> {
    let store = ClientStateStore::open(&config.state_path)?;
    let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::new(config.server_url.clone())?);
    SyncScheduler::with_state_store(SchedulerConfig::from(config), transport, store)
}

/// Run one client command and return what to print.
pub async fn execute_command(config: &ClientConfig, cmd: ClientCommands) -> Result<String, SyncError> {
    let mut scheduler = open_scheduler(config)?;

    match cmd {
        ClientCommands::Add { name } => {
            let id = scheduler.mutate(LocalMutation::Add { name })?;
            Ok(format!("Added {}", id))
        }
        ClientCommands::Toggle { id } => {
            scheduler.mutate(LocalMutation::Toggle { id: id.clone() })?;
            Ok(format!("Toggled {}", id))
        }
        ClientCommands::Rename { id, name } => {
            scheduler.mutate(LocalMutation::Rename { id: id.clone(), name })?;
            Ok(format!("Renamed {}", id))
        }
        ClientCommands::Delete { id } => {
            scheduler.mutate(LocalMutation::Delete { id: id.clone() })?;
            Ok(format!("Deleted {}", id))
        }
        ClientCommands::List => Ok(render_list(&scheduler)),
        ClientCommands::Sync => {
            scheduler.sync_once().await?;
            Ok(render_list(&scheduler))
        }
        ClientCommands::Watch => {
            let (handle, task) = scheduler.spawn();
            info!(server = %config.server_url, "Watching for changes, Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            handle.shutdown().await?;
            let state = task
                .await
                .map_err(|e| SyncError::Transport(format!("scheduler task failed: {}", e)))?;
            Ok(format!(
                "Stopped at cursor {} with {} pending change(s)",
                state.cursor,
                state.queue.len()
            ))
        }
    }
}

fn render_list(scheduler: &SyncScheduler) -> String {
    let snapshot = scheduler.snapshot();
    let mut out = String::new();
    for item in &snapshot.items {
        let mark = if item.completed { "x" } else { " " };
        out.push_str(&format!("[{}] {}  {}\n", mark, item.name, item.id));
    }
    out.push_str(&format!(
        "cursor: {}, pending: {}, phase: {:?}",
        snapshot.cursor,
        snapshot.pending.len(),
        snapshot.phase
    ));
    out
}
