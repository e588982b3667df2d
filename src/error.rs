//! Error types for listsync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Scheduler stopped")]
    SchedulerStopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the next scheduler tick may retry the failed operation.
    ///
    /// Validation failures and unknown items are bugs in the caller and are
    /// never retried; a 4xx response is treated the same way.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Validation(_) | SyncError::UnknownItem(_) | SyncError::Config(_) => false,
            SyncError::Status { status, .. } => *status >= 500,
            _ => true,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Transport(e.to_string())
    }
}
