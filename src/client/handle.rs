//! Commands into a running scheduler

use tokio::sync::{mpsc, oneshot};

use super::scheduler::ClientSnapshot;
use crate::error::SyncError;

/// A user edit.
#[derive(Debug, Clone)]
pub enum LocalMutation {
    Add { name: String },
    Toggle { id: String },
    Rename { id: String, name: String },
    /// Soft-delete
    Delete { id: String },
}

pub enum ClientCommand {
    Mutate {
        mutation: LocalMutation,
        reply: oneshot::Sender<Result<String, SyncError>>,
    },
    SyncNow,
    /// Foreground visibility changed
    SetVisible(bool),
    Snapshot(oneshot::Sender<ClientSnapshot>),
    Shutdown,
}

/// Cloneable sender side of a scheduler task.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<ClientCommand>,
}

impl SyncHandle {
    pub(crate) fn new(tx: mpsc::Sender<ClientCommand>) -> Self {
        Self { tx }
    }

    async fn send(&self, cmd: ClientCommand) -> Result<(), SyncError> {
        self.tx.send(cmd).await.map_err(|_| SyncError::SchedulerStopped)
    }

    async fn mutate(&self, mutation: LocalMutation) -> Result<String, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Mutate { mutation, reply }).await?;
        rx.await.map_err(|_| SyncError::SchedulerStopped)?
    }

    /// Add an item and return its new id.
    pub async fn add_item(&self, name: impl Into<String>) -> Result<String, SyncError> {
        self.mutate(LocalMutation::Add { name: name.into() }).await
    }

    pub async fn toggle(&self, id: &str) -> Result<(), SyncError> {
        self.mutate(LocalMutation::Toggle { id: id.to_string() }).await.map(|_| ())
    }

    pub async fn rename(&self, id: &str, name: impl Into<String>) -> Result<(), SyncError> {
        self.mutate(LocalMutation::Rename {
            id: id.to_string(),
            name: name.into(),
        })
        .await
        .map(|_| ())
    }

    pub async fn delete(&self, id: &str) -> Result<(), SyncError> {
        self.mutate(LocalMutation::Delete { id: id.to_string() }).await.map(|_| ())
    }

    /// Ask for an immediate push-then-pull. Returns once the request is
    /// queued, not once the round trip is done.
    pub async fn sync_now(&self) -> Result<(), SyncError> {
        self.send(ClientCommand::SyncNow).await
    }

    pub async fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        self.send(ClientCommand::SetVisible(visible)).await
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| SyncError::SchedulerStopped)
    }

    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.send(ClientCommand::Shutdown).await
    }
}
