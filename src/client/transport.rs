//! Transports between the scheduler and a change log

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::SyncError;
use crate::model::{ChangesPage, NewChange, PushRequest, PushResponse};
use crate::server::ChangeLogStore;

/// The two gateway operations the scheduler needs.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Append `changes` and return the highest sequence number written.
    async fn push(&self, changes: &[NewChange]) -> Result<u64, SyncError>;

    /// Records after `after_sequence` plus the highest sequence seen.
    async fn changes_since(&self, after_sequence: u64) -> Result<ChangesPage, SyncError>;
}

/// Talks to a gateway over HTTP.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push(&self, changes: &[NewChange]) -> Result<u64, SyncError> {
        let body = PushRequest {
            changes: changes.to_vec(),
        };
        let response = self
            .client
            .post(self.url("/changes"))
            .json(&body)
            .send()
            .await?;
        let ack: PushResponse = check_status(response).await?.json().await?;
        debug!(count = changes.len(), sequence_number = ack.sequence_number, "Pushed changes");
        Ok(ack.sequence_number)
    }

    async fn changes_since(&self, after_sequence: u64) -> Result<ChangesPage, SyncError> {
        let response = self
            .client
            .get(self.url("/changes"))
            .query(&[("after_sequence", after_sequence)])
            .send()
            .await?;
        let page: ChangesPage = check_status(response).await?.json().await?;
        Ok(page)
    }
}

/// Calls an in-process change log directly.
pub struct DirectTransport {
    store: Arc<ChangeLogStore>,
}

impl DirectTransport {
    pub fn new(store: Arc<ChangeLogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SyncTransport for DirectTransport {
    async fn push(&self, changes: &[NewChange]) -> Result<u64, SyncError> {
        self.store.append(changes)
    }

    async fn changes_since(&self, after_sequence: u64) -> Result<ChangesPage, SyncError> {
        self.store.changes_since(after_sequence)
    }
}
