//! Local item cache
//!
//! The materialized list, built by folding pulled change records onto the
//! items already held. Local edits go through the mutation methods, which
//! return the change record to queue for the next push.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SyncError;
use crate::model::{ChangeKind, ChangeRecord, Item, NewChange};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemCache {
    items: Vec<Item>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<Item>) -> Self {
        Self { items }
    }

    pub fn get(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    /// A visible item, for local edits. Soft-deleted items are gone as far
    /// as the user is concerned.
    fn get_mut(&mut self, id: &str) -> Result<&mut Item, SyncError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id && !item.is_deleted())
            .ok_or_else(|| SyncError::UnknownItem(id.to_string()))
    }

    /// Every held item, soft-deleted ones included.
    pub fn all(&self) -> &[Item] {
        &self.items
    }

    /// Items the user should see.
    pub fn visible(&self) -> Vec<Item> {
        self.items.iter().filter(|item| !item.is_deleted()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // === Local mutations ===

    /// Add a new item with a fresh id.
    pub fn create(&mut self, name: impl Into<String>) -> NewChange {
        let item = Item {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            completed: false,
            deleted_at: None,
        };
        let change = NewChange::from_item(&item, ChangeKind::Create);
        self.items.push(item);
        change
    }

    pub fn toggle(&mut self, id: &str) -> Result<NewChange, SyncError> {
        let item = self.get_mut(id)?;
        item.completed = !item.completed;
        Ok(NewChange::from_item(item, ChangeKind::Update))
    }

    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> Result<NewChange, SyncError> {
        let item = self.get_mut(id)?;
        item.name = name.into();
        Ok(NewChange::from_item(item, ChangeKind::Update))
    }

    /// Soft-delete: the item stays held, hidden, until the deletion is pushed.
    pub fn delete(&mut self, id: &str, at: DateTime<Utc>) -> Result<NewChange, SyncError> {
        let item = self.get_mut(id)?;
        item.deleted_at = Some(at);
        Ok(NewChange::from_item(item, ChangeKind::Update))
    }

    // === Reconciliation ===

    /// Fold one pulled record into the cache.
    ///
    /// Unknown id: a `create` materializes the item unless it already carries
    /// `deleted_at`; an `update` is ignored. Known id: either kind overwrites
    /// name, completed and deleted_at.
    pub fn apply_remote(&mut self, record: &ChangeRecord) {
        let change = &record.change;
        match self.items.iter_mut().find(|item| item.id == change.id) {
            Some(item) => overwrite(item, change),
            None => match change.change {
                ChangeKind::Create if change.deleted_at.is_none() => {
                    self.items.push(Item {
                        id: change.id.clone(),
                        name: change.name.clone(),
                        completed: change.completed,
                        deleted_at: None,
                    });
                }
                ChangeKind::Create => {
                    debug!(id = %change.id, sequence_number = record.sequence_number, "Skipping create of deleted item");
                }
                ChangeKind::Update => {
                    debug!(id = %change.id, sequence_number = record.sequence_number, "Ignoring update for unknown item");
                }
            },
        }
    }

    /// Fold pulled records in ascending sequence order.
    pub fn apply_remote_batch(&mut self, records: &[ChangeRecord]) {
        let mut ordered: Vec<&ChangeRecord> = records.iter().collect();
        ordered.sort_by_key(|r| r.sequence_number);
        for record in ordered {
            self.apply_remote(record);
        }
    }

    /// Lay queued local changes back over the cache after a pull.
    ///
    /// `pending` is the queue in push order. Until the server acknowledges
    /// them, local edits win over pulled state for the same item.
    pub fn reapply_pending(&mut self, pending: &[NewChange]) -> usize {
        let mut reapplied = 0;
        for change in pending {
            match self.items.iter_mut().find(|item| item.id == change.id) {
                Some(item) => overwrite(item, change),
                None if change.change == ChangeKind::Create => self.items.push(Item {
                    id: change.id.clone(),
                    name: change.name.clone(),
                    completed: change.completed,
                    deleted_at: change.deleted_at,
                }),
                None => continue,
            }
            reapplied += 1;
        }
        reapplied
    }

    /// Drop soft-deleted items whose ids are in `acknowledged`.
    ///
    /// Returns how many were purged.
    pub fn purge_deleted<'a>(&mut self, acknowledged: impl IntoIterator<Item = &'a str>) -> usize {
        let ids: Vec<&str> = acknowledged.into_iter().collect();
        let before = self.items.len();
        self.items
            .retain(|item| !(item.is_deleted() && ids.contains(&item.id.as_str())));
        before - self.items.len()
    }
}

fn overwrite(item: &mut Item, change: &NewChange) {
    item.name = change.name.clone();
    item.completed = change.completed;
    item.deleted_at = change.deleted_at;
}
