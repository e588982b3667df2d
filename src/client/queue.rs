//! Pending change queue
//!
//! Holds local mutations the server has not acknowledged yet. Entries are
//! keyed by `(id, kind)`: a second mutation of the same kind for the same item
//! replaces the first, so any number of edits between syncs collapses to at
//! most one `create` and one `update` per item.
//!
//! Ordering falls out of the key. Items are grouped by id and, because
//! `ChangeKind::Create < ChangeKind::Update`, a pending create always drains
//! ahead of a pending update for the same item.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ChangeKind, NewChange};

/// Queue key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChangeKey {
    pub id: String,
    pub kind: ChangeKind,
}

impl ChangeKey {
    fn of(change: &NewChange) -> Self {
        Self {
            id: change.id.clone(),
            kind: change.change,
        }
    }
}

/// A queued change plus the local revision it was recorded at.
///
/// The revision lets an acknowledgment remove exactly what was pushed and
/// keep a replacement recorded while the push was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    pub change: NewChange,
    pub revision: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PendingChange>", into = "Vec<PendingChange>")]
pub struct PendingQueue {
    entries: BTreeMap<ChangeKey, PendingChange>,
    next_revision: u64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change, replacing any queued change with the same key.
    pub fn record_change(&mut self, change: NewChange) {
        self.next_revision += 1;
        let key = ChangeKey::of(&change);
        self.entries.insert(
            key,
            PendingChange {
                change,
                revision: self.next_revision,
            },
        );
    }

    /// Snapshot of the whole queue in push order.
    ///
    /// Nothing is removed; pair with [`clear`](Self::clear) or
    /// [`acknowledge`](Self::acknowledge) once the push is confirmed.
    pub fn drain(&self) -> Vec<PendingChange> {
        self.entries.values().cloned().collect()
    }

    /// Push payload in order.
    pub fn changes(&self) -> Vec<NewChange> {
        self.entries.values().map(|p| p.change.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Remove the pushed entries that have not been replaced since.
    ///
    /// Returns how many entries were removed.
    pub fn acknowledge(&mut self, pushed: &[PendingChange]) -> usize {
        let mut removed = 0;
        for p in pushed {
            let key = ChangeKey::of(&p.change);
            if self.entries.get(&key).is_some_and(|e| e.revision == p.revision) {
                self.entries.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<PendingChange>> for PendingQueue {
    fn from(changes: Vec<PendingChange>) -> Self {
        let next_revision = changes.iter().map(|p| p.revision).max().unwrap_or(0);
        let entries = changes
            .into_iter()
            .map(|p| (ChangeKey::of(&p.change), p))
            .collect();
        Self {
            entries,
            next_revision,
        }
    }
}

impl From<PendingQueue> for Vec<PendingChange> {
    fn from(queue: PendingQueue) -> Self {
        queue.entries.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(id: &str, kind: ChangeKind, name: &str, completed: bool) -> NewChange {
        NewChange {
            id: id.into(),
            change: kind,
            name: name.into(),
            completed,
            deleted_at: None,
        }
    }

    #[test]
    fn test_same_kind_replaces_in_place() {
        let mut queue = PendingQueue::new();
        queue.record_change(change("a", ChangeKind::Create, "Milk", false));
        for i in 0..10 {
            queue.record_change(change("a", ChangeKind::Update, "Milk", i % 2 == 0));
        }

        let changes = queue.changes();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].change, ChangeKind::Create);
        assert_eq!(changes[1].change, ChangeKind::Update);
        // Last toggle wins.
        assert!(!changes[1].completed);
    }

    #[test]
    fn test_ordering_by_id_then_create_first() {
        let mut queue = PendingQueue::new();
        queue.record_change(change("b", ChangeKind::Update, "B", true));
        queue.record_change(change("a", ChangeKind::Update, "A", true));
        queue.record_change(change("b", ChangeKind::Create, "B", false));
        queue.record_change(change("a", ChangeKind::Create, "A", false));

        let keys: Vec<(String, ChangeKind)> =
            queue.changes().into_iter().map(|c| (c.id, c.change)).collect();
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), ChangeKind::Create),
                ("a".to_string(), ChangeKind::Update),
                ("b".to_string(), ChangeKind::Create),
                ("b".to_string(), ChangeKind::Update),
            ]
        );
    }

    #[test]
    fn test_drain_leaves_queue_intact() {
        let mut queue = PendingQueue::new();
        queue.record_change(change("a", ChangeKind::Create, "A", false));
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.len(), 1);

        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_acknowledge_keeps_newer_replacement() {
        let mut queue = PendingQueue::new();
        queue.record_change(change("a", ChangeKind::Create, "A", false));
        queue.record_change(change("a", ChangeKind::Update, "A", true));
        let pushed = queue.drain();

        // Edited again while the push is in flight.
        queue.record_change(change("a", ChangeKind::Update, "A renamed", true));

        assert_eq!(queue.acknowledge(&pushed), 1);
        let left = queue.changes();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "A renamed");
        assert_eq!(left[0].change, ChangeKind::Update);
    }

    #[test]
    fn test_serde_round_trip_preserves_revisions() {
        let mut queue = PendingQueue::new();
        queue.record_change(change("a", ChangeKind::Create, "A", false));
        queue.record_change(change("b", ChangeKind::Create, "B", false));

        let json = serde_json::to_string(&queue).unwrap();
        let mut restored: PendingQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, queue);

        // New revisions keep increasing after a reload.
        restored.record_change(change("c", ChangeKind::Create, "C", false));
        let max = restored.drain().iter().map(|p| p.revision).max().unwrap();
        assert_eq!(max, 3);
    }
}
