//! Items, change records and the gateway wire types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Materialized list entry as the user sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub completed: bool,
    /// Soft-delete marker. Set items are hidden but kept until the
    /// deletion has been acknowledged by the server.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Kind of mutation carried by a change record.
///
/// `Create` orders before `Update`, which is what keeps a pending create ahead
/// of a pending update for the same item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ChangeKind::Create),
            "update" => Some(ChangeKind::Update),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change as produced by a client, before the server sequences it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChange {
    pub id: String,
    pub change: ChangeKind,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl NewChange {
    /// Full-state snapshot of an item as a change of the given kind.
    pub fn from_item(item: &Item, change: ChangeKind) -> Self {
        Self {
            id: item.id.clone(),
            change,
            name: item.name.clone(),
            completed: item.completed,
            deleted_at: item.deleted_at,
        }
    }
}

/// A change as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    #[serde(flatten)]
    pub change: NewChange,
    pub sequence_number: u64,
}

// === Wire types ===

/// `POST /changes` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub changes: Vec<NewChange>,
}

/// `POST /changes` success body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushResponse {
    pub sequence_number: u64,
}

/// `GET /changes` body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangesPage {
    pub changes: Vec<ChangeRecord>,
    pub max_sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_change_record_wire_shape() {
        let record = ChangeRecord {
            change: NewChange {
                id: "a".into(),
                change: ChangeKind::Create,
                name: "Milk".into(),
                completed: false,
                deleted_at: None,
            },
            sequence_number: 7,
        };

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "a",
                "change": "create",
                "name": "Milk",
                "completed": false,
                "deleted_at": null,
                "sequence_number": 7
            })
        );
    }

    #[test]
    fn test_new_change_defaults() {
        let change: NewChange =
            serde_json::from_value(json!({ "id": "a", "change": "update", "name": "Eggs" })).unwrap();
        assert!(!change.completed);
        assert!(change.deleted_at.is_none());
        assert_eq!(change.change, ChangeKind::Update);
    }

    #[test]
    fn test_create_orders_before_update() {
        assert!(ChangeKind::Create < ChangeKind::Update);
        assert_eq!(ChangeKind::parse("update"), Some(ChangeKind::Update));
        assert_eq!(ChangeKind::parse("delete"), None);
    }
}
