//! Wire-level shapes shared with the document store.

use crate::{Checkpoint, EntityId, KindTag, RevisionId, SideId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Store-level representation of a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Entity identity
    pub id: EntityId,
    /// Kind tag for polymorphic decode
    pub kind: KindTag,
    /// The serialized entity payload (JSON value)
    pub entity: serde_json::Value,
    /// Side that wrote this document
    pub side: SideId,
    /// When the document was written
    pub modified: DateTime<Utc>,
    /// Tombstone flag, omitted on the wire when false
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

impl Document {
    /// Create a new live document.
    pub fn new(
        id: impl Into<EntityId>,
        kind: impl Into<KindTag>,
        entity: serde_json::Value,
        side: impl Into<SideId>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            entity,
            side: side.into(),
            modified,
            deleted: false,
        }
    }
}

/// One record from the continuous change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Opaque feed position, usable as a resume checkpoint
    pub sequence: Checkpoint,
    /// Identity of the changed document
    pub id: EntityId,
    /// Whether the change is a deletion
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    /// Leaf revisions the change introduced
    #[serde(default)]
    pub revisions_changed: Vec<RevisionId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn document_roundtrip() {
        let document = Document::new(
            "note-1",
            "note",
            json!({"body": "hello"}),
            "side-a",
            Utc::now(),
        );

        let json = serde_json::to_string(&document).unwrap();
        let parsed: Document = serde_json::from_str(&json).unwrap();

        assert_eq!(document, parsed);
    }

    #[test]
    fn deleted_flag_omitted_when_false() {
        let document = Document::new("note-1", "note", json!({}), "side-a", Utc::now());
        let value = serde_json::to_value(&document).unwrap();

        assert!(value.get("deleted").is_none());

        let mut tombstone = document;
        tombstone.deleted = true;
        let value = serde_json::to_value(&tombstone).unwrap();
        assert_eq!(value.get("deleted"), Some(&json!(true)));
    }

    #[test]
    fn change_record_wire_names() {
        let change = ChangeRecord {
            sequence: "42".into(),
            id: "note-1".into(),
            deleted: false,
            revisions_changed: vec!["2-abc".into()],
        };

        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value.get("sequence"), Some(&json!("42")));
        assert_eq!(value.get("revisionsChanged"), Some(&json!(["2-abc"])));
    }

    #[test]
    fn change_record_defaults() {
        // heartbeat-adjacent minimal record: no deleted flag, no revisions
        let change: ChangeRecord = serde_json::from_str(r#"{"sequence":"7","id":"x"}"#).unwrap();

        assert_eq!(change.sequence, "7");
        assert!(!change.deleted);
        assert!(change.revisions_changed.is_empty());
    }
}
