//! Change data capture event model.
//!
//! Events arrive as JSON, one per line on the daemon's event stream:
//!
//! ```json
//! {"snapshotInfo":"s1","tables":[{"name":"edgex.deployment","rows":[{"id":{"value":"d1"}}]}]}
//! {"lastSequence":"42","changes":[{"operation":"delete","table":"edgex.deployment","oldRow":{"id":{"value":"d1"}}}]}
//! ```
//!
//! Operations may be names (`insert`, `update`, `delete`) or the numeric
//! codes 1, 2, 3.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One column value. `type` is the upstream column type code, unused here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnVal {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub column_type: Option<i32>,
}

impl ColumnVal {
    pub fn new(value: impl Into<serde_json::Value>) -> Self {
        Self {
            value: value.into(),
            column_type: None,
        }
    }
}

pub type Row = HashMap<String, ColumnVal>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub rows: Vec<Row>,
}

/// A full image of the upstream tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub snapshot_info: String,
    pub tables: Vec<Table>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "OperationRepr")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OperationRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<OperationRepr> for Operation {
    type Error = String;

    fn try_from(repr: OperationRepr) -> Result<Self, Self::Error> {
        match repr {
            OperationRepr::Code(1) => Ok(Self::Insert),
            OperationRepr::Code(2) => Ok(Self::Update),
            OperationRepr::Code(3) => Ok(Self::Delete),
            OperationRepr::Code(code) => Err(format!("unknown operation code {code}")),
            OperationRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "insert" => Ok(Self::Insert),
                "update" => Ok(Self::Update),
                "delete" => Ok(Self::Delete),
                _ => Err(format!("unknown operation {name:?}")),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub operation: Operation,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Row>,
}

/// An ordered batch of row-level changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sequence: Option<String>,
    pub changes: Vec<Change>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyncEvent {
    Snapshot(Snapshot),
    ChangeList(ChangeList),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_snapshot_line() {
        let event: SyncEvent = serde_json::from_str(
            r#"{"snapshotInfo":"s1","tables":[{"name":"edgex.deployment","rows":[{"id":{"value":"d1","type":25}}]}]}"#,
        )
        .unwrap();
        let SyncEvent::Snapshot(snapshot) = event else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.snapshot_info, "s1");
        let row = &snapshot.tables[0].rows[0];
        assert_eq!(row["id"].value, "d1");
        assert_eq!(row["id"].column_type, Some(25));
    }

    #[test]
    fn decodes_change_list_with_names_and_codes() {
        let event: SyncEvent = serde_json::from_str(
            r#"{"lastSequence":"42","changes":[
                {"operation":"insert","table":"t","newRow":{"id":{"value":"a"}}},
                {"operation":3,"table":"t","oldRow":{"id":{"value":"b"}}}
            ]}"#,
        )
        .unwrap();
        let SyncEvent::ChangeList(list) = event else {
            panic!("expected change list");
        };
        assert_eq!(list.last_sequence.as_deref(), Some("42"));
        assert_eq!(list.changes[0].operation, Operation::Insert);
        assert_eq!(list.changes[1].operation, Operation::Delete);
        assert!(list.changes[1].new_row.is_none());
    }

    #[test]
    fn rejects_unknown_operation() {
        let result = serde_json::from_str::<SyncEvent>(r#"{"changes":[{"operation":"upsert","table":"t"}]}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<SyncEvent>(r#"{"changes":[{"operation":9,"table":"t"}]}"#);
        assert!(result.is_err());
    }

    #[test]
    fn empty_snapshot_decodes() {
        let event: SyncEvent = serde_json::from_str(r#"{"snapshotInfo":"boot","tables":[]}"#).unwrap();
        assert!(matches!(event, SyncEvent::Snapshot(s) if s.tables.is_empty()));
    }
}
