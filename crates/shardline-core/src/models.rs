//! Shared typed models used across the schema, query, store, and sync layers.

use std::fmt;

use indexmap::IndexMap;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::errors::{ShardlineError, ShardlineResult};

/// Name of the soft-delete flag column carried by every entity table.
pub const DELETED_COLUMN: &str = "deleted";

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A scalar already cast into its storage type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value as plain text, `None` for null.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }

    /// Build a value from a raw SQLite column.
    pub fn from_sql_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                Value::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(text) => f.write_str(&text),
            None => f.write_str("null"),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Bool(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(i64::from(*v))),
            Value::Int(v) => ToSqlOutput::Owned(rusqlite::types::Value::Integer(*v)),
            Value::Float(v) => ToSqlOutput::Owned(rusqlite::types::Value::Real(*v)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// One row of an entity, keyed by attribute field name in selection order.
pub type Record = IndexMap<String, Value>;

// ---------------------------------------------------------------------------
// RecordMessage
// ---------------------------------------------------------------------------

/// The mutation kind carried by a change event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
        };
        f.write_str(name)
    }
}

/// Change-event payload published on the record topic.
///
/// Carries identity only. Consumers always re-read the current record state
/// through the entity-aware read path instead of trusting a payload copy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecordMessage {
    pub operation: Operation,
    pub entity_name: String,
    pub record_id: String,
    /// Routes the consumer's re-read to the shard that owns the record.
    #[serde(default)]
    pub partition_key: u64,
}

impl RecordMessage {
    pub fn new(
        operation: Operation,
        entity_name: impl Into<String>,
        record_id: impl Into<String>,
        partition_key: u64,
    ) -> Self {
        Self {
            operation,
            entity_name: entity_name.into(),
            record_id: record_id.into(),
            partition_key,
        }
    }

    /// Uniqueness key: `<entity>_<record id>`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.entity_name, self.record_id)
    }

    pub fn encode(&self) -> ShardlineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> ShardlineResult<Self> {
        serde_json::from_slice(bytes).map_err(ShardlineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_message_key_joins_entity_and_id() {
        let msg = RecordMessage::new(Operation::Create, "post", "42", 7);
        assert_eq!(msg.key(), "post_42");
    }

    #[test]
    fn record_message_wire_format() {
        let msg = RecordMessage::new(Operation::Update, "post", "42", 7);
        let json: serde_json::Value = serde_json::from_slice(&msg.encode().unwrap()).unwrap();
        assert_eq!(json["Operation"], "Update");
        assert_eq!(json["EntityName"], "post");
        assert_eq!(json["RecordId"], "42");

        let legacy = br#"{"Operation":"Delete","EntityName":"post","RecordId":"9"}"#;
        let decoded = RecordMessage::decode(legacy).unwrap();
        assert_eq!(decoded.operation, Operation::Delete);
        assert_eq!(decoded.partition_key, 0);
    }

    #[test]
    fn bool_binds_as_integer() {
        let out = Value::Bool(true).to_sql().unwrap();
        assert!(matches!(
            out,
            ToSqlOutput::Owned(rusqlite::types::Value::Integer(1))
        ));
    }

    #[test]
    fn value_from_sql_ref() {
        assert_eq!(Value::from_sql_ref(ValueRef::Integer(3)), Value::Int(3));
        assert_eq!(
            Value::from_sql_ref(ValueRef::Text(b"hi")),
            Value::Text("hi".into())
        );
        assert_eq!(Value::from_sql_ref(ValueRef::Null), Value::Null);
    }
}
