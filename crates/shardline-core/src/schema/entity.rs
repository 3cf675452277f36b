//! Entity and attribute descriptions.
//!
//! An `Entity` is the runtime description of one logical record type: the
//! table it lives in, its primary key, its label attribute, and its ordered
//! attribute list. Entities are immutable once built; a schema edit produces
//! a new value.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{ShardlineError, ShardlineResult};
use crate::models::{Record, Value, DELETED_COLUMN};
use crate::query::guards::{clamp_page_size, DEFAULT_PAGE_SIZE};

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// True if `name` is safe to use as a bare SQL identifier.
pub fn is_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

// ---------------------------------------------------------------------------
// DataType + casters
// ---------------------------------------------------------------------------

/// Converts one raw lexical value into its storage representation.
pub type Caster = fn(&str) -> Result<Value, String>;

/// Declared type of an attribute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int,
    Float,
    Bool,
    Text,
    /// RFC 3339 instant, stored normalised to UTC text.
    Timestamp,
    /// Arbitrary JSON, stored as its compact text form.
    Json,
    /// Integer key of a record in another entity.
    Relation { entity: String },
}

impl DataType {
    /// Resolve the storage caster for this type.
    pub fn caster(&self) -> Caster {
        match self {
            DataType::Int | DataType::Relation { .. } => cast_int,
            DataType::Float => cast_float,
            DataType::Bool => cast_bool,
            DataType::Text => cast_text,
            DataType::Timestamp => cast_timestamp,
            DataType::Json => cast_json,
        }
    }

    /// SQLite column affinity for this type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            DataType::Int | DataType::Bool | DataType::Relation { .. } => "INTEGER",
            DataType::Float => "REAL",
            DataType::Text | DataType::Timestamp | DataType::Json => "TEXT",
        }
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, DataType::Text)
    }

    pub fn related_entity(&self) -> Option<&str> {
        match self {
            DataType::Relation { entity } => Some(entity),
            _ => None,
        }
    }
}

fn cast_int(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|_| format!("'{raw}' is not an integer"))
}

fn cast_float(raw: &str) -> Result<Value, String> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Value::Float(v)),
        _ => Err(format!("'{raw}' is not a finite number")),
    }
}

fn cast_bool(raw: &str) -> Result<Value, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
        "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
        _ => Err(format!("'{raw}' is not a boolean")),
    }
}

fn cast_text(raw: &str) -> Result<Value, String> {
    Ok(Value::Text(raw.to_string()))
}

fn cast_timestamp(raw: &str) -> Result<Value, String> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        let utc = ts.with_timezone(&Utc);
        return Ok(Value::Text(utc.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
    }
    // Bare dates are midnight UTC.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            let utc = midnight.and_utc();
            return Ok(Value::Text(utc.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }
    }
    Err(format!("'{raw}' is not an RFC 3339 timestamp"))
}

fn cast_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|v| Value::Text(v.to_string()))
        .map_err(|e| format!("invalid JSON: {e}"))
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// One typed field of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub field: String,
    #[serde(default)]
    pub display_label: String,
    pub data_type: DataType,
    #[serde(default = "default_true")]
    pub in_list: bool,
    #[serde(default = "default_true")]
    pub in_detail: bool,
    /// Natural key: enforced as UNIQUE by the migrator.
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub optional: bool,
}

impl Attribute {
    /// A required attribute shown in both list and detail views.
    pub fn new(field: impl Into<String>, data_type: DataType) -> Self {
        let field = field.into();
        Self {
            display_label: field.clone(),
            field,
            data_type,
            in_list: true,
            in_detail: true,
            unique: false,
            optional: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.display_label = label.into();
        self
    }

    pub fn detail_only(mut self) -> Self {
        self.in_list = false;
        self.in_detail = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn caster(&self) -> Caster {
        self.data_type.caster()
    }

    /// Cast a raw string into this attribute's storage type.
    pub fn cast(&self, raw: &str) -> Result<Value, String> {
        (self.caster())(raw).map_err(|e| format!("field '{}': {e}", self.field))
    }

    /// Cast a loosely typed JSON argument. Numbers and booleans are cast
    /// through their textual form so the caster stays the single authority.
    pub fn cast_json(&self, raw: &serde_json::Value) -> Result<Value, String> {
        match raw {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::String(s) => self.cast(s),
            serde_json::Value::Number(n) => self.cast(&n.to_string()),
            serde_json::Value::Bool(b) => self.cast(&b.to_string()),
            other if self.data_type == DataType::Json => self.cast(&other.to_string()),
            other => Err(format!(
                "field '{}': expected a scalar, got {other}",
                self.field
            )),
        }
    }

    /// Re-type a raw column value read back from storage.
    pub fn normalize(&self, value: Value) -> Value {
        match (&self.data_type, value) {
            (DataType::Bool, Value::Int(v)) => Value::Bool(v != 0),
            (DataType::Float, Value::Int(v)) => Value::Float(v as f64),
            (_, other) => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Which view an attribute subset is requested for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum View {
    List,
    Detail,
}

/// Runtime description of a logical record type.
#[derive(Clone, Debug, PartialEq)]
pub struct Entity {
    name: String,
    table_name: String,
    primary_key_field: String,
    label_attribute_field: String,
    default_page_size: u32,
    attributes: Vec<Attribute>,
}

impl Entity {
    /// Build an entity, checking the structural invariants: identifiers are
    /// SQL-safe, fields are unique, and exactly one attribute is the key.
    pub fn new(
        name: impl Into<String>,
        table_name: impl Into<String>,
        primary_key_field: impl Into<String>,
        label_attribute_field: Option<String>,
        default_page_size: Option<u32>,
        attributes: Vec<Attribute>,
    ) -> ShardlineResult<Self> {
        let name = name.into();
        let table_name = table_name.into();
        let primary_key_field = primary_key_field.into();

        if name.is_empty() {
            return Err(ShardlineError::Schema("entity name must not be empty".into()));
        }
        if !is_identifier(&table_name) {
            return Err(ShardlineError::Schema(format!(
                "entity '{name}': invalid table name '{table_name}'"
            )));
        }

        let mut seen = HashSet::new();
        for attr in &attributes {
            if !is_identifier(&attr.field) {
                return Err(ShardlineError::Schema(format!(
                    "entity '{name}': invalid field name '{}'",
                    attr.field
                )));
            }
            if attr.field == DELETED_COLUMN {
                return Err(ShardlineError::Schema(format!(
                    "entity '{name}': field name '{DELETED_COLUMN}' is reserved"
                )));
            }
            if !seen.insert(attr.field.as_str()) {
                return Err(ShardlineError::Schema(format!(
                    "entity '{name}': duplicate field '{}'",
                    attr.field
                )));
            }
        }

        let key = attributes
            .iter()
            .find(|a| a.field == primary_key_field)
            .ok_or_else(|| {
                ShardlineError::Schema(format!(
                    "entity '{name}': no attribute matches primary key '{primary_key_field}'"
                ))
            })?;
        if !matches!(key.data_type, DataType::Int | DataType::Text) {
            return Err(ShardlineError::Schema(format!(
                "entity '{name}': primary key '{primary_key_field}' must be int or text"
            )));
        }

        let label_attribute_field = label_attribute_field.unwrap_or_else(|| primary_key_field.clone());
        if !seen.contains(label_attribute_field.as_str()) {
            return Err(ShardlineError::Schema(format!(
                "entity '{name}': label attribute '{label_attribute_field}' does not exist"
            )));
        }

        Ok(Self {
            name,
            table_name,
            primary_key_field,
            label_attribute_field,
            default_page_size: clamp_page_size(default_page_size.unwrap_or(DEFAULT_PAGE_SIZE)),
            attributes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn primary_key_field(&self) -> &str {
        &self.primary_key_field
    }

    pub fn default_page_size(&self) -> u32 {
        self.default_page_size
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, field: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.field == field)
    }

    /// The key attribute. A miss means the schema is corrupt.
    pub fn key_attribute(&self) -> ShardlineResult<&Attribute> {
        self.attribute(&self.primary_key_field).ok_or_else(|| {
            ShardlineError::Schema(format!(
                "entity '{}': no attribute matches primary key '{}'",
                self.name, self.primary_key_field
            ))
        })
    }

    pub fn label_attribute(&self) -> Option<&Attribute> {
        self.attribute(&self.label_attribute_field)
    }

    /// Ordered attribute subset for a view, optionally narrowed to one type.
    pub fn attributes_for(&self, view: View, data_type: Option<&DataType>) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| match view {
                View::List => a.in_list,
                View::Detail => a.in_detail,
            })
            .filter(|a| data_type.map_or(true, |t| &a.data_type == t))
            .collect()
    }

    /// Re-type every known column of a record read back from storage.
    pub fn normalize_record(&self, record: &mut Record) {
        for (field, value) in record.iter_mut() {
            if let Some(attr) = self.attribute(field) {
                let raw = std::mem::replace(value, Value::Null);
                *value = attr.normalize(raw);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EntityDefinition (persisted form)
// ---------------------------------------------------------------------------

fn default_primary_key() -> String {
    "id".to_string()
}

/// Persisted schema metadata for one entity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub label_field: Option<String>,
    #[serde(default)]
    pub default_page_size: Option<u32>,
    pub attributes: Vec<Attribute>,
}

impl EntityDefinition {
    pub fn build(self) -> ShardlineResult<Entity> {
        let table_name = self.table_name.unwrap_or_else(|| self.name.clone());
        Entity::new(
            self.name,
            table_name,
            self.primary_key,
            self.label_field,
            self.default_page_size,
            self.attributes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> Entity {
        Entity::new(
            "post",
            "posts",
            "id",
            Some("title".into()),
            None,
            vec![
                Attribute::new("id", DataType::Int),
                Attribute::new("title", DataType::Text),
                Attribute::new("content", DataType::Text).detail_only(),
                Attribute::new("published", DataType::Bool),
                Attribute::new("score", DataType::Float).optional(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn casters_are_total_or_fail() {
        let int = DataType::Int.caster();
        assert_eq!(int(" 42 ").unwrap(), Value::Int(42));
        assert!(int("4x").is_err());

        let boolean = DataType::Bool.caster();
        assert_eq!(boolean("Yes").unwrap(), Value::Bool(true));
        assert_eq!(boolean("0").unwrap(), Value::Bool(false));
        assert!(boolean("maybe").is_err());

        let float = DataType::Float.caster();
        assert!(float("NaN").is_err());
        assert_eq!(float("1.5").unwrap(), Value::Float(1.5));
    }

    #[test]
    fn timestamp_normalises_to_utc() {
        let ts = DataType::Timestamp.caster();
        assert_eq!(
            ts("2024-03-01T10:00:00+02:00").unwrap(),
            Value::Text("2024-03-01T08:00:00Z".into())
        );
        assert_eq!(
            ts("2024-03-01").unwrap(),
            Value::Text("2024-03-01T00:00:00Z".into())
        );
        assert!(ts("yesterday").is_err());
    }

    #[test]
    fn json_caster_compacts() {
        let json = DataType::Json.caster();
        assert_eq!(
            json("{ \"a\" : 1 }").unwrap(),
            Value::Text("{\"a\":1}".into())
        );
        assert!(json("{").is_err());
    }

    #[test]
    fn cast_json_stringifies_scalars() {
        let attr = Attribute::new("published", DataType::Bool);
        assert_eq!(
            attr.cast_json(&serde_json::json!(true)).unwrap(),
            Value::Bool(true)
        );
        let err = attr.cast_json(&serde_json::json!([1])).unwrap_err();
        assert!(err.contains("published"));
    }

    #[test]
    fn view_subsets_keep_order() {
        let entity = post();
        let list: Vec<&str> = entity
            .attributes_for(View::List, None)
            .iter()
            .map(|a| a.field.as_str())
            .collect();
        assert_eq!(list, vec!["id", "title", "published", "score"]);

        let text: Vec<&str> = entity
            .attributes_for(View::Detail, Some(&DataType::Text))
            .iter()
            .map(|a| a.field.as_str())
            .collect();
        assert_eq!(text, vec!["title", "content"]);
    }

    #[test]
    fn missing_key_attribute_aborts_loading() {
        let err = Entity::new(
            "post",
            "posts",
            "uuid",
            None,
            None,
            vec![Attribute::new("id", DataType::Int)],
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn duplicate_and_reserved_fields_rejected() {
        let dup = Entity::new(
            "post",
            "posts",
            "id",
            None,
            None,
            vec![
                Attribute::new("id", DataType::Int),
                Attribute::new("id", DataType::Text),
            ],
        );
        assert!(dup.is_err());

        let reserved = Entity::new(
            "post",
            "posts",
            "id",
            None,
            None,
            vec![
                Attribute::new("id", DataType::Int),
                Attribute::new("deleted", DataType::Bool),
            ],
        );
        assert!(reserved.is_err());
    }

    #[test]
    fn normalize_record_restores_bools() {
        let entity = post();
        let mut record = Record::new();
        record.insert("published".into(), Value::Int(1));
        record.insert("score".into(), Value::Int(3));
        entity.normalize_record(&mut record);
        assert_eq!(record["published"], Value::Bool(true));
        assert_eq!(record["score"], Value::Float(3.0));
    }

    #[test]
    fn definition_from_json() {
        let def: EntityDefinition = serde_json::from_str(
            r#"{
                "name": "comment",
                "label_field": "body",
                "attributes": [
                    {"field": "id", "data_type": "int"},
                    {"field": "body", "data_type": "text"},
                    {"field": "post_id", "data_type": {"relation": {"entity": "post"}}}
                ]
            }"#,
        )
        .unwrap();
        let entity = def.build().unwrap();
        assert_eq!(entity.table_name(), "comment");
        assert_eq!(entity.default_page_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(
            entity.attribute("post_id").unwrap().data_type.related_entity(),
            Some("post")
        );
    }
}
