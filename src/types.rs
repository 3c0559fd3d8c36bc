//! Core type definitions for the record store
//!
//! Includes the closed set of field types, the typed field values carried by
//! records, and the identifiers shared by records and references.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Field Types (for dynamic schema)
// ============================================================================

/// Field type definition with SQL mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldType {
    /// Text field (maps to TEXT)
    String,

    /// Floating point number (maps to DOUBLE PRECISION)
    Number,

    /// Boolean field (maps to BOOLEAN)
    Boolean,

    /// Timestamp, always stored in UTC (maps to TIMESTAMPTZ)
    #[serde(rename = "datetime")]
    DateTime,

    /// Structured JSON, stored as binary JSON (maps to JSONB)
    Json,

    /// Name of registered asset metadata
    Asset,

    /// Geographic point (maps to PostGIS `geometry(Point, 4326)`)
    Location,

    /// Auto-incrementing integer backed by a per-column sequence (maps to BIGSERIAL)
    Sequence,

    /// Id of a record of the target type
    Reference {
        /// Record type the field points at
        target: String,
    },
}

impl FieldType {
    /// Create a Reference type pointing at `target`
    pub fn reference(target: impl Into<String>) -> Self {
        FieldType::Reference {
            target: target.into(),
        }
    }

    /// Convert field type to PostgreSQL column type string
    ///
    /// `schema` is the already quoted backend schema; asset columns carry a
    /// foreign key to its asset metadata table.
    pub fn to_sql_type(&self, schema: &str) -> String {
        match self {
            FieldType::String => "TEXT".to_string(),
            FieldType::Number => "DOUBLE PRECISION".to_string(),
            FieldType::Boolean => "BOOLEAN".to_string(),
            FieldType::DateTime => "TIMESTAMPTZ".to_string(),
            FieldType::Json => "JSONB".to_string(),
            FieldType::Asset => format!("TEXT REFERENCES {}.\"_asset\" (id)", schema),
            FieldType::Location => "geometry(Point, 4326)".to_string(),
            FieldType::Sequence => "BIGSERIAL".to_string(),
            FieldType::Reference { .. } => "TEXT".to_string(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Number => f.write_str("number"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::DateTime => f.write_str("datetime"),
            FieldType::Json => f.write_str("json"),
            FieldType::Asset => f.write_str("asset"),
            FieldType::Location => f.write_str("location"),
            FieldType::Sequence => f.write_str("sequence"),
            FieldType::Reference { target } => write!(f, "ref({})", target),
        }
    }
}

/// Declared fields of a record type, keyed by field name
pub type RecordSchema = BTreeMap<String, FieldType>;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifies a record: its type plus its key within that type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    pub record_type: String,
    pub key: String,
}

impl RecordId {
    pub fn new(record_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.record_type, self.key)
    }
}

/// A point on the globe, longitude first
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lng: f64,
    pub lat: f64,
}

impl Location {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

// ============================================================================
// Field Values
// ============================================================================

/// Typed value of a record field
///
/// Each variant corresponds to the field types it can be stored in; the pairing
/// is checked when a record is encoded for saving.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    /// JSON numbers and `Number` fields both decode as `f64`
    Number(f64),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Json(serde_json::Value),
    Location(Location),
    Reference(RecordId),
    /// Name of registered asset metadata
    Asset(String),
    Sequence(i64),
    Null,
}

impl Value {
    /// Name of the variant, used in validation messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::Location(_) => "location",
            Value::Reference(_) => "reference",
            Value::Asset(_) => "asset",
            Value::Sequence(_) => "sequence",
            Value::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Number(f64::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Value::Json(value)
    }
}

impl From<Location> for Value {
    fn from(value: Location) -> Self {
        Value::Location(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Value::Reference(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // =========================================================================
    // FieldType SQL Mapping Tests
    // =========================================================================

    #[test]
    fn test_scalar_sql_types() {
        assert_eq!(FieldType::String.to_sql_type("\"app\""), "TEXT");
        assert_eq!(FieldType::Number.to_sql_type("\"app\""), "DOUBLE PRECISION");
        assert_eq!(FieldType::Boolean.to_sql_type("\"app\""), "BOOLEAN");
        assert_eq!(FieldType::DateTime.to_sql_type("\"app\""), "TIMESTAMPTZ");
        assert_eq!(FieldType::Json.to_sql_type("\"app\""), "JSONB");
        assert_eq!(FieldType::Sequence.to_sql_type("\"app\""), "BIGSERIAL");
    }

    #[test]
    fn test_asset_references_asset_table() {
        assert_eq!(
            FieldType::Asset.to_sql_type("\"app_notes\""),
            "TEXT REFERENCES \"app_notes\".\"_asset\" (id)"
        );
    }

    #[test]
    fn test_location_and_reference_sql_types() {
        assert_eq!(
            FieldType::Location.to_sql_type("\"app\""),
            "geometry(Point, 4326)"
        );
        assert_eq!(FieldType::reference("category").to_sql_type("\"app\""), "TEXT");
    }

    // =========================================================================
    // FieldType Serialization Tests
    // =========================================================================

    #[test]
    fn test_field_type_serialization() {
        assert_eq!(
            serde_json::to_value(FieldType::DateTime).unwrap(),
            json!({"type": "datetime"})
        );
        assert_eq!(
            serde_json::to_value(FieldType::reference("category")).unwrap(),
            json!({"type": "reference", "target": "category"})
        );
    }

    #[test]
    fn test_record_schema_deserialization() {
        let schema: RecordSchema = serde_json::from_value(json!({
            "title": {"type": "string"},
            "seq": {"type": "sequence"},
            "category": {"type": "reference", "target": "category"}
        }))
        .unwrap();

        assert_eq!(schema.len(), 3);
        assert_eq!(schema["title"], FieldType::String);
        assert_eq!(schema["seq"], FieldType::Sequence);
        assert_eq!(schema["category"], FieldType::reference("category"));
    }

    #[test]
    fn test_field_type_display() {
        assert_eq!(FieldType::Json.to_string(), "json");
        assert_eq!(FieldType::reference("note").to_string(), "ref(note)");
    }

    // =========================================================================
    // Value Tests
    // =========================================================================

    #[test]
    fn test_value_conversions() {
        assert_eq!(Value::from("hi"), Value::String("hi".to_string()));
        assert_eq!(Value::from(3), Value::Number(3.0));
        assert_eq!(Value::from(true), Value::Boolean(true));
        assert_eq!(
            Value::from(Location::new(1.0, 2.0)),
            Value::Location(Location { lng: 1.0, lat: 2.0 })
        );
        assert_eq!(Value::from(json!([1, 2])).kind(), "json");
    }

    #[test]
    fn test_record_id_display() {
        assert_eq!(RecordId::new("note", "1").to_string(), "note/1");
    }
}
