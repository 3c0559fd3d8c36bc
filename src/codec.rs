//! Encoding of field values into bind parameters and decoding of rows into records
//!
//! Every `(FieldType, Value)` pairing is matched exhaustively; a value that does
//! not fit its declared field type is a validation error.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::error::{RecordStoreError, Result};
use crate::record::{AclEntry, Data, Record};
use crate::sql::params::{QueryParams, SqlParam};
use crate::sql::select::{ComputedColumn, RowShape};
use crate::types::{FieldType, Location, RecordId, Value};

/// SQL fragment building a PostGIS point from two bound coordinates
pub(crate) fn point_sql(params: &mut QueryParams, location: Location) -> String {
    let lng = params.push(SqlParam::Float(Some(location.lng)));
    let lat = params.push(SqlParam::Float(Some(location.lat)));
    format!("ST_SetSRID(ST_MakePoint({}, {}), 4326)", lng, lat)
}

/// Encode `value` for storage in a column of `field_type`
///
/// Returns the SQL fragment to place in an INSERT/UPDATE, usually a single
/// placeholder.
pub(crate) fn encode_value(
    params: &mut QueryParams,
    field: &str,
    field_type: &FieldType,
    value: &Value,
) -> Result<String> {
    let param = match (field_type, value) {
        (FieldType::Location, Value::Location(location)) => {
            return Ok(point_sql(params, *location));
        }
        (FieldType::Location, Value::Null) => return Ok("NULL".to_string()),

        (FieldType::String, Value::String(s)) => SqlParam::Text(Some(s.clone())),
        (FieldType::String, Value::Null) => SqlParam::Text(None),

        (FieldType::Number, Value::Number(n)) => SqlParam::Float(Some(*n)),
        (FieldType::Number, Value::Sequence(n)) => SqlParam::Float(Some(*n as f64)),
        (FieldType::Number, Value::Null) => SqlParam::Float(None),

        (FieldType::Boolean, Value::Boolean(b)) => SqlParam::Bool(Some(*b)),
        (FieldType::Boolean, Value::Null) => SqlParam::Bool(None),

        (FieldType::DateTime, Value::DateTime(dt)) => SqlParam::Timestamp(Some(*dt)),
        (FieldType::DateTime, Value::Null) => SqlParam::Timestamp(None),

        (FieldType::Json, Value::Json(json)) => SqlParam::Json(Some(json.clone())),
        (FieldType::Json, Value::String(s)) => SqlParam::Json(Some(serde_json::Value::from(s.as_str()))),
        (FieldType::Json, Value::Number(n)) => SqlParam::Json(Some(serde_json::Value::from(*n))),
        (FieldType::Json, Value::Boolean(b)) => SqlParam::Json(Some(serde_json::Value::Bool(*b))),
        (FieldType::Json, Value::Null) => SqlParam::Json(None),

        (FieldType::Asset, Value::Asset(name)) => SqlParam::Text(Some(name.clone())),
        (FieldType::Asset, Value::Null) => SqlParam::Text(None),

        (FieldType::Sequence, Value::Sequence(n)) => SqlParam::Integer(Some(*n)),
        (FieldType::Sequence, Value::Number(n)) if n.fract() == 0.0 => {
            SqlParam::Integer(Some(*n as i64))
        }

        (FieldType::Reference { target }, Value::Reference(id)) => {
            if &id.record_type != target {
                return Err(RecordStoreError::validation(format!(
                    "field '{}' references '{}' records, got a reference to '{}'",
                    field, target, id
                )));
            }
            SqlParam::Text(Some(id.key.clone()))
        }
        (FieldType::Reference { .. }, Value::Null) => SqlParam::Text(None),

        (field_type, value) => {
            return Err(RecordStoreError::validation(format!(
                "field '{}' of type {} cannot hold a {} value",
                field,
                field_type,
                value.kind()
            )));
        }
    };

    Ok(params.push(param))
}

/// Decode one column; SQL NULL decodes to `None`
pub(crate) fn decode_field(row: &PgRow, column: &str, field_type: &FieldType) -> Result<Option<Value>> {
    let value = match field_type {
        FieldType::String => row.try_get::<Option<String>, _>(column)?.map(Value::String),
        FieldType::Number => row.try_get::<Option<f64>, _>(column)?.map(Value::Number),
        FieldType::Boolean => row.try_get::<Option<bool>, _>(column)?.map(Value::Boolean),
        FieldType::DateTime => row
            .try_get::<Option<DateTime<Utc>>, _>(column)?
            .map(Value::DateTime),
        FieldType::Json => row
            .try_get::<Option<serde_json::Value>, _>(column)?
            .map(|json| Value::Json(normalize_json_numbers(json))),
        FieldType::Asset => row.try_get::<Option<String>, _>(column)?.map(Value::Asset),
        FieldType::Location => match row.try_get::<Option<Vec<f64>>, _>(column)? {
            Some(coords) => match coords.as_slice() {
                [lng, lat] => Some(Value::Location(Location::new(*lng, *lat))),
                _ => {
                    return Err(RecordStoreError::validation(format!(
                        "location column '{}' decoded to {} coordinates",
                        column,
                        coords.len()
                    )));
                }
            },
            None => None,
        },
        FieldType::Sequence => row.try_get::<Option<i64>, _>(column)?.map(Value::Sequence),
        FieldType::Reference { target } => row
            .try_get::<Option<String>, _>(column)?
            .map(|key| Value::Reference(RecordId::new(target.clone(), key))),
    };
    Ok(value)
}

/// JSON numbers always come back as floating point
fn normalize_json_numbers(json: serde_json::Value) -> serde_json::Value {
    match json {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Number(n)),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(normalize_json_numbers).collect())
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_json_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Decode a row selected with [`crate::sql::select::record_columns`]
pub(crate) fn decode_record(row: &PgRow, record_type: &str, shape: &RowShape) -> Result<Record> {
    let key: String = row.try_get("_id")?;
    let acl = row
        .try_get::<Option<serde_json::Value>, _>("_access")?
        .map(serde_json::from_value::<Vec<AclEntry>>)
        .transpose()?;

    let mut data = Data::new();
    for (name, field_type) in &shape.fields {
        if let Some(value) = decode_field(row, name, field_type)? {
            data.insert(name.clone(), value);
        }
    }

    let mut transient = Data::new();
    for column in &shape.computed {
        match column {
            ComputedColumn::Number { name, alias } => {
                if let Some(n) = row.try_get::<Option<f64>, _>(alias.as_str())? {
                    transient.insert(name.clone(), Value::Number(n));
                }
            }
            ComputedColumn::Field {
                name,
                alias,
                field_type,
            } => {
                if let Some(value) = decode_field(row, alias, field_type)? {
                    transient.insert(name.clone(), value);
                }
            }
            ComputedColumn::Constant { name, value } => {
                transient.insert(name.clone(), value.clone());
            }
        }
    }

    Ok(Record {
        id: RecordId::new(record_type, key),
        database_id: row.try_get("_database_id")?,
        owner_id: row.try_get("_owner_id")?,
        created_at: row.try_get("_created_at")?,
        creator_id: row.try_get::<Option<String>, _>("_created_by")?.unwrap_or_default(),
        updated_at: row.try_get("_updated_at")?,
        updater_id: row.try_get::<Option<String>, _>("_updated_by")?.unwrap_or_default(),
        acl,
        data,
        transient,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn encode(field_type: &FieldType, value: &Value) -> Result<(String, Vec<SqlParam>)> {
        let mut params = QueryParams::new();
        let sql = encode_value(&mut params, "f", field_type, value)?;
        Ok((sql, params.into_inner()))
    }

    // =========================================================================
    // Accepted Encodings
    // =========================================================================

    #[test]
    fn test_encode_scalars() {
        let (sql, params) = encode(&FieldType::String, &Value::from("hi")).unwrap();
        assert_eq!(sql, "$1");
        assert_eq!(params, vec![SqlParam::text("hi")]);

        let (_, params) = encode(&FieldType::Number, &Value::Number(2.5)).unwrap();
        assert_eq!(params, vec![SqlParam::Float(Some(2.5))]);

        let dt = Utc.with_ymd_and_hms(2006, 1, 2, 15, 4, 5).unwrap();
        let (_, params) = encode(&FieldType::DateTime, &Value::DateTime(dt)).unwrap();
        assert_eq!(params, vec![SqlParam::Timestamp(Some(dt))]);
    }

    #[test]
    fn test_encode_location_uses_two_params() {
        let (sql, params) = encode(&FieldType::Location, &Value::Location(Location::new(1.0, 2.0))).unwrap();
        assert_eq!(sql, "ST_SetSRID(ST_MakePoint($1, $2), 4326)");
        assert_eq!(params, vec![SqlParam::Float(Some(1.0)), SqlParam::Float(Some(2.0))]);
    }

    #[test]
    fn test_encode_null_location_binds_nothing() {
        let (sql, params) = encode(&FieldType::Location, &Value::Null).unwrap();
        assert_eq!(sql, "NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_encode_reference_binds_key() {
        let (_, params) = encode(
            &FieldType::reference("category"),
            &Value::Reference(RecordId::new("category", "c1")),
        )
        .unwrap();
        assert_eq!(params, vec![SqlParam::text("c1")]);
    }

    #[test]
    fn test_encode_json_accepts_scalars() {
        let (_, params) = encode(&FieldType::Json, &Value::from("text")).unwrap();
        assert_eq!(params, vec![SqlParam::Json(Some(json!("text")))]);

        let (_, params) = encode(&FieldType::Json, &Value::Json(json!({"a": [1, 2]}))).unwrap();
        assert_eq!(params, vec![SqlParam::Json(Some(json!({"a": [1, 2]})))]);
    }

    #[test]
    fn test_encode_sequence_from_whole_number() {
        let (_, params) = encode(&FieldType::Sequence, &Value::Number(10.0)).unwrap();
        assert_eq!(params, vec![SqlParam::Integer(Some(10))]);
    }

    // =========================================================================
    // Rejected Encodings
    // =========================================================================

    #[test]
    fn test_encode_type_mismatch() {
        let err = encode(&FieldType::Number, &Value::from("1")).unwrap_err();
        assert!(matches!(err, RecordStoreError::Validation(_)));
        assert!(err.to_string().contains("cannot hold a string value"));
    }

    #[test]
    fn test_encode_reference_to_wrong_type() {
        let err = encode(
            &FieldType::reference("category"),
            &Value::Reference(RecordId::new("note", "n1")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("references 'category' records"));
    }

    #[test]
    fn test_encode_fractional_sequence() {
        assert!(encode(&FieldType::Sequence, &Value::Number(1.5)).is_err());
    }

    // =========================================================================
    // JSON Normalization
    // =========================================================================

    #[test]
    fn test_json_numbers_become_floats() {
        let normalized = normalize_json_numbers(json!({"n": 1, "list": [2, "x", {"m": 3}]}));
        assert_eq!(normalized, json!({"n": 1.0, "list": [2.0, "x", {"m": 3.0}]}));
        assert!(normalized["n"].is_f64());
        assert!(normalized["list"][2]["m"].is_f64());
    }
}
