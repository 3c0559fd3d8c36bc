//! Record type registry
//!
//! The authoritative schema of each record type lives in the `_record_type`
//! metadata table next to the record tables. [`SchemaRegistry`] caches resolved
//! schemas for one store handle; extending a type invalidates its entry.

use std::collections::HashMap;

use parking_lot::RwLock;
use sqlx::{PgConnection, Row};

use crate::error::{self, RecordStoreError, Result};
use crate::sql::ddl::DdlGenerator;
use crate::sql::sanitize::validate_name;
use crate::types::{FieldType, RecordSchema};

/// Per-handle cache of record schemas
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    cache: RwLock<HashMap<String, RecordSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached schema of `record_type`, without touching the database
    pub fn cached(&self, record_type: &str) -> Option<RecordSchema> {
        self.cache.read().get(record_type).cloned()
    }

    /// Drop the cached schema of `record_type`
    pub fn invalidate(&self, record_type: &str) {
        self.cache.write().remove(record_type);
    }

    /// Resolve `record_type`, reading the metadata table on a cache miss
    ///
    /// Returns `None` when the type has never been extended.
    pub(crate) async fn resolve(
        &self,
        conn: &mut PgConnection,
        ddl: &DdlGenerator<'_>,
        record_type: &str,
    ) -> Result<Option<RecordSchema>> {
        if let Some(schema) = self.cached(record_type) {
            return Ok(Some(schema));
        }

        tracing::debug!(record_type = %record_type, "schema cache miss");
        let schema = load_schema(conn, ddl, record_type, false).await?;
        if let Some(schema) = &schema {
            self.cache
                .write()
                .insert(record_type.to_string(), schema.clone());
        }
        Ok(schema)
    }
}

async fn load_schema(
    conn: &mut PgConnection,
    ddl: &DdlGenerator<'_>,
    record_type: &str,
    for_update: bool,
) -> Result<Option<RecordSchema>> {
    let sql = format!(
        "SELECT fields FROM {} WHERE record_type = $1{}",
        ddl.table("_record_type"),
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(record_type)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(|row| {
        let fields: serde_json::Value = row.try_get("fields")?;
        Ok(serde_json::from_value::<RecordSchema>(fields)?)
    })
    .transpose()
}

/// Fields of `desired` missing from `current`
///
/// Every field present in both must keep its type; the first mismatch in field
/// name order is reported as a schema conflict.
pub fn diff_schema(current: &RecordSchema, desired: &RecordSchema) -> Result<Vec<(String, FieldType)>> {
    let mut missing = Vec::new();
    for (name, field_type) in desired {
        match current.get(name) {
            Some(existing) if existing == field_type => {}
            Some(existing) => {
                return Err(RecordStoreError::schema_conflict(format!(
                    "field '{}': conflicting schema {} => {}",
                    name, existing, field_type
                )));
            }
            None => missing.push((name.clone(), field_type.clone())),
        }
    }
    Ok(missing)
}

/// Create or extend `record_type` so that it holds every field of `desired`
///
/// Runs on the caller's transaction and returns the merged schema.
pub(crate) async fn extend_schema(
    conn: &mut PgConnection,
    ddl: &DdlGenerator<'_>,
    record_type: &str,
    desired: &RecordSchema,
) -> Result<RecordSchema> {
    validate_name(record_type, "Record type").map_err(RecordStoreError::Validation)?;
    for name in desired.keys() {
        validate_name(name, "Field").map_err(RecordStoreError::Validation)?;
    }

    let current = load_schema(conn, ddl, record_type, true).await?;
    let added = match &current {
        Some(current) => diff_schema(current, desired)?,
        None => desired
            .iter()
            .map(|(name, field_type)| (name.clone(), field_type.clone()))
            .collect(),
    };

    if current.is_some() && added.is_empty() {
        return Ok(current.unwrap_or_default());
    }

    check_reference_targets(conn, ddl, record_type, current.is_some(), &added).await?;

    if added
        .iter()
        .any(|(_, field_type)| *field_type == FieldType::Location)
    {
        sqlx::query(&ddl.generate_enable_postgis())
            .execute(&mut *conn)
            .await?;
    }

    let metadata_table = ddl.table("_record_type");
    let merged = match current {
        None => {
            create_record_table(conn, ddl, record_type, desired).await?;
            let insert = format!(
                "INSERT INTO {} (record_type, fields) VALUES ($1, $2)",
                metadata_table
            );
            sqlx::query(&insert)
                .bind(record_type)
                .bind(serde_json::to_value(desired)?)
                .execute(&mut *conn)
                .await
                .map_err(|e| lost_creation_race(e, record_type))?;

            tracing::info!(record_type = %record_type, fields = desired.len(), "created record type");
            desired.clone()
        }
        Some(mut merged) => {
            for statement in ddl.generate_add_columns(record_type, &added) {
                sqlx::query(&statement).execute(&mut *conn).await?;
            }
            merged.extend(added.iter().cloned());

            let update = format!(
                "UPDATE {} SET fields = $2, updated_at = NOW() WHERE record_type = $1",
                metadata_table
            );
            sqlx::query(&update)
                .bind(record_type)
                .bind(serde_json::to_value(&merged)?)
                .execute(&mut *conn)
                .await?;

            tracing::info!(
                record_type = %record_type,
                added = ?added.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
                "extended record type"
            );
            merged
        }
    };

    Ok(merged)
}

async fn create_record_table(
    conn: &mut PgConnection,
    ddl: &DdlGenerator<'_>,
    record_type: &str,
    fields: &RecordSchema,
) -> Result<()> {
    sqlx::query(&ddl.generate_create_table(record_type, fields))
        .execute(&mut *conn)
        .await
        .map_err(|e| lost_creation_race(e, record_type))?;
    sqlx::query(&ddl.generate_scope_index(record_type))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Another session created the same type first
fn lost_creation_race(err: sqlx::Error, record_type: &str) -> RecordStoreError {
    if error::is_duplicate_table(&err) || error::is_unique_violation(&err) {
        RecordStoreError::schema_conflict(format!(
            "record type '{}' was created concurrently",
            record_type
        ))
    } else {
        RecordStoreError::Sql(err)
    }
}

/// Every reference field being added must target a registered type
async fn check_reference_targets(
    conn: &mut PgConnection,
    ddl: &DdlGenerator<'_>,
    record_type: &str,
    exists: bool,
    added: &[(String, FieldType)],
) -> Result<()> {
    let targets: Vec<String> = added
        .iter()
        .filter_map(|(_, field_type)| match field_type {
            FieldType::Reference { target } => Some(target.clone()),
            _ => None,
        })
        .collect();
    if targets.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "SELECT record_type FROM {} WHERE record_type = ANY($1)",
        ddl.table("_record_type")
    );
    let registered: Vec<String> = sqlx::query_scalar(&sql)
        .bind(&targets)
        .fetch_all(&mut *conn)
        .await?;

    for (name, field_type) in added {
        if let FieldType::Reference { target } = field_type {
            let self_reference = exists && target == record_type;
            if !self_reference && !registered.contains(target) {
                return Err(RecordStoreError::referential_integrity(format!(
                    "field '{}' of '{}' references unregistered record type '{}'",
                    name, record_type, target
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(fields: &[(&str, FieldType)]) -> RecordSchema {
        fields
            .iter()
            .map(|(name, field_type)| (name.to_string(), field_type.clone()))
            .collect()
    }

    // ==================== diff_schema Tests ====================

    #[test]
    fn test_diff_identical_is_empty() {
        let current = schema(&[("title", FieldType::String), ("seq", FieldType::Sequence)]);
        assert!(diff_schema(&current, &current.clone()).unwrap().is_empty());
    }

    #[test]
    fn test_diff_reports_missing_fields() {
        let current = schema(&[("title", FieldType::String)]);
        let desired = schema(&[
            ("title", FieldType::String),
            ("done", FieldType::Boolean),
            ("owner", FieldType::reference("user")),
        ]);
        assert_eq!(
            diff_schema(&current, &desired).unwrap(),
            vec![
                ("done".to_string(), FieldType::Boolean),
                ("owner".to_string(), FieldType::reference("user")),
            ]
        );
    }

    #[test]
    fn test_diff_subset_is_empty() {
        let current = schema(&[("a", FieldType::String), ("b", FieldType::Number)]);
        let desired = schema(&[("b", FieldType::Number)]);
        assert!(diff_schema(&current, &desired).unwrap().is_empty());
    }

    #[test]
    fn test_diff_conflict_names_both_types() {
        let current = schema(&[("title", FieldType::String)]);
        let desired = schema(&[("title", FieldType::Number)]);
        let err = diff_schema(&current, &desired).unwrap_err();
        assert!(matches!(err, RecordStoreError::SchemaConflict(_)));
        assert!(err.to_string().contains("conflicting schema string => number"));
    }

    #[test]
    fn test_diff_conflict_regardless_of_order() {
        let current = schema(&[("a", FieldType::String), ("z", FieldType::Boolean)]);
        let desired = schema(&[("new", FieldType::Json), ("z", FieldType::Number)]);
        assert!(diff_schema(&current, &desired).is_err());
    }

    #[test]
    fn test_diff_reference_target_change_conflicts() {
        let current = schema(&[("parent", FieldType::reference("a"))]);
        let desired = schema(&[("parent", FieldType::reference("b"))]);
        let err = diff_schema(&current, &desired).unwrap_err();
        assert!(err.to_string().contains("ref(a) => ref(b)"));
    }

    // ==================== Cache Tests ====================

    #[test]
    fn test_cache_invalidate() {
        let registry = SchemaRegistry::new();
        assert!(registry.cached("note").is_none());

        registry
            .cache
            .write()
            .insert("note".into(), schema(&[("title", FieldType::String)]));
        assert_eq!(
            registry.cached("note"),
            Some(schema(&[("title", FieldType::String)]))
        );

        registry.invalidate("note");
        assert!(registry.cached("note").is_none());
    }
}
