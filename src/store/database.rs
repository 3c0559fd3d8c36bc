//! Scoped record operations

use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};

use crate::codec::{decode_field, decode_record, encode_value};
use crate::error::{RecordStoreError, Result};
use crate::query::Query;
use crate::record::{DatabaseScope, Record, RecordEvent, RecordEventKind};
use crate::schema::extend_schema;
use crate::sql::condition::meta_field_type;
use crate::sql::params::{QueryParams, SqlParam};
use crate::sql::sanitize::quote_identifier;
use crate::sql::select::{RowShape, compile_count, compile_select, record_columns};
use crate::store::RecordStore;
use crate::types::{FieldType, RecordId, RecordSchema, Value};

/// Records returned by [`Database::query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordCursor {
    records: Vec<Record>,
    overall_count: Option<u64>,
}

impl RecordCursor {
    /// Total matches ignoring limit and offset
    ///
    /// Only present when the query asked for a count and at least one record
    /// matched.
    pub fn overall_record_count(&self) -> Option<u64> {
        self.overall_count
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl IntoIterator for RecordCursor {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'c> IntoIterator for &'c RecordCursor {
    type Item = &'c Record;
    type IntoIter = std::slice::Iter<'c, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Record operations within one database scope
pub struct Database<'a> {
    store: &'a RecordStore,
    scope: DatabaseScope,
}

impl<'a> Database<'a> {
    pub(crate) fn new(store: &'a RecordStore, scope: DatabaseScope) -> Self {
        Self { store, scope }
    }

    pub fn scope(&self) -> &DatabaseScope {
        &self.scope
    }

    /// Value of `_database_id` for records in this scope
    pub fn database_id(&self) -> &str {
        self.scope.database_id()
    }

    fn table(&self, record_type: &str) -> String {
        self.store.ddl().table(record_type)
    }

    async fn schema_of(&self, conn: &mut PgConnection, record_type: &str) -> Result<Option<RecordSchema>> {
        self.store
            .schemas()
            .resolve(conn, &self.store.ddl(), record_type)
            .await
    }

    /// Like `schema_of`, but reloads a cached schema that lacks one of `names`
    ///
    /// Another handle may have extended the type since it was cached here.
    async fn schema_with(
        &self,
        conn: &mut PgConnection,
        record_type: &str,
        names: &[&str],
    ) -> Result<Option<RecordSchema>> {
        let schema = self.schema_of(conn, record_type).await?;
        let stale = schema.as_ref().is_some_and(|schema| {
            names
                .iter()
                .any(|name| meta_field_type(name).is_none() && schema.get(*name).is_none())
        });
        if !stale {
            return Ok(schema);
        }

        tracing::debug!(record_type, "schema cache stale, reloading");
        self.store.schemas().invalidate(record_type);
        self.schema_of(conn, record_type).await
    }

    // =========================================================================
    // Schema Operations
    // =========================================================================

    /// Make sure `record_type` exists with every field of `schema`
    ///
    /// Creates the type on first use and adds missing fields afterwards. A field
    /// already declared with another type fails with `SchemaConflict`; a
    /// reference to an unregistered type fails with `ReferentialIntegrity`.
    /// Record types are shared by every scope.
    pub async fn extend(&self, record_type: &str, schema: &RecordSchema) -> Result<()> {
        let ddl = self.store.ddl();
        let mut tx = self.store.pool().begin().await?;
        extend_schema(&mut tx, &ddl, record_type, schema).await?;
        tx.commit().await?;

        self.store.schemas().invalidate(record_type);
        Ok(())
    }

    /// Current schema of `record_type`
    pub async fn resolve_schema(&self, record_type: &str) -> Result<RecordSchema> {
        let mut conn = self.store.pool().acquire().await?;
        self.schema_of(&mut conn, record_type)
            .await?
            .ok_or_else(|| RecordStoreError::schema_not_found(record_type))
    }

    // =========================================================================
    // Record Operations
    // =========================================================================

    /// Fetch a record of this scope
    pub async fn get(&self, id: &RecordId) -> Result<Record> {
        let mut conn = self.store.pool().acquire().await?;
        let not_found = || RecordStoreError::not_found(format!("record {} not found", id));

        let Some(schema) = self.schema_of(&mut conn, &id.record_type).await? else {
            return Err(not_found());
        };

        let shape = RowShape::all(&schema);
        let sql = format!(
            "SELECT {} FROM {} WHERE \"_id\" = $1 AND \"_database_id\" = $2",
            record_columns(&shape.fields),
            self.table(&id.record_type)
        );
        let row = sqlx::query(&sql)
            .bind(&id.key)
            .bind(self.database_id())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(not_found)?;

        decode_record(&row, &id.record_type, &shape)
    }

    /// Insert or update a record in this scope
    ///
    /// The whole save runs in one transaction. Before anything is written the
    /// owner must be set, every data field must be declared with a matching
    /// type, and every reference and asset must exist. On update the owner and
    /// creation metadata are kept as stored. Persisted metadata, the scope and
    /// allocated sequence values are written back into `record`.
    ///
    /// Saving an id that already exists in another scope fails with `Conflict`.
    pub async fn save(&self, record: &mut Record) -> Result<()> {
        if record.owner_id.is_empty() {
            return Err(RecordStoreError::validation(format!(
                "cannot save {}: got empty OwnerID",
                record.id
            )));
        }

        let record_type = record.id.record_type.clone();
        let table = self.table(&record_type);
        let mut tx = self.store.pool().begin().await?;

        let names: Vec<&str> = record.data.keys().map(String::as_str).collect();
        let schema = self
            .schema_with(&mut tx, &record_type, &names)
            .await?
            .ok_or_else(|| RecordStoreError::schema_not_found(record_type.clone()))?;

        let mut fields = Vec::with_capacity(record.data.len());
        for (name, value) in &record.data {
            let field_type = schema.get(name).ok_or_else(|| {
                RecordStoreError::validation(format!(
                    "field '{}' is not defined on '{}'",
                    name, record_type
                ))
            })?;
            fields.push((name.as_str(), field_type, value));
        }

        self.check_referents(&mut tx, &fields).await?;

        let lookup = format!("SELECT \"_database_id\" FROM {} WHERE \"_id\" = $1 FOR UPDATE", table);
        let existing: Option<String> = sqlx::query_scalar(&lookup)
            .bind(&record.id.key)
            .fetch_optional(&mut *tx)
            .await?;

        let kind = match existing {
            Some(database_id) if database_id != self.database_id() => {
                tracing::warn!(record = %record.id, "save rejected: id belongs to another database");
                return Err(RecordStoreError::conflict(format!(
                    "record {} already exists in another database",
                    record.id
                )));
            }
            Some(_) => RecordEventKind::Updated,
            None => RecordEventKind::Created,
        };

        let sequences: Vec<&str> = schema
            .iter()
            .filter(|(_, field_type)| **field_type == FieldType::Sequence)
            .map(|(name, _)| name.as_str())
            .collect();
        let returning = ["_owner_id", "_created_at", "_created_by", "_updated_at", "_updated_by"]
            .into_iter()
            .chain(sequences.iter().copied())
            .map(quote_identifier)
            .collect::<Vec<_>>()
            .join(", ");

        let now = Utc::now();
        let updated_at = record.updated_at.unwrap_or(now);
        let updater_id = if record.updater_id.is_empty() {
            record.owner_id.clone()
        } else {
            record.updater_id.clone()
        };
        let acl = record
            .acl
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let mut params = QueryParams::new();
        let sql = match kind {
            RecordEventKind::Created => {
                let created_at = record.created_at.unwrap_or(now);
                let creator_id = if record.creator_id.is_empty() {
                    record.owner_id.clone()
                } else {
                    record.creator_id.clone()
                };

                let mut columns = vec![
                    "\"_id\"".to_string(),
                    "\"_database_id\"".to_string(),
                    "\"_owner_id\"".to_string(),
                    "\"_created_at\"".to_string(),
                    "\"_created_by\"".to_string(),
                    "\"_updated_at\"".to_string(),
                    "\"_updated_by\"".to_string(),
                    "\"_access\"".to_string(),
                ];
                let mut values = vec![
                    params.push(SqlParam::text(record.id.key.clone())),
                    params.push(SqlParam::text(self.database_id())),
                    params.push(SqlParam::text(record.owner_id.clone())),
                    params.push(SqlParam::Timestamp(Some(created_at))),
                    params.push(SqlParam::text(creator_id)),
                    params.push(SqlParam::Timestamp(Some(updated_at))),
                    params.push(SqlParam::text(updater_id)),
                    params.push(SqlParam::Json(acl)),
                ];
                for (name, field_type, value) in &fields {
                    if **field_type == FieldType::Sequence && value.is_null() {
                        continue;
                    }
                    columns.push(quote_identifier(name));
                    values.push(encode_value(&mut params, name, field_type, value)?);
                }

                format!(
                    "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                    table,
                    columns.join(", "),
                    values.join(", "),
                    returning
                )
            }
            _ => {
                let mut assignments = vec![
                    format!("\"_updated_at\" = {}", params.push(SqlParam::Timestamp(Some(updated_at)))),
                    format!("\"_updated_by\" = {}", params.push(SqlParam::text(updater_id))),
                    format!("\"_access\" = {}", params.push(SqlParam::Json(acl))),
                ];
                for (name, field_type, value) in &fields {
                    if **field_type == FieldType::Sequence && value.is_null() {
                        continue;
                    }
                    let encoded = encode_value(&mut params, name, field_type, value)?;
                    assignments.push(format!("{} = {}", quote_identifier(name), encoded));
                }
                let id = params.push(SqlParam::text(record.id.key.clone()));

                format!(
                    "UPDATE {} SET {} WHERE \"_id\" = {} RETURNING {}",
                    table,
                    assignments.join(", "),
                    id,
                    returning
                )
            }
        };

        let row = params
            .into_inner()
            .into_iter()
            .fold(sqlx::query(&sql), |query, param| param.bind(query))
            .fetch_one(&mut *tx)
            .await?;

        // A manually assigned sequence value re-bases its counter
        for (name, field_type, value) in &fields {
            if **field_type != FieldType::Sequence || value.is_null() {
                continue;
            }
            let Some(Value::Sequence(assigned)) = decode_field(&row, name, field_type)? else {
                continue;
            };
            sqlx::query("SELECT setval(pg_get_serial_sequence($1, $2), $3)")
                .bind(&table)
                .bind(*name)
                .bind(assigned)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        write_back(record, &row, self.database_id(), &sequences)?;
        tracing::debug!(record = %record.id, kind = ?kind, "saved record");
        self.store.publish(RecordEvent {
            record: record.clone(),
            kind,
        });
        Ok(())
    }

    /// Referenced records and assets must exist
    async fn check_referents(
        &self,
        conn: &mut PgConnection,
        fields: &[(&str, &FieldType, &Value)],
    ) -> Result<()> {
        for (name, field_type, value) in fields {
            match (field_type, value) {
                (FieldType::Reference { target }, Value::Reference(id)) => {
                    if &id.record_type != target {
                        return Err(RecordStoreError::validation(format!(
                            "field '{}' references '{}' records, got a reference to '{}'",
                            name, target, id
                        )));
                    }
                    let sql = format!(
                        "SELECT EXISTS (SELECT 1 FROM {} WHERE \"_id\" = $1)",
                        self.table(target)
                    );
                    let exists: bool = sqlx::query_scalar(&sql)
                        .bind(&id.key)
                        .fetch_one(&mut *conn)
                        .await?;
                    if !exists {
                        return Err(RecordStoreError::referential_integrity(format!(
                            "field '{}' references missing record {}",
                            name, id
                        )));
                    }
                }
                (FieldType::Asset, Value::Asset(asset)) => {
                    let sql = format!(
                        "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
                        self.table("_asset")
                    );
                    let exists: bool = sqlx::query_scalar(&sql)
                        .bind(asset)
                        .fetch_one(&mut *conn)
                        .await?;
                    if !exists {
                        return Err(RecordStoreError::referential_integrity(format!(
                            "field '{}' references missing asset '{}'",
                            name, asset
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Delete a record of this scope
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        let mut conn = self.store.pool().acquire().await?;
        let not_found = || RecordStoreError::not_found(format!("record {} not found", id));

        if self.schema_of(&mut conn, &id.record_type).await?.is_none() {
            return Err(not_found());
        }

        let sql = format!(
            "DELETE FROM {} WHERE \"_id\" = $1 AND \"_database_id\" = $2 RETURNING \"_owner_id\"",
            self.table(&id.record_type)
        );
        let owner_id: String = sqlx::query_scalar(&sql)
            .bind(&id.key)
            .bind(self.database_id())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(not_found)?;

        let mut record = Record::new(id.clone(), owner_id);
        record.database_id = self.database_id().to_string();
        self.store.publish(RecordEvent {
            record,
            kind: RecordEventKind::Deleted,
        });
        Ok(())
    }

    /// Run a query in this scope
    ///
    /// A type that was never extended has no records.
    ///
    /// # Panics
    /// Panics on malformed `In` predicates, see
    /// [`crate::sql::build_condition_clause`].
    pub async fn query(&self, query: &Query) -> Result<RecordCursor> {
        let mut conn = self.store.pool().acquire().await?;
        let Some(schema) = self
            .schema_with(&mut conn, &query.record_type, &query.key_paths())
            .await?
        else {
            return Ok(RecordCursor::default());
        };

        let table = self.table(&query.record_type);
        let (compiled, shape) = compile_select(query, &schema, &table, self.database_id())?;
        let rows = compiled.query().fetch_all(&mut *conn).await?;
        let records = rows
            .iter()
            .map(|row| decode_record(row, &query.record_type, &shape))
            .collect::<Result<Vec<_>>>()?;

        let overall_count = if query.get_count {
            let count = count_matches(&mut conn, query, &schema, &table, self.database_id()).await?;
            (count > 0).then_some(count)
        } else {
            None
        };

        Ok(RecordCursor {
            records,
            overall_count,
        })
    }

    /// Number of records in this scope matching `query`, ignoring paging
    pub async fn query_count(&self, query: &Query) -> Result<u64> {
        let mut conn = self.store.pool().acquire().await?;
        let Some(schema) = self
            .schema_with(&mut conn, &query.record_type, &query.key_paths())
            .await?
        else {
            return Ok(0);
        };

        let table = self.table(&query.record_type);
        count_matches(&mut conn, query, &schema, &table, self.database_id()).await
    }
}

async fn count_matches(
    conn: &mut PgConnection,
    query: &Query,
    schema: &RecordSchema,
    table: &str,
    database_id: &str,
) -> Result<u64> {
    let compiled = compile_count(query, schema, table, database_id)?;
    let row = compiled.query().fetch_one(&mut *conn).await?;
    let count: i64 = row.try_get("count")?;
    Ok(u64::try_from(count).unwrap_or_default())
}

fn write_back(record: &mut Record, row: &PgRow, database_id: &str, sequences: &[&str]) -> Result<()> {
    record.database_id = database_id.to_string();
    record.owner_id = row.try_get("_owner_id")?;
    record.created_at = row.try_get("_created_at")?;
    record.creator_id = row
        .try_get::<Option<String>, _>("_created_by")?
        .unwrap_or_default();
    record.updated_at = row.try_get("_updated_at")?;
    record.updater_id = row
        .try_get::<Option<String>, _>("_updated_by")?
        .unwrap_or_default();

    for name in sequences {
        match decode_field(row, name, &FieldType::Sequence)? {
            Some(value) => {
                record.data.insert(name.to_string(), value);
            }
            None => {
                record.data.remove(*name);
            }
        }
    }
    Ok(())
}
