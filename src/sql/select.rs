//! SELECT statement assembly for record queries

use crate::error::{RecordStoreError, Result};
use crate::query::{Expression, Query};
use crate::sql::condition::{
    build_condition_clause, build_order_by_clause, meta_field_type, render_expression,
};
use crate::sql::params::{CompiledQuery, QueryParams, SqlParam};
use crate::sql::sanitize::quote_identifier;
use crate::types::{FieldType, RecordSchema, Value};

/// Builtin metadata columns present on every record table
pub const META_COLUMNS: &[&str] = &[
    "_id",
    "_database_id",
    "_owner_id",
    "_created_at",
    "_created_by",
    "_updated_at",
    "_updated_by",
    "_access",
];

/// How a computed key is read back from a row
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedColumn {
    /// Function result, read as a float
    Number { name: String, alias: String },
    /// Copy of a field or metadata column
    Field {
        name: String,
        alias: String,
        field_type: FieldType,
    },
    /// Literal, never sent to the backend
    Constant { name: String, value: Value },
}

/// Columns a compiled SELECT returns besides the metadata columns
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowShape {
    pub fields: Vec<(String, FieldType)>,
    pub computed: Vec<ComputedColumn>,
}

impl RowShape {
    /// Every declared field, no computed keys
    pub fn all(schema: &RecordSchema) -> Self {
        Self {
            fields: schema
                .iter()
                .map(|(name, field_type)| (name.clone(), field_type.clone()))
                .collect(),
            computed: Vec::new(),
        }
    }
}

/// Select expression for `column`, aliased to `alias`
///
/// Locations are read as a `[lng, lat]` float array.
fn column_expression(column: &str, field_type: &FieldType, alias: &str) -> String {
    let quoted = quote_identifier(column);
    match field_type {
        FieldType::Location => format!(
            "CASE WHEN {q} IS NULL THEN NULL ELSE ARRAY[ST_X({q}), ST_Y({q})] END AS {a}",
            q = quoted,
            a = quote_identifier(alias)
        ),
        _ if column == alias => quoted,
        _ => format!("{} AS {}", quoted, quote_identifier(alias)),
    }
}

/// Select list of metadata columns followed by `fields`
pub fn record_columns(fields: &[(String, FieldType)]) -> String {
    META_COLUMNS
        .iter()
        .map(|column| quote_identifier(column))
        .chain(
            fields
                .iter()
                .map(|(name, field_type)| column_expression(name, field_type, name)),
        )
        .collect::<Vec<_>>()
        .join(", ")
}

fn projected_fields(query: &Query, schema: &RecordSchema) -> Result<Vec<(String, FieldType)>> {
    let Some(keys) = &query.desired_keys else {
        return Ok(RowShape::all(schema).fields);
    };

    let mut fields = Vec::with_capacity(keys.len());
    for key in keys {
        if meta_field_type(key).is_some() {
            continue;
        }
        let field_type = schema.get(key).ok_or_else(|| {
            RecordStoreError::validation(format!(
                "desired key '{}' is not defined on '{}'",
                key, query.record_type
            ))
        })?;
        if !fields.iter().any(|(name, _)| name == key) {
            fields.push((key.clone(), field_type.clone()));
        }
    }
    Ok(fields)
}

fn where_clause(
    scope: &str,
    query: &Query,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    let mut clause = format!("\"_database_id\" = {}", scope);
    if let Some(predicate) = &query.predicate {
        let condition = build_condition_clause(predicate, schema, params)?;
        clause.push_str(&format!(" AND ({})", condition));
    }
    Ok(clause)
}

/// Compile a record query into a SELECT over `table` (already qualified)
///
/// Rows are restricted to `database_id`. Without sorts, rows come back in
/// creation order; `_id` breaks ties in both cases.
///
/// # Panics
/// Panics on malformed `In` predicates, see [`build_condition_clause`].
pub fn compile_select(
    query: &Query,
    schema: &RecordSchema,
    table: &str,
    database_id: &str,
) -> Result<(CompiledQuery, RowShape)> {
    let fields = projected_fields(query, schema)?;
    let mut params = QueryParams::new();
    let scope = params.push(SqlParam::text(database_id));

    let mut select_list = vec![record_columns(&fields)];
    let mut computed = Vec::with_capacity(query.computed_keys.len());
    for (name, expression) in &query.computed_keys {
        let alias = format!("_transient_{}", name);
        match expression {
            Expression::Literal(value) => computed.push(ComputedColumn::Constant {
                name: name.clone(),
                value: value.clone(),
            }),
            Expression::KeyPath(key) => {
                let field_type = meta_field_type(key)
                    .or_else(|| schema.get(key).cloned())
                    .ok_or_else(|| {
                        RecordStoreError::validation(format!("unknown key path '{}'", key))
                    })?;
                select_list.push(column_expression(key, &field_type, &alias));
                computed.push(ComputedColumn::Field {
                    name: name.clone(),
                    alias,
                    field_type,
                });
            }
            Expression::Function(_) | Expression::LiteralList(_) => {
                let sql = render_expression(expression, schema, &mut params)?;
                select_list.push(format!("{} AS {}", sql, quote_identifier(&alias)));
                computed.push(ComputedColumn::Number {
                    name: name.clone(),
                    alias,
                });
            }
        }
    }

    let filter = where_clause(&scope, query, schema, &mut params)?;

    let order_by = build_order_by_clause(&query.sorts, schema, &mut params)?;
    let order_by = if order_by.is_empty() {
        "\"_created_at\" ASC, \"_id\" ASC".to_string()
    } else {
        format!("{}, \"_id\" ASC", order_by)
    };

    let mut sql = format!(
        "SELECT {} FROM {} WHERE {} ORDER BY {}",
        select_list.join(", "),
        table,
        filter,
        order_by
    );

    if let Some(limit) = query.limit {
        let placeholder = params.push(SqlParam::Integer(Some(clamp_i64(limit))));
        sql.push_str(&format!(" LIMIT {}", placeholder));
    }
    if query.offset > 0 {
        let placeholder = params.push(SqlParam::Integer(Some(clamp_i64(query.offset))));
        sql.push_str(&format!(" OFFSET {}", placeholder));
    }

    tracing::debug!(record_type = %query.record_type, sql = %sql, "compiled record query");

    Ok((CompiledQuery::new(sql, params), RowShape { fields, computed }))
}

/// Compile the match count of `query`, ignoring sorts, limit and offset
pub fn compile_count(
    query: &Query,
    schema: &RecordSchema,
    table: &str,
    database_id: &str,
) -> Result<CompiledQuery> {
    let mut params = QueryParams::new();
    let scope = params.push(SqlParam::text(database_id));
    let filter = where_clause(&scope, query, schema, &mut params)?;
    let sql = format!(
        "SELECT COUNT(*) AS \"count\" FROM {} WHERE {}",
        table, filter
    );
    Ok(CompiledQuery::new(sql, params))
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{CompareOp, Function, Predicate, Sort, SortOrder};
    use crate::types::Location;

    const TABLE: &str = "\"app_test\".\"note\"";
    const META: &str = "\"_id\", \"_database_id\", \"_owner_id\", \"_created_at\", \"_created_by\", \"_updated_at\", \"_updated_by\", \"_access\"";

    fn schema() -> RecordSchema {
        RecordSchema::from([
            ("content".to_string(), FieldType::String),
            ("noteOrder".to_string(), FieldType::Number),
            ("place".to_string(), FieldType::Location),
        ])
    }

    // ==================== Projection ====================

    #[test]
    fn test_select_all_fields() {
        let (compiled, shape) = compile_select(&Query::new("note"), &schema(), TABLE, "").unwrap();
        assert_eq!(
            compiled.sql,
            format!(
                "SELECT {}, \"content\", \"noteOrder\", CASE WHEN \"place\" IS NULL THEN NULL ELSE ARRAY[ST_X(\"place\"), ST_Y(\"place\")] END AS \"place\" FROM {} WHERE \"_database_id\" = $1 ORDER BY \"_created_at\" ASC, \"_id\" ASC",
                META, TABLE
            )
        );
        assert_eq!(compiled.params, vec![SqlParam::text("")]);
        assert_eq!(shape.fields.len(), 3);
    }

    #[test]
    fn test_desired_keys_restrict_columns() {
        let query = Query::new("note").with_desired_keys(["content"]);
        let (compiled, shape) = compile_select(&query, &schema(), TABLE, "").unwrap();
        assert!(compiled.sql.starts_with(&format!("SELECT {}, \"content\" FROM", META)));
        assert_eq!(shape.fields, vec![("content".to_string(), FieldType::String)]);
    }

    #[test]
    fn test_empty_desired_keys_select_metadata_only() {
        let query = Query::new("note").with_desired_keys(Vec::<String>::new());
        let (compiled, shape) = compile_select(&query, &schema(), TABLE, "").unwrap();
        assert!(compiled.sql.starts_with(&format!("SELECT {} FROM", META)));
        assert!(shape.fields.is_empty());
    }

    #[test]
    fn test_undefined_desired_key_is_an_error() {
        let query = Query::new("note").with_desired_keys(["content", "nothing"]);
        let err = compile_select(&query, &schema(), TABLE, "").unwrap_err();
        assert!(matches!(err, RecordStoreError::Validation(_)));
        assert!(err.to_string().contains("'nothing'"));
    }

    // ==================== Filtering, Sorting and Paging ====================

    #[test]
    fn test_predicate_sort_and_paging() {
        let query = Query::new("note")
            .with_predicate(Predicate::eq("noteOrder", 1))
            .with_sort(Sort::desc("noteOrder"))
            .with_pagination(10, 20);
        let (compiled, _) = compile_select(&query, &schema(), TABLE, "alice").unwrap();

        assert!(compiled.sql.ends_with(
            "WHERE \"_database_id\" = $1 AND (\"noteOrder\" = $2) ORDER BY \"noteOrder\" DESC, \"_id\" ASC LIMIT $3 OFFSET $4"
        ));
        assert_eq!(
            compiled.params,
            vec![
                SqlParam::text("alice"),
                SqlParam::Float(Some(1.0)),
                SqlParam::Integer(Some(10)),
                SqlParam::Integer(Some(20)),
            ]
        );
    }

    #[test]
    fn test_distance_computed_key_and_sort() {
        let origin = Location::new(0.0, 0.0);
        let query = Query::new("note")
            .with_computed_key("distance", crate::query::Expression::distance("place", origin))
            .with_sort(Sort::by_function(
                Function::Distance {
                    field: "place".into(),
                    origin,
                },
                SortOrder::Descending,
            ));
        let (compiled, shape) = compile_select(&query, &schema(), TABLE, "").unwrap();

        assert!(compiled.sql.contains(
            "ST_DistanceSphere(\"place\", ST_SetSRID(ST_MakePoint($2, $3), 4326)) AS \"_transient_distance\""
        ));
        assert!(compiled.sql.contains(
            "ORDER BY ST_DistanceSphere(\"place\", ST_SetSRID(ST_MakePoint($4, $5), 4326)) DESC, \"_id\" ASC"
        ));
        assert_eq!(compiled.params.len(), 5);
        assert_eq!(
            shape.computed,
            vec![ComputedColumn::Number {
                name: "distance".into(),
                alias: "_transient_distance".into(),
            }]
        );
    }

    #[test]
    fn test_literal_computed_key_is_not_sent() {
        let query = Query::new("note").with_computed_key("answer", crate::query::Expression::literal(42));
        let (compiled, shape) = compile_select(&query, &schema(), TABLE, "").unwrap();
        assert!(!compiled.sql.contains("_transient_"));
        assert_eq!(
            shape.computed,
            vec![ComputedColumn::Constant {
                name: "answer".into(),
                value: Value::Number(42.0),
            }]
        );
    }

    // ==================== Count ====================

    #[test]
    fn test_count_ignores_paging_and_sorts() {
        let query = Query::new("note")
            .with_predicate(Predicate::compare(
                CompareOp::GreaterThan,
                crate::query::Expression::key_path("noteOrder"),
                crate::query::Expression::literal(1),
            ))
            .with_sort(Sort::asc("noteOrder"))
            .with_pagination(1, 1);
        let compiled = compile_count(&query, &schema(), TABLE, "").unwrap();
        assert_eq!(
            compiled.sql,
            format!(
                "SELECT COUNT(*) AS \"count\" FROM {} WHERE \"_database_id\" = $1 AND (\"noteOrder\" > $2)",
                TABLE
            )
        );
        assert_eq!(compiled.params.len(), 2);
    }
}
