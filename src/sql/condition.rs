//! Predicate to SQL compilation
//!
//! Converts a [`Predicate`] tree into a parameterized PostgreSQL WHERE clause.
//! Key paths resolve against the record schema; literals are always bound.

use crate::codec::point_sql;
use crate::error::{RecordStoreError, Result};
use crate::query::{CompareOp, Expression, Function, Predicate, Sort, SortKey, SortOrder};
use crate::sql::params::{QueryParams, SqlParam};
use crate::sql::sanitize::quote_identifier;
use crate::types::{FieldType, RecordSchema, Value};

/// Type of a builtin metadata key path, or `None` for ordinary names
pub(crate) fn meta_field_type(name: &str) -> Option<FieldType> {
    match name {
        "_id" | "_database_id" | "_owner_id" | "_created_by" | "_updated_by" => {
            Some(FieldType::String)
        }
        "_created_at" | "_updated_at" => Some(FieldType::DateTime),
        _ => None,
    }
}

/// Resolve a key path to its quoted column and declared type
pub(crate) fn resolve_key_path(name: &str, schema: &RecordSchema) -> Result<(String, FieldType)> {
    if let Some(field_type) = meta_field_type(name) {
        return Ok((quote_identifier(name), field_type));
    }

    schema
        .get(name)
        .map(|field_type| (quote_identifier(name), field_type.clone()))
        .ok_or_else(|| RecordStoreError::validation(format!("unknown key path '{}'", name)))
}

/// Build a SQL WHERE clause from a predicate
///
/// # Arguments
/// * `predicate` - The predicate tree to compile
/// * `schema` - Fields of the queried record type
/// * `params` - Receives the bind values; placeholders continue its numbering
///
/// # Panics
/// Panics when an `In` comparison does not pair exactly one key path with a
/// literal operand, in either order (for example two key paths). Such a query
/// cannot be rendered and indicates a defect in the code that built it.
pub fn build_condition_clause(
    predicate: &Predicate,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    match predicate {
        Predicate::And(children) => build_logical(children, " AND ", "TRUE", schema, params),
        Predicate::Or(children) => build_logical(children, " OR ", "FALSE", schema, params),
        Predicate::Not(child) => {
            let inner = build_condition_clause(child, schema, params)?;
            Ok(format!("NOT ({})", inner))
        }
        Predicate::Compare { op, left, right } => {
            build_comparison(*op, left, right, schema, params)
        }
    }
}

fn build_logical(
    children: &[Predicate],
    separator: &str,
    empty: &str,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    if children.is_empty() {
        return Ok(empty.to_string());
    }

    let clauses = children
        .iter()
        .map(|child| build_condition_clause(child, schema, params).map(|c| format!("({})", c)))
        .collect::<Result<Vec<_>>>()?;

    Ok(clauses.join(separator))
}

fn build_comparison(
    op: CompareOp,
    left: &Expression,
    right: &Expression,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    if op == CompareOp::In {
        return build_in(left, right, schema, params);
    }

    if matches!(op, CompareOp::Equal | CompareOp::NotEqual) {
        let operand = match (left, right) {
            (other, Expression::Literal(Value::Null)) => Some(other),
            (Expression::Literal(Value::Null), other) => Some(other),
            _ => None,
        };
        if let Some(operand) = operand {
            let sql = render_operand(operand, None, schema, params)?;
            let negation = if op == CompareOp::NotEqual { "NOT " } else { "" };
            return Ok(format!("{} IS {}NULL", sql, negation));
        }
    }

    let left_type = key_path_type(left, schema);
    let right_type = key_path_type(right, schema);
    let left_sql = render_operand(left, right_type.as_ref(), schema, params)?;
    let right_sql = render_operand(right, left_type.as_ref(), schema, params)?;

    Ok(format!("{} {} {}", left_sql, op.sql_operator(), right_sql))
}

fn build_in(
    left: &Expression,
    right: &Expression,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    match (left, right) {
        (Expression::KeyPath(name), Expression::LiteralList(values))
        | (Expression::LiteralList(values), Expression::KeyPath(name)) => {
            build_in_list(name, values, schema, params)
        }
        (Expression::Literal(value), Expression::KeyPath(name)) => {
            let (column, field_type) = resolve_key_path(name, schema)?;
            if field_type != FieldType::Json {
                return Err(RecordStoreError::validation(format!(
                    "'{}' is a {} field; containment needs a json array field",
                    name, field_type
                )));
            }
            let element = literal_json(value)?;
            let placeholder = params.push(SqlParam::Json(Some(serde_json::Value::Array(vec![
                element,
            ]))));
            Ok(format!("{} @> {}", column, placeholder))
        }
        (Expression::KeyPath(a), Expression::KeyPath(b)) => panic!(
            "malformed query: In compares key paths '{}' and '{}'; one operand must be a literal",
            a, b
        ),
        (left, right) => panic!(
            "malformed query: In needs a key path and a literal operand, got {:?} and {:?}",
            left, right
        ),
    }
}

/// `column IN (...)`; an empty list matches nothing
fn build_in_list(
    name: &str,
    values: &[Value],
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    let (column, field_type) = resolve_key_path(name, schema)?;
    if values.is_empty() {
        return Ok("FALSE".to_string());
    }
    let placeholders = values
        .iter()
        .map(|value| literal_param(value, Some(&field_type)).map(|p| params.push(p)))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("{} IN ({})", column, placeholders.join(", ")))
}

fn key_path_type(expression: &Expression, schema: &RecordSchema) -> Option<FieldType> {
    match expression {
        Expression::KeyPath(name) => resolve_key_path(name, schema).ok().map(|(_, t)| t),
        _ => None,
    }
}

/// Render an operand; `hint` is the type of the column on the other side
fn render_operand(
    expression: &Expression,
    hint: Option<&FieldType>,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    match expression {
        Expression::Literal(value) => Ok(params.push(literal_param(value, hint)?)),
        other => render_expression(other, schema, params),
    }
}

/// Render an expression usable in a comparison, a sort or a computed key
pub fn render_expression(
    expression: &Expression,
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    match expression {
        Expression::KeyPath(name) => resolve_key_path(name, schema).map(|(column, _)| column),
        Expression::Literal(value) => Ok(params.push(literal_param(value, None)?)),
        Expression::LiteralList(_) => Err(RecordStoreError::validation(
            "a literal list is only valid as the right operand of In",
        )),
        Expression::Function(function) => render_function(function, schema, params),
    }
}

fn render_function(function: &Function, schema: &RecordSchema, params: &mut QueryParams) -> Result<String> {
    match function {
        Function::Distance { field, origin } => {
            match schema.get(field) {
                Some(FieldType::Location) => {}
                Some(other) => {
                    return Err(RecordStoreError::validation(format!(
                        "distance needs a location field, '{}' is {}",
                        field, other
                    )));
                }
                None => {
                    return Err(RecordStoreError::validation(format!(
                        "unknown key path '{}'",
                        field
                    )));
                }
            }
            let point = point_sql(params, *origin);
            Ok(format!("ST_DistanceSphere({}, {})", quote_identifier(field), point))
        }
    }
}

/// Bind value for a literal compared against a column of type `hint`
fn literal_param(value: &Value, hint: Option<&FieldType>) -> Result<SqlParam> {
    if hint == Some(&FieldType::Json) && !value.is_null() {
        return Ok(SqlParam::Json(Some(literal_json(value)?)));
    }

    let param = match value {
        Value::String(s) => SqlParam::Text(Some(s.clone())),
        Value::Number(n) => SqlParam::Float(Some(*n)),
        Value::Boolean(b) => SqlParam::Bool(Some(*b)),
        Value::DateTime(dt) => SqlParam::Timestamp(Some(*dt)),
        Value::Json(json) => SqlParam::Json(Some(json.clone())),
        Value::Reference(id) => SqlParam::Text(Some(id.key.clone())),
        Value::Asset(name) => SqlParam::Text(Some(name.clone())),
        Value::Sequence(n) => SqlParam::Integer(Some(*n)),
        Value::Location(_) => {
            return Err(RecordStoreError::validation(
                "locations can only be compared through a distance function",
            ));
        }
        Value::Null => SqlParam::Text(None),
    };
    Ok(param)
}

fn literal_json(value: &Value) -> Result<serde_json::Value> {
    let json = match value {
        Value::String(s) | Value::Asset(s) => serde_json::Value::from(s.as_str()),
        Value::Number(n) => serde_json::Value::from(*n),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Json(json) => json.clone(),
        Value::Reference(id) => serde_json::Value::from(id.key.as_str()),
        Value::Sequence(n) => serde_json::Value::from(*n),
        Value::DateTime(dt) => serde_json::Value::from(dt.to_rfc3339()),
        Value::Null => serde_json::Value::Null,
        Value::Location(_) => {
            return Err(RecordStoreError::validation(
                "a location cannot be matched against a json field",
            ));
        }
    };
    Ok(json)
}

/// Build the ORDER BY list (without the `ORDER BY` prefix)
///
/// Returns an empty string when there are no sorts.
pub fn build_order_by_clause(
    sorts: &[Sort],
    schema: &RecordSchema,
    params: &mut QueryParams,
) -> Result<String> {
    let parts = sorts
        .iter()
        .map(|sort| {
            let expression = match &sort.key {
                SortKey::KeyPath(name) => resolve_key_path(name, schema).map(|(column, _)| column)?,
                SortKey::Function(function) => render_function(function, schema, params)?,
            };
            let direction = match sort.order {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            Ok(format!("{} {}", expression, direction))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(parts.join(", "))
}
