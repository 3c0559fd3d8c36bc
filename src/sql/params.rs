//! Positional bind parameters
//!
//! Literals are never interpolated into SQL text. Compilers push typed values
//! into [`QueryParams`] and splice the returned `$n` placeholder instead.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, Postgres};
use sqlx::query::Query;

/// A typed bind value; `None` binds a NULL of the matching SQL type
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(Option<String>),
    Float(Option<f64>),
    Integer(Option<i64>),
    Bool(Option<bool>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<serde_json::Value>),
}

impl SqlParam {
    pub fn text(value: impl Into<String>) -> Self {
        SqlParam::Text(Some(value.into()))
    }

    /// Bind this value as the next positional argument of `query`
    pub fn bind<'q>(
        self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            SqlParam::Text(v) => query.bind(v),
            SqlParam::Float(v) => query.bind(v),
            SqlParam::Integer(v) => query.bind(v),
            SqlParam::Bool(v) => query.bind(v),
            SqlParam::Timestamp(v) => query.bind(v),
            SqlParam::Json(v) => query.bind(v),
        }
    }
}

/// Accumulates bind values and hands out their placeholders
#[derive(Debug, Default)]
pub struct QueryParams {
    params: Vec<SqlParam>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value and return its `$n` placeholder
    pub fn push(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn into_inner(self) -> Vec<SqlParam> {
        self.params
    }
}

/// SQL text together with its bind values, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl CompiledQuery {
    pub fn new(sql: String, params: QueryParams) -> Self {
        Self {
            sql,
            params: params.into_inner(),
        }
    }

    /// Build an executable query borrowing this statement's SQL text
    pub fn query(&self) -> Query<'_, Postgres, PgArguments> {
        self.params
            .iter()
            .cloned()
            .fold(sqlx::query(&self.sql), |query, param| param.bind(query))
    }
}
