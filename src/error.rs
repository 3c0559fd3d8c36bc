//! Error types for record store operations

use thiserror::Error;

/// Errors that can occur during record store operations
///
/// Malformed queries (for example an `In` comparison between two key paths) are
/// not represented here: they indicate a defect in the code that built the query
/// and abort with a panic during compilation.
#[derive(Debug, Error)]
pub enum RecordStoreError {
    /// Record, user, device, relation or asset absent for the requested scope
    #[error("{0}")]
    NotFound(String),

    /// User id, username or email collision
    #[error("Duplicated: {0}")]
    Duplicated(String),

    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    /// Incompatible field type on extend, or a lost race creating a record type
    #[error("Schema conflict: {0}")]
    SchemaConflict(String),

    /// Record id already owned by another database scope
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dangling reference, asset or user
    #[error("{0}")]
    ReferentialIntegrity(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RecordStoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicated(msg: impl Into<String>) -> Self {
        Self::Duplicated(msg.into())
    }

    pub fn schema_not_found(msg: impl Into<String>) -> Self {
        Self::SchemaNotFound(msg.into())
    }

    pub fn schema_conflict(msg: impl Into<String>) -> Self {
        Self::SchemaConflict(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn referential_integrity(msg: impl Into<String>) -> Self {
        Self::ReferentialIntegrity(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Map a unique-constraint violation to `Duplicated`, passing other errors through.
    pub(crate) fn from_unique_violation(err: sqlx::Error, msg: impl Into<String>) -> Self {
        if is_unique_violation(&err) {
            Self::duplicated(msg)
        } else {
            Self::Sql(err)
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|e| e.is_foreign_key_violation())
}

/// `42P07 duplicate_table`, raised when two sessions create the same table.
pub(crate) fn is_duplicate_table(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .is_some_and(|code| code == "42P07")
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;
