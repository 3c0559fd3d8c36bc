//! DDL Generation for Dynamic Record Types
//!
//! Generates PostgreSQL DDL for the application schema, its internal tables and
//! the per-type record tables.

use crate::config::StoreConfig;
use crate::sql::sanitize::{qualified_name, quote_identifier};
use crate::types::{FieldType, RecordSchema};

/// Metadata columns every record table starts with
const META_COLUMN_DEFINITIONS: &[&str] = &[
    "\"_id\" TEXT NOT NULL",
    "\"_database_id\" TEXT NOT NULL",
    "\"_owner_id\" TEXT NOT NULL",
    "\"_created_at\" TIMESTAMPTZ NOT NULL",
    "\"_created_by\" TEXT",
    "\"_updated_at\" TIMESTAMPTZ NOT NULL",
    "\"_updated_by\" TEXT",
    "\"_access\" JSONB",
];

/// DDL Generator for the application schema
pub struct DdlGenerator<'a> {
    config: &'a StoreConfig,
}

impl<'a> DdlGenerator<'a> {
    /// Create a new DDL generator with the given configuration
    pub fn new(config: &'a StoreConfig) -> Self {
        Self { config }
    }

    fn schema(&self) -> String {
        quote_identifier(&self.config.schema_name())
    }

    /// Qualified name of a table in the application schema
    pub fn table(&self, name: &str) -> String {
        qualified_name(&self.config.schema_name(), name)
    }

    pub fn generate_create_schema(&self) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema())
    }

    pub fn generate_enable_postgis(&self) -> String {
        "CREATE EXTENSION IF NOT EXISTS postgis".to_string()
    }

    /// Tables the store itself needs, in dependency order
    pub fn generate_internal_tables(&self) -> Vec<String> {
        let user = self.table("_user");
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 record_type TEXT PRIMARY KEY, \
                 fields JSONB NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
                 updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
                self.table("_record_type")
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id TEXT PRIMARY KEY, \
                 username TEXT UNIQUE, \
                 email TEXT UNIQUE, \
                 password BYTEA, \
                 auth JSONB NOT NULL DEFAULT '{{}}'::jsonb)",
                user
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id TEXT PRIMARY KEY, \
                 type TEXT NOT NULL, \
                 token TEXT, \
                 user_id TEXT NOT NULL REFERENCES {} (id) ON DELETE CASCADE, \
                 last_registered_at TIMESTAMPTZ NOT NULL)",
                self.table("_device"),
                user
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 seq BIGSERIAL, \
                 name TEXT NOT NULL, \
                 from_id TEXT NOT NULL REFERENCES {u} (id) ON DELETE CASCADE, \
                 to_id TEXT NOT NULL REFERENCES {u} (id) ON DELETE CASCADE, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(), \
                 PRIMARY KEY (name, from_id, to_id))",
                self.table("_relation"),
                u = user
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (\
                 id TEXT PRIMARY KEY, \
                 content_type TEXT NOT NULL, \
                 size BIGINT NOT NULL)",
                self.table("_asset")
            ),
        ]
    }

    /// Generate CREATE TABLE for a record type
    ///
    /// The table holds the metadata columns followed by one column per field.
    /// `_id` is the primary key, so a record id belongs to exactly one scope.
    pub fn generate_create_table(&self, record_type: &str, fields: &RecordSchema) -> String {
        let column_defs = META_COLUMN_DEFINITIONS
            .iter()
            .map(|def| def.to_string())
            .chain(
                fields
                    .iter()
                    .map(|(name, field_type)| self.format_column_definition(name, field_type)),
            )
            .chain(std::iter::once("PRIMARY KEY (\"_id\")".to_string()))
            .collect::<Vec<_>>();

        format!(
            "CREATE TABLE {} ({})",
            self.table(record_type),
            column_defs.join(", ")
        )
    }

    /// Index serving scoped queries in creation order
    pub fn generate_scope_index(&self, record_type: &str) -> String {
        format!(
            "CREATE INDEX ON {} (\"_database_id\", \"_created_at\")",
            self.table(record_type)
        )
    }

    /// Generate ALTER TABLE statements adding `fields`
    pub fn generate_add_columns(
        &self,
        record_type: &str,
        fields: &[(String, FieldType)],
    ) -> Vec<String> {
        let table = self.table(record_type);
        fields
            .iter()
            .map(|(name, field_type)| {
                format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    table,
                    self.format_column_definition(name, field_type)
                )
            })
            .collect()
    }

    /// Format a single column definition
    pub fn format_column_definition(&self, name: &str, field_type: &FieldType) -> String {
        format!(
            "{} {}",
            quote_identifier(name),
            field_type.to_sql_type(&self.schema())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StoreConfig {
        StoreConfig::builder("postgres://localhost/test", "notes").build()
    }

    const META: &str = "\"_id\" TEXT NOT NULL, \"_database_id\" TEXT NOT NULL, \"_owner_id\" TEXT NOT NULL, \"_created_at\" TIMESTAMPTZ NOT NULL, \"_created_by\" TEXT, \"_updated_at\" TIMESTAMPTZ NOT NULL, \"_updated_by\" TEXT, \"_access\" JSONB";

    // ==================== CREATE TABLE Tests ====================

    #[test]
    fn test_generate_create_table_metadata_only() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        let sql = ddl.generate_create_table("note", &RecordSchema::new());
        assert_eq!(
            sql,
            format!(
                "CREATE TABLE \"app_notes\".\"note\" ({}, PRIMARY KEY (\"_id\"))",
                META
            )
        );
    }

    #[test]
    fn test_generate_create_table_with_fields() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        let fields = RecordSchema::from([
            ("content".to_string(), FieldType::String),
            ("image".to_string(), FieldType::Asset),
            ("seq".to_string(), FieldType::Sequence),
        ]);
        let sql = ddl.generate_create_table("note", &fields);
        assert_eq!(
            sql,
            format!(
                "CREATE TABLE \"app_notes\".\"note\" ({}, \"content\" TEXT, \"image\" TEXT REFERENCES \"app_notes\".\"_asset\" (id), \"seq\" BIGSERIAL, PRIMARY KEY (\"_id\"))",
                META
            )
        );
    }

    #[test]
    fn test_generate_create_table_special_name() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        let sql = ddl.generate_create_table("table:name", &RecordSchema::new());
        assert!(sql.starts_with("CREATE TABLE \"app_notes\".\"table:name\" ("));
    }

    // ==================== ALTER TABLE Tests ====================

    #[test]
    fn test_generate_add_columns() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        let statements = ddl.generate_add_columns(
            "note",
            &[
                ("place".to_string(), FieldType::Location),
                ("category".to_string(), FieldType::reference("category")),
            ],
        );
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE \"app_notes\".\"note\" ADD COLUMN \"place\" geometry(Point, 4326)",
                "ALTER TABLE \"app_notes\".\"note\" ADD COLUMN \"category\" TEXT",
            ]
        );
    }

    #[test]
    fn test_generate_add_columns_none() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        assert!(ddl.generate_add_columns("note", &[]).is_empty());
    }

    #[test]
    fn test_column_name_needs_quoting() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        assert_eq!(
            ddl.format_column_definition("say \"hi\"", &FieldType::Boolean),
            "\"say \"\"hi\"\"\" BOOLEAN"
        );
    }

    // ==================== Internal Tables ====================

    #[test]
    fn test_generate_create_schema() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        assert_eq!(
            ddl.generate_create_schema(),
            "CREATE SCHEMA IF NOT EXISTS \"app_notes\""
        );
    }

    #[test]
    fn test_internal_tables_order() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        let statements = ddl.generate_internal_tables();
        assert_eq!(statements.len(), 5);
        assert!(statements[0].contains("\"app_notes\".\"_record_type\""));
        assert!(statements[1].contains("\"app_notes\".\"_user\""));
        assert!(statements[2].contains("REFERENCES \"app_notes\".\"_user\" (id) ON DELETE CASCADE"));
        assert!(statements[3].contains("PRIMARY KEY (name, from_id, to_id)"));
        assert!(statements[4].contains("\"app_notes\".\"_asset\""));
        assert!(statements.iter().all(|s| s.starts_with("CREATE TABLE IF NOT EXISTS")));
    }

    #[test]
    fn test_scope_index() {
        let cfg = config();
        let ddl = DdlGenerator::new(&cfg);
        assert_eq!(
            ddl.generate_scope_index("note"),
            "CREATE INDEX ON \"app_notes\".\"note\" (\"_database_id\", \"_created_at\")"
        );
    }
}
