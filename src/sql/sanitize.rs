//! SQL Identifier Quoting Utilities
//!
//! Record types and field names come from application code and may contain any
//! character, so every identifier is quoted rather than restricted.

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use runtara_record_store::sql::quote_identifier;
///
/// assert_eq!(quote_identifier("table:name"), "\"table:name\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote `table` inside `schema`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

/// Validate a record type or field name supplied by application code
///
/// Names must be non-empty and must not begin with `_`, which is reserved for
/// engine tables and metadata columns.
pub fn validate_name(name: &str, kind: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{} name cannot be empty", kind));
    }

    if name.starts_with('_') {
        return Err(format!(
            "{} name '{}' is reserved: names beginning with '_' belong to the store",
            kind, name
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // quote_identifier Tests
    // =========================================================================

    #[test]
    fn test_quote_identifier_simple() {
        assert_eq!(quote_identifier("note"), "\"note\"");
        assert_eq!(quote_identifier("noteOrder"), "\"noteOrder\"");
    }

    #[test]
    fn test_quote_identifier_with_quotes() {
        assert_eq!(
            quote_identifier("table\"with\"quotes"),
            "\"table\"\"with\"\"quotes\""
        );
    }

    #[test]
    fn test_quote_identifier_with_delimiters() {
        assert_eq!(quote_identifier("table:name"), "\"table:name\"");
        assert_eq!(quote_identifier("my table"), "\"my table\"");
        assert_eq!(quote_identifier("a.b"), "\"a.b\"");
        assert_eq!(quote_identifier("x'; DROP TABLE y; --"), "\"x'; DROP TABLE y; --\"");
    }

    #[test]
    fn test_quote_identifier_unicode() {
        assert_eq!(quote_identifier("日本語"), "\"日本語\"");
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("app_notes", "note"), "\"app_notes\".\"note\"");
        assert_eq!(
            qualified_name("app_notes", "table:name"),
            "\"app_notes\".\"table:name\""
        );
    }

    // =========================================================================
    // validate_name Tests
    // =========================================================================

    #[test]
    fn test_validate_name_accepts_arbitrary_characters() {
        assert!(validate_name("note", "Record type").is_ok());
        assert!(validate_name("table:name", "Record type").is_ok());
        assert!(validate_name("Mixed Case-name", "Field").is_ok());
    }

    #[test]
    fn test_validate_name_empty() {
        let err = validate_name("", "Field").unwrap_err();
        assert!(err.contains("cannot be empty"));
    }

    #[test]
    fn test_validate_name_reserved_prefix() {
        let err = validate_name("_id", "Field").unwrap_err();
        assert!(err.contains("reserved"));
        assert!(validate_name("_user", "Record type").is_err());
    }
}
