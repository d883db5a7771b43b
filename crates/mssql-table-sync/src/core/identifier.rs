//! Identifier validation and quoting for dynamically built T-SQL.
//!
//! Table and column names cannot be bound as statement parameters, so every
//! name that reaches generated SQL goes through [`quote_ident`]. Names are
//! checked once with [`validate_identifier`] when a job is resolved; the
//! quoting helpers are infallible after that.
//!
//! String literals that have to be inlined (LIKE patterns, IN lists) go
//! through [`quote_literal`].

use crate::error::{Result, SyncError};

/// Maximum identifier length accepted by SQL Server.
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers longer than SQL Server allows.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(SyncError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a SQL Server identifier using brackets.
///
/// ```ignore
/// assert_eq!(quote_ident("users"), "[users]");
/// assert_eq!(quote_ident("table]name"), "[table]]name]");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `[schema].[table]`
pub fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// `[schema].[table].[column]`
pub fn qualify_column(schema: &str, table: &str, column: &str) -> String {
    format!("{}.{}", qualify(schema, table), quote_ident(column))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
