//! Error types for the synchronization library.

use std::fmt;

use thiserror::Error;

/// SQL Server error number for a constraint conflict (foreign key, check).
pub const FOREIGN_KEY_VIOLATION: u32 = 547;

/// Which side of the staging anti-join a prune statement deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneDirection {
    /// Rows with a matching staging row.
    Present,
    /// Rows without a matching staging row.
    Missing,
}

impl fmt::Display for PruneDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PruneDirection::Present => write!(f, "present"),
            PruneDirection::Missing => write!(f, "not present"),
        }
    }
}

/// Main error type for synchronization operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, unknown columns)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection-level database error
    #[error("Database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// A statement was rejected by the server
    #[error("Statement failed{}: {message}", code.map(|c| format!(" (error {})", c)).unwrap_or_default())]
    Statement { code: Option<u32>, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A destination column could not be populated from the source row
    #[error("Row value not found for column [{table}].[{column}] in source row: {row}")]
    MissingSourceValue {
        table: String,
        column: String,
        row: String,
    },

    /// One or more rows were rejected while bulk loading a staging table
    #[error("Bulk copy failures: {rejected} row(s) rejected while loading {table}\n{detail}")]
    BulkTransferRejected {
        table: String,
        rejected: usize,
        detail: String,
    },

    /// Moving staged rows into the destination failed
    #[error("failed to move data from temporary table {staging} to main table {destination}. Exception: {message} Sql query: {statement}{diagnostic}")]
    MergeStatementFailed {
        staging: String,
        destination: String,
        message: String,
        statement: String,
        diagnostic: String,
    },

    /// Deleting destination rows failed
    #[error("Failed to remove rows from table {table} that were {direction} in source. Exception message: {message} Sql query: {statement}")]
    PruneStatementFailed {
        table: String,
        direction: PruneDirection,
        message: String,
        statement: String,
    },

    /// Deleting rows from a dependent relation table failed
    #[error("Failed to delete rows from {relation} relation table. Exception message: {message} Sql query: {statement}")]
    RelationPruneFailed {
        relation: String,
        message: String,
        statement: String,
    },

    /// A statement exceeded its command timeout
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    /// The job ran to completion but reported failure
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Statement error from a server message.
    pub fn statement(code: Option<u32>, message: impl Into<String>) -> Self {
        SyncError::Statement {
            code,
            message: message.into(),
        }
    }

    /// SQL Server error number, when the server produced one.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            SyncError::Statement { code, .. } => *code,
            SyncError::Database(tiberius::error::Error::Server(token)) => Some(token.code()),
            _ => None,
        }
    }

    /// True when the server rejected a statement because of a constraint conflict.
    pub fn is_foreign_key_violation(&self) -> bool {
        self.server_code() == Some(FOREIGN_KEY_VIOLATION)
    }

    /// Short message without wrapping, used when embedding in another error.
    pub fn server_message(&self) -> String {
        match self {
            SyncError::Statement { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) => 1,
            SyncError::Database(_) | SyncError::Statement { .. } | SyncError::Pool { .. } => 2,
            SyncError::MissingSourceValue { .. }
            | SyncError::BulkTransferRejected { .. }
            | SyncError::MergeStatementFailed { .. }
            | SyncError::PruneStatementFailed { .. }
            | SyncError::RelationPruneFailed { .. }
            | SyncError::JobFailed(_) => 3,
            SyncError::Timeout { .. } => 4,
            SyncError::Json(_) => 5,
            SyncError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_code_detects_fk_violation() {
        let err = SyncError::statement(Some(547), "The INSERT statement conflicted");
        assert!(err.is_foreign_key_violation());
        assert_eq!(err.server_code(), Some(547));

        let other = SyncError::statement(Some(2627), "Violation of PRIMARY KEY");
        assert!(!other.is_foreign_key_violation());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(SyncError::Config("x".into()).exit_code(), 1);
        assert_eq!(SyncError::JobFailed("x".into()).exit_code(), 3);
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        assert_eq!(SyncError::Io(io).exit_code(), 7);
    }

    #[test]
    fn test_prune_error_names_direction() {
        let err = SyncError::PruneStatementFailed {
            table: "[dbo].[Orders]".into(),
            direction: PruneDirection::Missing,
            message: "boom".into(),
            statement: "DELETE".into(),
        };
        let text = err.to_string();
        assert!(text.contains("[dbo].[Orders]"));
        assert!(text.contains("were not present in source"));
    }

    #[test]
    fn test_format_detailed_includes_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "job.yaml");
        let err = SyncError::Io(io);
        assert!(err.format_detailed().starts_with("Error: IO error: job.yaml"));
    }
}
