//! Error types for the copy pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::dsn::DsnError;

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (invalid spec, unknown generator, missing table, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection string could not be parsed.
    #[error("Invalid DSN: {0}")]
    Dsn(#[from] DsnError),

    /// No registered driver accepted the connection string.
    #[error("No supported driver for DSN '{0}'")]
    NoSupportedDriver(String),

    /// Reading or writing the database structure failed. Aborts the run.
    #[error("Structure dump failed: {0}")]
    Structure(String),

    /// Reading rows of a specific table failed.
    #[error("Read failed for table {table}: {message}")]
    TableRead { table: String, message: String },

    /// Writing rows of a specific table failed.
    #[error("Write failed for table {table}: {message}")]
    TableWrite { table: String, message: String },

    /// The select for a table did not finish within the read timeout.
    #[error("Read of table {table} timed out after {timeout:?}")]
    ReadTimeout { table: String, timeout: Duration },

    /// A single row could not be converted into a [`Row`](crate::core::Row).
    #[error("Row decode failed: {0}")]
    RowDecode(String),

    /// A pre/post dump hook failed.
    #[error("Dump hook {hook} failed: {message}")]
    Hook { hook: &'static str, message: String },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// One or more tables failed while running in strict mode.
    #[error("{count} table(s) failed to copy: {tables}")]
    TablesFailed { count: usize, tables: String },

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// IO error (file operations, external tools)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Copy cancelled")]
    Cancelled,
}

impl CopyError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        CopyError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a TableRead error
    pub fn table_read(table: impl Into<String>, message: impl ToString) -> Self {
        CopyError::TableRead {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a TableWrite error
    pub fn table_write(table: impl Into<String>, message: impl ToString) -> Self {
        CopyError::TableWrite {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CopyError::Config(_)
            | CopyError::Dsn(_)
            | CopyError::NoSupportedDriver(_)
            | CopyError::Yaml(_) => 2,
            CopyError::Structure(_) => 3,
            CopyError::TablesFailed { .. } => 4,
            CopyError::Cancelled => 130,
            _ => 1,
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

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CopyError::Config("x".into()).exit_code(), 2);
        assert_eq!(CopyError::NoSupportedDriver("x".into()).exit_code(), 2);
        assert_eq!(CopyError::Structure("x".into()).exit_code(), 3);
        assert_eq!(
            CopyError::TablesFailed {
                count: 1,
                tables: "users".into()
            }
            .exit_code(),
            4
        );
        assert_eq!(CopyError::Cancelled.exit_code(), 130);
    }

    #[test]
    fn test_table_error_message_names_table() {
        let err = CopyError::table_write("orders", "duplicate key");
        assert_eq!(
            err.to_string(),
            "Write failed for table orders: duplicate key"
        );
    }
}
