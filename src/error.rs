//! Error types for the repository layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Callers match on the variant (or on [`ErrorKind`]) to pick a retry policy:
//! timeouts are worth retrying, constraint violations are not.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message} (product: {product})")]
    Configuration { product: String, message: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("Database error: {message}")]
    Driver {
        message: String,
        /// e.g., "23505" for unique violation
        sql_state: Option<String>,
        suggestion: String,
        #[source]
        source: Option<Box<sqlx::Error>>,
    },

    #[error("Conversion error: {message} (property: {property})")]
    Conversion { message: String, property: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Schema,
    Timeout,
    Driver,
    Conversion,
    InvalidInput,
    Cancelled,
    Internal,
}

impl DbError {
    /// Create a configuration error for a product that cannot be resolved.
    pub fn configuration(product: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            product: product.into(),
            message: message.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a driver error with optional SQL state and no underlying cause.
    pub fn driver(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
            source: None,
        }
    }

    /// Create a conversion error.
    pub fn conversion(message: impl Into<String>, property: impl Into<String>) -> Self {
        Self::Conversion {
            message: message.into(),
            property: property.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Schema { .. } => ErrorKind::Schema,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Driver { .. } => ErrorKind::Driver,
            Self::Conversion { .. } => ErrorKind::Conversion,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Driver { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Driver { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    fn from_driver(message: String, sql_state: Option<String>, suggestion: &str, err: sqlx::Error) -> Self {
        Self::Driver {
            message,
            sql_state,
            suggestion: suggestion.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = if db_err.is_unique_violation() {
                    "A row with the same unique key already exists"
                } else if db_err.is_foreign_key_violation() {
                    "Check that referenced rows exist"
                } else {
                    "Check the SQL syntax and referenced objects"
                };
                let message = db_err.message().to_string();
                Self::from_driver(message, code, suggestion, err)
            }
            sqlx::Error::PoolTimedOut => DbError::timeout("connection acquire", 0),
            sqlx::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut => {
                DbError::timeout(format!("I/O: {}", io_err), 0)
            }
            sqlx::Error::Io(ref io_err) => {
                let message = format!("I/O error: {}", io_err);
                Self::from_driver(
                    message,
                    None,
                    "Check network connectivity and database server status",
                    err,
                )
            }
            sqlx::Error::Configuration(ref msg) => {
                let message = msg.to_string();
                Self::from_driver(
                    message,
                    None,
                    "Check the connection string format and credentials",
                    err,
                )
            }
            sqlx::Error::Tls(ref tls_err) => {
                let message = format!("TLS error: {}", tls_err);
                Self::from_driver(message, None, "Verify TLS configuration and certificates", err)
            }
            sqlx::Error::Protocol(ref msg) => {
                let message = format!("Protocol error: {}", msg);
                Self::from_driver(message, None, "Check database server compatibility", err)
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::conversion(format!("Column not found: {}", col), col)
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::conversion(
                format!("Column index {} out of bounds (len: {})", index, len),
                index.to_string(),
            ),
            sqlx::Error::ColumnDecode { index, source } => DbError::conversion(
                format!("Failed to decode column {}: {}", index, source),
                index,
            ),
            sqlx::Error::Decode(source) => {
                DbError::conversion(format!("Decode error: {}", source), "")
            }
            sqlx::Error::RowNotFound => DbError::driver(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            ref other => {
                let message = format!("Driver error: {}", other);
                Self::from_driver(message, None, "Check database driver configuration", err)
            }
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
