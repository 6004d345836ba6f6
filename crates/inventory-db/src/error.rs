//! Error types for the library.

use thiserror::Error;

/// Main error type for database helper operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed caller input: mismatched column/type counts, missing
    /// companion arguments, conflicting flags, invalid identifiers.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A value could not be cast to its declared column type.
    #[error("Cannot coerce value {value:?} in column \"{column}\" to {target}")]
    TypeCoercion {
        column: String,
        value: String,
        target: &'static str,
    },

    /// Any failure surfaced by the underlying driver.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// IO error (reading the credentials file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DbError {
    /// Create an InvalidArgument error.
    pub fn invalid(message: impl Into<String>) -> Self {
        DbError::InvalidArgument(message.into())
    }

    /// Create a TypeCoercion error for a specific column and value.
    pub fn coercion(
        column: impl Into<String>,
        value: impl Into<String>,
        target: &'static str,
    ) -> Self {
        DbError::TypeCoercion {
            column: column.into(),
            value: value.into(),
            target,
        }
    }
}

/// Result type alias for database helper operations.
pub type Result<T> = std::result::Result<T, DbError>;
