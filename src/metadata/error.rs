//! Metadata lookup errors.

use thiserror::Error;

/// Result type for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("column {column} not found in {table}")]
    ColumnNotFound { table: String, column: String },

    #[error("invalid catalog: {0}")]
    Invalid(String),

    #[error("catalog JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
