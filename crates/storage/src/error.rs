//! Storage errors.

use std::io;

use relq_types::{RecordId, TypeError};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("table {0} does not exist")]
    TableNotFound(String),

    #[error("table {0} already exists")]
    TableExists(String),

    #[error("invalid table name {0:?}")]
    InvalidName(String),

    #[error("table {0} is not a temporary table")]
    NotTemporary(String),

    #[error("no index on {table}.{column}")]
    IndexNotFound { table: String, column: String },

    #[error("record {rid} not found in {table}")]
    RecordNotFound { table: String, rid: RecordId },

    #[error("catalog manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}
