//! Store error types.

use colmap_core::DriverError;
use thiserror::Error;

/// Errors raised by the sled store.
#[derive(Debug, Error)]
pub enum SledError {
    /// The underlying database failed.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A stored row or cell could not be encoded or decoded.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// A table definition could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] colmap_proto::Error),

    /// The statement addresses a table that was never created.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The statement does not bind every key column of the table.
    #[error("table '{table}' requires key column '{column}'")]
    MissingKeyColumn { table: String, column: String },
}

impl SledError {
    /// Convert into the driver error reported to the mapping engine.
    pub fn into_driver(self, table: &str) -> DriverError {
        match self {
            SledError::Storage(e) => DriverError::Connection(e.to_string()),
            other => DriverError::Execution {
                table: table.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Store result alias.
pub type Result<T> = std::result::Result<T, SledError>;
