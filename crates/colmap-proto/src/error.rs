//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A table or column name is not a legal identifier.
    #[error("invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Unknown consistency level name.
    #[error("unknown consistency level: '{0}'")]
    InvalidConsistency(String),
}
