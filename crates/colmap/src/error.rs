//! Error types.

use thiserror::Error;

/// Errors raised while setting up an entity manager factory.
#[derive(Debug, Error)]
pub enum Error {
    /// Mapping or bootstrap failure.
    #[error(transparent)]
    Mapping(#[from] colmap_core::Error),

    /// The embedded store could not be opened.
    #[error("store error: {0}")]
    Store(#[from] colmap_sled::SledError),
}

impl From<colmap_core::ConfigError> for Error {
    fn from(e: colmap_core::ConfigError) -> Self {
        Error::Mapping(e.into())
    }
}
