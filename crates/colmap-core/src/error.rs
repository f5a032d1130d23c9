//! Core error types.
//!
//! Errors fall into three categories that callers handle differently:
//! state errors (fix the call sequence), configuration errors (fix the
//! mapping or the schema) and transport errors (decide whether to retry).

use colmap_proto::{ConsistencyLevel, ValueKind};
use thiserror::Error;

/// Core mapping errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Programmer misuse of the entity lifecycle.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Mapping or schema misconfiguration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Value conversion failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Failure reported by the statement driver.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] colmap_proto::Error),
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Call sequencing; never retried.
    State,
    /// Mapping, schema or value configuration; fatal for the operation.
    Configuration,
    /// Database or network failure; the caller may retry.
    Transport,
}

impl Error {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::State(_) => ErrorCategory::State,
            Error::Config(_) | Error::Codec(_) | Error::Protocol(_) => {
                ErrorCategory::Configuration
            }
            Error::Driver(_) => ErrorCategory::Transport,
        }
    }

    /// Check if retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

/// Lifecycle misuse errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// `persist` was called on an instance that is already managed.
    #[error("entity '{entity_type}' is already managed, use merge instead")]
    AlreadyManaged { entity_type: String },

    /// An operation that needs a managed instance got a transient one.
    #[error("entity '{entity_type}' is not managed, {operation} requires a managed instance")]
    NotManaged {
        entity_type: String,
        operation: &'static str,
    },

    /// A per-call consistency level conflicts with the level fixed by the batch.
    #[error(
        "consistency configuration conflict for '{entity_type}': call requested {requested} but the batch fixed {fixed}"
    )]
    ConsistencyConflict {
        entity_type: String,
        requested: ConsistencyLevel,
        fixed: ConsistencyLevel,
    },

    /// Two statements for the same table were queued with different levels.
    #[error("table '{table}' is already batched at {batched}, cannot add a statement at {requested}")]
    MixedBatchConsistency {
        table: String,
        batched: ConsistencyLevel,
        requested: ConsistencyLevel,
    },

    /// The operation needs an entity instance but the context only holds a key.
    #[error("{operation} on '{entity_type}' requires an entity instance, not a key")]
    MissingInstance {
        entity_type: String,
        operation: &'static str,
    },

    /// The entity has no primary key value.
    #[error("entity '{entity_type}' has no primary key value")]
    MissingPrimaryKey { entity_type: String },

    /// Attempt to change the primary key of a managed entity.
    #[error("cannot change primary key property '{property}' of managed entity '{entity_type}'")]
    KeyMutation {
        entity_type: String,
        property: String,
    },

    /// The row backing a managed entity no longer exists.
    #[error("entity '{entity_type}' with key {key} does not exist")]
    EntityNotFound { entity_type: String, key: String },

    /// A joined entity that is not cascaded does not exist.
    #[error("joined entity '{entity_type}' with key {key} referenced by '{property}' does not exist")]
    JoinEntityMissing {
        entity_type: String,
        key: String,
        property: String,
    },

    /// A batch operation was attempted with no open batch.
    #[error("no batch has been started")]
    BatchNotStarted,

    /// `start_batch` was called while a batch is open.
    #[error("a batch is already started")]
    BatchAlreadyStarted,

    /// Cascade recursion went deeper than the configured bound.
    #[error("cascade depth exceeded: {depth}")]
    CascadeDepthExceeded { depth: usize },
}

/// Mapping and schema errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No metadata is registered for the entity type.
    #[error("unknown entity type '{0}'")]
    UnknownEntity(String),

    /// The entity type was declared twice.
    #[error("entity type '{0}' is declared more than once")]
    DuplicateEntity(String),

    /// The property is not mapped on the entity.
    #[error("property '{property}' is not mapped on entity '{entity_type}'")]
    UnmappedProperty {
        entity_type: String,
        property: String,
    },

    /// Two properties map to the same name or column.
    #[error("entity '{entity_type}' declares '{name}' more than once")]
    DuplicateProperty { entity_type: String, name: String },

    /// A join property targets an undeclared entity type.
    #[error("join property '{property}' of '{entity_type}' targets unknown entity '{target}'")]
    UnknownJoinTarget {
        entity_type: String,
        property: String,
        target: String,
    },

    /// The entity declares no primary key.
    #[error("entity '{0}' declares no primary key")]
    MissingKey(String),

    /// A table or column name is not a legal identifier.
    #[error("invalid schema name: {0}")]
    InvalidSchemaName(String),

    /// A required table does not exist and creation is disabled.
    #[error("table '{table}' required by '{entity_type}' does not exist")]
    MissingTable { entity_type: String, table: String },

    /// `ANY` cannot be used for reads.
    #[error("consistency level {0} cannot be used for reads")]
    InvalidReadConsistency(ConsistencyLevel),
}

/// Value conversion errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The value does not have the mapped type.
    #[error("property '{property}' expects {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// A join property was given a plain value, or the reverse.
    #[error("property '{property}' expects {expected}")]
    ShapeMismatch {
        property: String,
        expected: &'static str,
    },

    /// The stored representation could not be decoded.
    #[error("property '{property}' could not be decoded: {message}")]
    Decode { property: String, message: String },
}

/// Errors reported by the statement driver or schema service.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The store could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A statement failed to execute.
    #[error("execution failed on '{table}': {message}")]
    Execution { table: String, message: String },

    /// A template could not be prepared.
    #[error("prepare failed: {0}")]
    Prepare(String),

    /// The schema service failed.
    #[error("schema error: {0}")]
    Schema(String),

    /// The request timed out.
    #[error("request timed out")]
    Timeout,
}

/// Core result alias.
pub type Result<T> = std::result::Result<T, Error>;
