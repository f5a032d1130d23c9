//! colmap core - entity state and cascading persistence.
//!
//! This crate maps application entities onto rows of a column store. It
//! tracks whether an entity is transient or managed, intercepts property
//! access on managed entities for lazy loading and dirty tracking,
//! resolves a consistency level for every statement, and cascades
//! persist, merge and refresh across declared join properties.
//!
//! # Modules
//!
//! - [`catalog`] - Entity and property metadata, codecs and the registry
//! - [`consistency`] - Consistency level resolution
//! - [`context`] - Persistence contexts and flush strategies
//! - [`proxy`] - Managed entity proxies
//! - [`cascade`] - Cascading of operations across joins
//! - [`driver`] - Traits implemented by storage drivers
//! - [`bootstrap`] - Schema checks

pub mod bootstrap;
pub mod cascade;
pub mod catalog;
pub mod config;
pub mod consistency;
pub mod context;
pub mod driver;
pub mod entity;
pub mod error;
pub mod proxy;
pub mod runtime;

mod mapping;

#[cfg(test)]
mod test_support;

pub use bootstrap::{verify_schema, BootstrapReport};
pub use cascade::{CascadeExecutor, CascadeResult};
pub use catalog::{
    CascadeOperation, CascadeType, Codec, EntityMeta, EntityRegistry, JoinProperties, KeyShape,
    PropertyKind, PropertyMeta, RegistryBuilder,
};
pub use config::EngineConfig;
pub use consistency::{ConsistencyPolicy, OperationKind, SessionLevels};
pub use context::{
    BatchingFlushContext, ContextTarget, FlushContext, FlushMode, ImmediateFlushContext, Options,
    PersistenceContext, Undo,
};
pub use driver::{RecordingExecutor, SchemaService, StatementCache, StatementExecutor};
pub use entity::{Entity, EntityAccess, EntityRef, PropertyValue};
pub use error::{
    CodecError, ConfigError, DriverError, Error, ErrorCategory, Result, StateError,
};
pub use proxy::Proxy;
pub use runtime::Runtime;

/// Re-export protocol types.
pub use colmap_proto as proto;
