//! colmap sled driver - an embedded single-node store for colmap.
//!
//! [`SledStore`] implements the mapping engine's
//! [`StatementExecutor`](colmap_core::StatementExecutor) and
//! [`SchemaService`](colmap_core::SchemaService) on top of sled. Tables
//! are sled trees keyed by the encoded primary key, cells carry their
//! write timestamp and expiry, and every per-table batch is applied
//! atomically.

pub mod config;
pub mod error;
pub mod row;
pub mod store;

pub use config::SledConfig;
pub use error::SledError;
pub use row::{Cell, StoredRow};
pub use store::SledStore;
