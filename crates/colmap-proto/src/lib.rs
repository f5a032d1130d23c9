//! colmap protocol types.
//!
//! This crate defines the data exchanged between the mapping engine and
//! its collaborators: storage values, consistency levels, logical
//! statements and table definitions.
//!
//! # Modules
//!
//! - [`value`] - Storage values for columns
//! - [`consistency`] - Consistency levels
//! - [`statement`] - Logical statements, templates and result rows
//! - [`schema`] - Table definitions for the schema service
//! - [`error`] - Protocol error types

pub mod consistency;
pub mod error;
pub mod schema;
pub mod statement;
pub mod value;

pub use consistency::ConsistencyLevel;
pub use error::Error;
pub use schema::{validate_identifier, ColumnDef, ColumnType, TableDef};
pub use statement::{
    BoundStatement, ColumnValue, PreparedHandle, QueryTemplate, ResultSet, Row, Statement,
    StatementKind,
};
pub use value::{Value, ValueKind};
