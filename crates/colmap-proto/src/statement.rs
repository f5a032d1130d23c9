//! Logical statements handed to the statement driver.
//!
//! A statement names a table, the key columns that address a row and the
//! column values to read or write. It never carries wire bytes; rendering
//! and encoding are the driver's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A column name and value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValue {
    /// Column name.
    pub column: String,
    /// Column value.
    pub value: Value,
}

impl ColumnValue {
    /// Create a new column-value pair.
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// The shape of a statement, independent of its bound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
    IncrementCounter,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Select => "select",
            StatementKind::IncrementCounter => "increment",
        };
        f.write_str(name)
    }
}

/// A logical read or write against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Insert a full row.
    Insert {
        /// Target table.
        table: String,
        /// Every column being written, key columns included.
        values: Vec<ColumnValue>,
        /// Time-to-live in seconds.
        ttl: Option<u32>,
        /// Write timestamp in microseconds.
        timestamp: Option<i64>,
    },
    /// Update some columns of an addressed row.
    Update {
        /// Target table.
        table: String,
        /// Primary key columns.
        key: Vec<ColumnValue>,
        /// Columns to overwrite.
        values: Vec<ColumnValue>,
        /// Time-to-live in seconds.
        ttl: Option<u32>,
        /// Write timestamp in microseconds.
        timestamp: Option<i64>,
    },
    /// Delete an addressed row.
    Delete {
        /// Target table.
        table: String,
        /// Primary key columns.
        key: Vec<ColumnValue>,
        /// Write timestamp in microseconds.
        timestamp: Option<i64>,
    },
    /// Read columns of an addressed row.
    Select {
        /// Source table.
        table: String,
        /// Primary key columns.
        key: Vec<ColumnValue>,
        /// Columns to read. Empty means every column.
        columns: Vec<String>,
    },
    /// Add a delta to a counter column.
    IncrementCounter {
        /// Counter table.
        table: String,
        /// Primary key columns.
        key: Vec<ColumnValue>,
        /// Counter column.
        column: String,
        /// Signed increment.
        delta: i64,
    },
}

impl Statement {
    /// Create an insert statement.
    pub fn insert(table: impl Into<String>, values: Vec<ColumnValue>) -> Self {
        Statement::Insert {
            table: table.into(),
            values,
            ttl: None,
            timestamp: None,
        }
    }

    /// Create an update statement.
    pub fn update(
        table: impl Into<String>,
        key: Vec<ColumnValue>,
        values: Vec<ColumnValue>,
    ) -> Self {
        Statement::Update {
            table: table.into(),
            key,
            values,
            ttl: None,
            timestamp: None,
        }
    }

    /// Create a delete statement.
    pub fn delete(table: impl Into<String>, key: Vec<ColumnValue>) -> Self {
        Statement::Delete {
            table: table.into(),
            key,
            timestamp: None,
        }
    }

    /// Create a select statement.
    pub fn select(table: impl Into<String>, key: Vec<ColumnValue>, columns: Vec<String>) -> Self {
        Statement::Select {
            table: table.into(),
            key,
            columns,
        }
    }

    /// Create a counter increment.
    pub fn increment(
        table: impl Into<String>,
        key: Vec<ColumnValue>,
        column: impl Into<String>,
        delta: i64,
    ) -> Self {
        Statement::IncrementCounter {
            table: table.into(),
            key,
            column: column.into(),
            delta,
        }
    }

    /// Attach a TTL to an insert or update. Other statements are unchanged.
    pub fn with_ttl(mut self, new_ttl: Option<u32>) -> Self {
        if let Statement::Insert { ttl, .. } | Statement::Update { ttl, .. } = &mut self {
            *ttl = new_ttl;
        }
        self
    }

    /// Attach a write timestamp to a mutation. Selects are unchanged.
    pub fn with_timestamp(mut self, new_timestamp: Option<i64>) -> Self {
        match &mut self {
            Statement::Insert { timestamp, .. }
            | Statement::Update { timestamp, .. }
            | Statement::Delete { timestamp, .. } => *timestamp = new_timestamp,
            Statement::Select { .. } | Statement::IncrementCounter { .. } => {}
        }
        self
    }

    /// Get the table this statement operates on.
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert { table, .. }
            | Statement::Update { table, .. }
            | Statement::Delete { table, .. }
            | Statement::Select { table, .. }
            | Statement::IncrementCounter { table, .. } => table,
        }
    }

    /// Get the statement kind.
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Insert { .. } => StatementKind::Insert,
            Statement::Update { .. } => StatementKind::Update,
            Statement::Delete { .. } => StatementKind::Delete,
            Statement::Select { .. } => StatementKind::Select,
            Statement::IncrementCounter { .. } => StatementKind::IncrementCounter,
        }
    }

    /// Whether this statement changes data.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Statement::Select { .. })
    }

    /// Names of the columns this statement writes (or reads, for a select).
    pub fn columns(&self) -> Vec<&str> {
        match self {
            Statement::Insert { values, .. } | Statement::Update { values, .. } => {
                values.iter().map(|cv| cv.column.as_str()).collect()
            }
            Statement::Delete { .. } => Vec::new(),
            Statement::Select { columns, .. } => columns.iter().map(String::as_str).collect(),
            Statement::IncrementCounter { column, .. } => vec![column.as_str()],
        }
    }

    /// The template this statement is an instance of.
    pub fn template(&self) -> QueryTemplate {
        let (key_columns, value_columns, ttl, timestamp) = match self {
            Statement::Insert {
                values,
                ttl,
                timestamp,
                ..
            } => (Vec::new(), names(values), ttl.is_some(), timestamp.is_some()),
            Statement::Update {
                key,
                values,
                ttl,
                timestamp,
                ..
            } => (names(key), names(values), ttl.is_some(), timestamp.is_some()),
            Statement::Delete { key, timestamp, .. } => {
                (names(key), Vec::new(), false, timestamp.is_some())
            }
            Statement::Select { key, columns, .. } => (names(key), columns.clone(), false, false),
            Statement::IncrementCounter { key, column, .. } => {
                (names(key), vec![column.clone()], false, false)
            }
        };

        QueryTemplate {
            table: self.table().to_string(),
            kind: self.kind(),
            key_columns,
            value_columns,
            with_ttl: ttl,
            with_timestamp: timestamp,
        }
    }
}

fn names(values: &[ColumnValue]) -> Vec<String> {
    values.iter().map(|cv| cv.column.clone()).collect()
}

/// A statement shape used as the unit of preparation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryTemplate {
    /// Target table.
    pub table: String,
    /// Statement kind.
    pub kind: StatementKind,
    /// Key columns in the WHERE clause.
    pub key_columns: Vec<String>,
    /// Written (or selected) columns.
    pub value_columns: Vec<String>,
    /// Whether a TTL is bound.
    pub with_ttl: bool,
    /// Whether a write timestamp is bound.
    pub with_timestamp: bool,
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let where_clause = self
            .key_columns
            .iter()
            .map(|c| format!("{}=?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let using = match (self.with_ttl, self.with_timestamp) {
            (true, true) => " USING TTL ? AND TIMESTAMP ?",
            (true, false) => " USING TTL ?",
            (false, true) => " USING TIMESTAMP ?",
            (false, false) => "",
        };

        match self.kind {
            StatementKind::Insert => {
                let marks = vec!["?"; self.value_columns.len()].join(",");
                write!(
                    f,
                    "INSERT INTO {}({}) VALUES ({}){}",
                    self.table,
                    self.value_columns.join(","),
                    marks,
                    using
                )
            }
            StatementKind::Update => {
                let sets = self
                    .value_columns
                    .iter()
                    .map(|c| format!("{}=?", c))
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "UPDATE {}{} SET {} WHERE {}", self.table, using, sets, where_clause)
            }
            StatementKind::Delete => {
                write!(f, "DELETE FROM {}{} WHERE {}", self.table, using, where_clause)
            }
            StatementKind::Select => {
                let columns = if self.value_columns.is_empty() {
                    "*".to_string()
                } else {
                    self.value_columns.join(",")
                };
                write!(f, "SELECT {} FROM {} WHERE {}", columns, self.table, where_clause)
            }
            StatementKind::IncrementCounter => {
                let column = self.value_columns.first().map(String::as_str).unwrap_or("");
                write!(
                    f,
                    "UPDATE {} SET {}={}+? WHERE {}",
                    self.table, column, column, where_clause
                )
            }
        }
    }
}

/// Handle returned by the driver for a prepared template.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PreparedHandle {
    /// Driver-assigned identifier.
    pub id: u64,
    /// The template that was prepared.
    pub template: QueryTemplate,
}

/// A statement paired with the prepared handle of its template.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// Prepared handle.
    pub prepared: PreparedHandle,
    /// Statement values.
    pub statement: Statement,
}

impl BoundStatement {
    /// Bind a statement to its prepared handle.
    pub fn new(prepared: PreparedHandle, statement: Statement) -> Self {
        Self {
            prepared,
            statement,
        }
    }

    /// Get the table this statement operates on.
    pub fn table(&self) -> &str {
        self.statement.table()
    }
}

/// A single returned row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Returned columns.
    pub columns: Vec<ColumnValue>,
}

impl Row {
    /// Create a row from column values.
    pub fn new(columns: Vec<ColumnValue>) -> Self {
        Self { columns }
    }

    /// Look up a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|cv| cv.column == column)
            .map(|cv| &cv.value)
    }
}

/// Rows returned by an executed statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Returned rows. Empty for mutations.
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// An empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result holding the given rows.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Check if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
