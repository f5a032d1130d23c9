//! Interfaces to the statement driver and schema service.
//!
//! The engine only builds logical statements. Turning them into wire
//! requests, routing them to replicas and honouring the consistency level
//! is the driver's job.

use std::sync::Arc;

use colmap_proto::{
    BoundStatement, ConsistencyLevel, PreparedHandle, QueryTemplate, ResultSet, Statement,
    TableDef,
};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::DriverError;

/// Executes logical statements against the store.
pub trait StatementExecutor: Send + Sync {
    /// Execute one statement.
    fn execute(
        &self,
        statement: &BoundStatement,
        level: ConsistencyLevel,
    ) -> Result<ResultSet, DriverError>;

    /// Prepare a statement template.
    fn prepare(&self, template: &QueryTemplate) -> Result<PreparedHandle, DriverError>;

    /// Submit the statements batched for one table.
    ///
    /// The default implementation executes them one by one, in order.
    fn execute_batch(
        &self,
        table: &str,
        statements: &[BoundStatement],
        level: ConsistencyLevel,
    ) -> Result<(), DriverError> {
        let _ = table;
        for statement in statements {
            self.execute(statement, level)?;
        }
        Ok(())
    }
}

impl<T: StatementExecutor + ?Sized> StatementExecutor for Arc<T> {
    fn execute(
        &self,
        statement: &BoundStatement,
        level: ConsistencyLevel,
    ) -> Result<ResultSet, DriverError> {
        (**self).execute(statement, level)
    }

    fn prepare(&self, template: &QueryTemplate) -> Result<PreparedHandle, DriverError> {
        (**self).prepare(template)
    }

    fn execute_batch(
        &self,
        table: &str,
        statements: &[BoundStatement],
        level: ConsistencyLevel,
    ) -> Result<(), DriverError> {
        (**self).execute_batch(table, statements, level)
    }
}

/// Checks and creates tables at bootstrap.
pub trait SchemaService: Send + Sync {
    /// Check if a table exists.
    fn table_exists(&self, table: &str) -> Result<bool, DriverError>;

    /// Create a table.
    fn create_table(&self, table: &TableDef) -> Result<(), DriverError>;
}

impl<T: SchemaService + ?Sized> SchemaService for Arc<T> {
    fn table_exists(&self, table: &str) -> Result<bool, DriverError> {
        (**self).table_exists(table)
    }

    fn create_table(&self, table: &TableDef) -> Result<(), DriverError> {
        (**self).create_table(table)
    }
}

/// Cache of prepared templates, shared by every context of a runtime.
#[derive(Debug, Default)]
pub struct StatementCache {
    prepared: DashMap<QueryTemplate, PreparedHandle>,
}

impl StatementCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a statement, preparing its template on first use.
    pub fn bind(
        &self,
        executor: &dyn StatementExecutor,
        statement: Statement,
    ) -> Result<BoundStatement, DriverError> {
        let template = statement.template();
        if let Some(handle) = self.prepared.get(&template) {
            return Ok(BoundStatement::new(handle.clone(), statement));
        }

        let handle = executor.prepare(&template)?;
        tracing::debug!(id = handle.id, template = %template, "prepared statement");
        let handle = self.prepared.entry(template).or_insert(handle).clone();
        Ok(BoundStatement::new(handle, statement))
    }

    /// Number of prepared templates.
    pub fn len(&self) -> usize {
        self.prepared.len()
    }

    /// Check if nothing has been prepared yet.
    pub fn is_empty(&self) -> bool {
        self.prepared.is_empty()
    }
}

/// A statement seen by a [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// The logical statement.
    pub statement: Statement,
    /// Level it was executed at.
    pub level: ConsistencyLevel,
    /// Whether it was submitted as part of a batch.
    pub batched: bool,
}

/// Wraps an executor and records every statement passed through it.
///
/// Used to assert on the exact statements an operation produces.
pub struct RecordingExecutor<E> {
    inner: E,
    log: Mutex<Vec<RecordedStatement>>,
}

impl<E: StatementExecutor> RecordingExecutor<E> {
    /// Wrap `inner`.
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            log: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped executor.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Every statement recorded so far.
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.log.lock().clone()
    }

    /// Recorded statements that change data.
    pub fn mutations(&self) -> Vec<RecordedStatement> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.statement.is_mutation())
            .cloned()
            .collect()
    }

    /// Recorded statements against `table`.
    pub fn for_table(&self, table: &str) -> Vec<RecordedStatement> {
        self.log
            .lock()
            .iter()
            .filter(|r| r.statement.table() == table)
            .cloned()
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.log.lock().clear();
    }

    fn record(&self, statement: &BoundStatement, level: ConsistencyLevel, batched: bool) {
        self.log.lock().push(RecordedStatement {
            statement: statement.statement.clone(),
            level,
            batched,
        });
    }
}

impl<E: StatementExecutor> StatementExecutor for RecordingExecutor<E> {
    fn execute(
        &self,
        statement: &BoundStatement,
        level: ConsistencyLevel,
    ) -> Result<ResultSet, DriverError> {
        self.record(statement, level, false);
        self.inner.execute(statement, level)
    }

    fn prepare(&self, template: &QueryTemplate) -> Result<PreparedHandle, DriverError> {
        self.inner.prepare(template)
    }

    fn execute_batch(
        &self,
        table: &str,
        statements: &[BoundStatement],
        level: ConsistencyLevel,
    ) -> Result<(), DriverError> {
        for statement in statements {
            self.record(statement, level, true);
        }
        self.inner.execute_batch(table, statements, level)
    }
}

impl<E: StatementExecutor + SchemaService> SchemaService for RecordingExecutor<E> {
    fn table_exists(&self, table: &str) -> Result<bool, DriverError> {
        self.inner.table_exists(table)
    }

    fn create_table(&self, table: &TableDef) -> Result<(), DriverError> {
        self.inner.create_table(table)
    }
}
