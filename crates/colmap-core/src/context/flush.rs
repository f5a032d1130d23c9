//! Flush contexts: where the statements of an operation go.
//!
//! An [`ImmediateFlushContext`] executes every statement as soon as it is
//! enqueued. A [`BatchingFlushContext`] buffers mutations per table
//! between [`start`](BatchingFlushContext::start) and
//! [`end`](BatchingFlushContext::end), keeping the submission order within
//! each table. A batch is deferred submission, not a transaction: the
//! per-table batches are independent and nothing is rolled back.
//!
//! Reads are never buffered; both strategies execute them immediately.
//!
//! Proxy bookkeeping done when a mutation is buffered (dirty flags
//! cleared, transient joins swapped for proxies) is kept as an [`Undo`]
//! entry until the mutation's table is submitted. Discarding the batch
//! applies the entries that are left, so the instances can be persisted
//! or merged again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use colmap_proto::{ConsistencyLevel, ResultSet, Statement};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::consistency::SessionLevels;
use crate::entity::PropertyValue;
use crate::error::{Result, StateError};
use crate::proxy::Proxy;
use crate::runtime::Runtime;

/// Flush strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Every statement is executed when enqueued.
    Immediate,
    /// Mutations are buffered until the batch ends.
    Batched,
}

/// Destination of the statements built by persistence contexts.
pub trait FlushContext: Send + Sync {
    /// The flush strategy.
    fn mode(&self) -> FlushMode;

    /// Levels fixed by the current batch session, if any.
    fn session_levels(&self) -> SessionLevels;

    /// Hand over a mutation.
    fn enqueue(&self, statement: Statement, level: ConsistencyLevel) -> Result<()>;

    /// Execute a read now.
    fn read(&self, statement: Statement, level: ConsistencyLevel) -> Result<ResultSet>;

    /// Remember the proxy created for a transient instance in this session.
    fn register_managed(&self, identity: usize, proxy: &Proxy);

    /// The proxy already created for a transient instance in this session.
    fn managed(&self, identity: usize) -> Option<Proxy>;

    /// Keep `undo` until the mutations buffered for `table` are submitted.
    fn record_undo(&self, table: &str, undo: Undo);

    /// Number of buffered statements.
    fn pending(&self) -> usize;
}

/// Proxy bookkeeping to revert if a buffered mutation is discarded.
pub struct Undo(UndoKind);

enum UndoKind {
    /// Dirty flags cleared, with the counter baselines they replaced.
    Flushed {
        proxy: Proxy,
        properties: Vec<String>,
        counters: HashMap<String, i64>,
    },
    /// A join value whose transient entities were swapped for proxies.
    Swapped {
        proxy: Proxy,
        property: String,
        previous: PropertyValue,
    },
}

impl Undo {
    pub(crate) fn flushed(
        proxy: &Proxy,
        properties: Vec<String>,
        counters: HashMap<String, i64>,
    ) -> Self {
        Self(UndoKind::Flushed {
            proxy: proxy.clone(),
            properties,
            counters,
        })
    }

    pub(crate) fn swapped(proxy: &Proxy, property: &str, previous: PropertyValue) -> Self {
        Self(UndoKind::Swapped {
            proxy: proxy.clone(),
            property: property.to_string(),
            previous,
        })
    }

    fn apply(self) {
        match self.0 {
            UndoKind::Flushed {
                proxy,
                properties,
                counters,
            } => proxy.restore_dirty(&properties, counters),
            UndoKind::Swapped {
                proxy,
                property,
                previous,
            } => proxy.replace_loaded(&property, previous),
        }
    }
}

impl fmt::Debug for Undo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            UndoKind::Flushed { properties, .. } => {
                f.debug_tuple("Flushed").field(properties).finish()
            }
            UndoKind::Swapped { property, .. } => f.debug_tuple("Swapped").field(property).finish(),
        }
    }
}

/// Executes every statement immediately.
pub struct ImmediateFlushContext {
    runtime: Arc<Runtime>,
}

impl ImmediateFlushContext {
    /// Create an immediate flush context.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }
}

impl fmt::Debug for ImmediateFlushContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ImmediateFlushContext")
    }
}

impl FlushContext for ImmediateFlushContext {
    fn mode(&self) -> FlushMode {
        FlushMode::Immediate
    }

    fn session_levels(&self) -> SessionLevels {
        SessionLevels::none()
    }

    fn enqueue(&self, statement: Statement, level: ConsistencyLevel) -> Result<()> {
        self.runtime.execute(statement, level).map(|_| ())
    }

    fn read(&self, statement: Statement, level: ConsistencyLevel) -> Result<ResultSet> {
        self.runtime.execute(statement, level)
    }

    fn register_managed(&self, _identity: usize, _proxy: &Proxy) {}

    fn record_undo(&self, _table: &str, _undo: Undo) {}

    fn managed(&self, _identity: usize) -> Option<Proxy> {
        None
    }

    fn pending(&self) -> usize {
        0
    }
}

/// Statements buffered for one table.
#[derive(Debug)]
struct TableBatch {
    table: String,
    level: ConsistencyLevel,
    statements: Vec<Statement>,
}

#[derive(Default)]
struct BatchState {
    started: bool,
    levels: SessionLevels,
    tables: Vec<TableBatch>,
    managed: HashMap<usize, Proxy>,
    undo: Vec<(String, Undo)>,
}

impl BatchState {
    fn pending(&self) -> usize {
        self.tables.iter().map(|t| t.statements.len()).sum()
    }

    fn reset(&mut self) -> (HashMap<usize, Proxy>, Vec<(String, Undo)>) {
        self.started = false;
        self.levels = SessionLevels::none();
        self.tables.clear();
        (
            std::mem::take(&mut self.managed),
            std::mem::take(&mut self.undo),
        )
    }
}

/// Buffers mutations per table until the batch ends.
///
/// Single-session: one batch at a time, driven by one owner.
pub struct BatchingFlushContext {
    runtime: Arc<Runtime>,
    state: Mutex<BatchState>,
}

impl BatchingFlushContext {
    /// Create a batching flush context with no open batch.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            state: Mutex::new(BatchState::default()),
        }
    }

    /// Open a batch, optionally fixing the read and write levels of the session.
    pub fn start(&self, levels: SessionLevels) -> Result<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(StateError::BatchAlreadyStarted.into());
        }
        state.started = true;
        state.levels = levels;
        debug!(read = ?levels.read, write = ?levels.write, "batch started");
        Ok(())
    }

    /// Check if a batch is open.
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Submit every per-table batch and close the session.
    ///
    /// Tables are submitted in the order they were first written. If one
    /// fails, it and every later table stay buffered and the session stays
    /// open so the caller can discard it.
    pub fn end(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(StateError::BatchNotStarted.into());
        }

        let total = state.pending();
        while !state.tables.is_empty() {
            let batch = &state.tables[0];
            let table = batch.table.clone();
            let statements = batch.statements.clone();
            let count = statements.len();
            if let Err(e) = self.runtime.execute_batch(&table, statements, batch.level) {
                warn!(table = %table, error = %e, "batch submission failed");
                return Err(e);
            }
            debug!(table = %table, statements = count, "table batch submitted");
            state.tables.remove(0);
            state.undo.retain(|(t, _)| *t != table);
        }

        let (managed, undo) = state.reset();
        drop(state);
        drop(managed);
        drop(undo);
        info!(statements = total, "batch submitted");
        Ok(())
    }

    /// Drop every buffered statement and close the session. Nothing is submitted.
    ///
    /// Proxies written in the batch get their dirty flags back, and joins
    /// swapped for proxies hold their transient entities again, except for
    /// tables already submitted by a failed [`end`](Self::end).
    pub fn discard(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.pending();
        let (managed, undo) = state.reset();
        drop(state);
        drop(managed);
        for (_, entry) in undo.into_iter().rev() {
            entry.apply();
        }
        if dropped > 0 {
            debug!(statements = dropped, "batch discarded");
        }
        dropped
    }
}

impl fmt::Debug for BatchingFlushContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BatchingFlushContext")
            .field("started", &state.started)
            .field("pending", &state.pending())
            .finish()
    }
}

impl FlushContext for BatchingFlushContext {
    fn mode(&self) -> FlushMode {
        FlushMode::Batched
    }

    fn session_levels(&self) -> SessionLevels {
        self.state.lock().levels
    }

    fn enqueue(&self, statement: Statement, level: ConsistencyLevel) -> Result<()> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(StateError::BatchNotStarted.into());
        }

        let table = statement.table();
        match state.tables.iter_mut().find(|t| t.table == table) {
            Some(batch) if batch.level != level => Err(StateError::MixedBatchConsistency {
                table: batch.table.clone(),
                batched: batch.level,
                requested: level,
            }
            .into()),
            Some(batch) => {
                batch.statements.push(statement);
                Ok(())
            }
            None => {
                state.tables.push(TableBatch {
                    table: table.to_string(),
                    level,
                    statements: vec![statement],
                });
                Ok(())
            }
        }
    }

    fn read(&self, statement: Statement, level: ConsistencyLevel) -> Result<ResultSet> {
        self.runtime.execute(statement, level)
    }

    fn register_managed(&self, identity: usize, proxy: &Proxy) {
        let mut state = self.state.lock();
        if state.started {
            state.managed.insert(identity, proxy.clone());
        }
    }

    fn managed(&self, identity: usize) -> Option<Proxy> {
        self.state.lock().managed.get(&identity).cloned()
    }

    fn record_undo(&self, table: &str, undo: Undo) {
        let mut state = self.state.lock();
        if state.started {
            state.undo.push((table.to_string(), undo));
        }
    }

    fn pending(&self) -> usize {
        self.state.lock().pending()
    }
}
