//! The batching entity manager.

use std::sync::Arc;

use colmap_core::{
    BatchingFlushContext, Entity, EntityRef, FlushContext, Options, Proxy, Result, Runtime,
    SessionLevels,
};
use colmap_proto::{ConsistencyLevel, Value};
use tracing::warn;

use crate::operations::{self, Operations};

/// Defers every mutation until [`end_batch`](Self::end_batch).
///
/// Mutations are buffered per table and submitted table by table when the
/// batch ends; there is no atomicity across tables. Reads are executed
/// immediately. Persisting the same instance twice in one batch issues
/// one insert.
///
/// A batch belongs to one caller: every method takes `&mut self`. After an
/// error, discard the batch. Dropping the manager with an open batch
/// discards it.
pub struct BatchingEntityManager {
    runtime: Arc<Runtime>,
    flush: Arc<BatchingFlushContext>,
}

impl BatchingEntityManager {
    /// Create a manager over a runtime, with no open batch.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let flush = Arc::new(BatchingFlushContext::new(runtime.clone()));
        Self { runtime, flush }
    }

    fn operations(&self) -> Operations<'_> {
        let flush: Arc<dyn FlushContext> = self.flush.clone();
        Operations::new(&self.runtime, flush)
    }

    /// Open a batch.
    pub fn start_batch(&mut self) -> Result<()> {
        self.flush.start(SessionLevels::none())
    }

    /// Open a batch whose statements all use the given levels.
    ///
    /// A per-call level that differs from a fixed one is rejected with
    /// [`StateError::ConsistencyConflict`](colmap_core::StateError::ConsistencyConflict).
    pub fn start_batch_with_levels(
        &mut self,
        read: Option<ConsistencyLevel>,
        write: Option<ConsistencyLevel>,
    ) -> Result<()> {
        self.flush.start(SessionLevels::fixed(read, write))
    }

    /// Submit everything buffered since the batch started.
    pub fn end_batch(&mut self) -> Result<()> {
        self.flush.end()
    }

    /// Drop everything buffered. Returns the number of dropped statements.
    pub fn discard_batch(&mut self) -> usize {
        self.flush.discard()
    }

    /// Check if a batch is open.
    pub fn is_batch_started(&self) -> bool {
        self.flush.is_started()
    }

    /// Number of buffered statements.
    pub fn pending(&self) -> usize {
        self.flush.pending()
    }

    /// Buffer the insert of a transient entity and its cascaded joins.
    pub fn persist(&mut self, entity: impl Into<EntityRef>) -> Result<Proxy> {
        self.persist_with(entity, Options::new())
    }

    /// Persist with per-call options.
    pub fn persist_with(&mut self, entity: impl Into<EntityRef>, options: Options) -> Result<Proxy> {
        self.operations().persist(entity.into(), options)
    }

    /// Buffer the dirty properties of a proxy, or persist a transient entity.
    pub fn merge(&mut self, entity: impl Into<EntityRef>) -> Result<Proxy> {
        self.merge_with(entity, Options::new())
    }

    /// Merge with per-call options.
    pub fn merge_with(&mut self, entity: impl Into<EntityRef>, options: Options) -> Result<Proxy> {
        self.operations().merge(entity.into(), options)
    }

    /// Buffer the delete of a proxy's row.
    pub fn remove(&mut self, entity: impl Into<EntityRef>) -> Result<()> {
        self.remove_with(entity, Options::new())
    }

    /// Remove with per-call options.
    pub fn remove_with(&mut self, entity: impl Into<EntityRef>, options: Options) -> Result<()> {
        self.operations().remove(entity.into(), options)
    }

    /// Buffer the delete of an entity by key.
    pub fn remove_by_id(&mut self, entity_type: &str, key: impl Into<Value>) -> Result<()> {
        self.remove_by_id_with(entity_type, key, Options::new())
    }

    /// Remove by key with per-call options.
    pub fn remove_by_id_with(
        &mut self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<()> {
        self.operations()
            .remove_by_id(entity_type, key.into(), options)
    }

    /// Reload a proxy from storage and cascade.
    pub fn refresh(&mut self, entity: impl Into<EntityRef>) -> Result<()> {
        self.refresh_with(entity, Options::new())
    }

    /// Refresh with per-call options.
    pub fn refresh_with(&mut self, entity: impl Into<EntityRef>, options: Options) -> Result<()> {
        self.operations().refresh(entity.into(), options)
    }

    /// Load an entity by key.
    pub fn find(&mut self, entity_type: &str, key: impl Into<Value>) -> Result<Option<Proxy>> {
        self.find_with(entity_type, key, Options::new())
    }

    /// Find with per-call options.
    pub fn find_with(
        &mut self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<Option<Proxy>> {
        self.operations().find(entity_type, key.into(), options)
    }

    /// A proxy for an entity known by key, without reading it.
    pub fn get_reference(&mut self, entity_type: &str, key: impl Into<Value>) -> Result<Proxy> {
        self.get_reference_with(entity_type, key, Options::new())
    }

    /// Get a reference with per-call options.
    pub fn get_reference_with(
        &mut self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<Proxy> {
        self.operations()
            .get_reference(entity_type, key.into(), options)
    }

    /// A plain copy of an entity, detached from any proxy.
    pub fn unwrap(&self, entity: &EntityRef) -> Entity {
        operations::unwrap(entity)
    }
}

impl Drop for BatchingEntityManager {
    fn drop(&mut self) {
        if self.flush.is_started() {
            let dropped = self.flush.discard();
            warn!(statements = dropped, "batch dropped without end_batch, discarded");
        }
    }
}
