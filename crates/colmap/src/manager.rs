//! The stateless entity manager.

use std::sync::Arc;

use colmap_core::{
    Entity, EntityRef, FlushContext, ImmediateFlushContext, Options, Proxy, Result, Runtime,
};
use colmap_proto::Value;

use crate::operations::{self, Operations};

/// Runs every operation in its own immediate flush context.
///
/// Each statement is submitted as soon as it is built, so a failure in the
/// middle of a cascade leaves the statements issued before it applied.
/// Use a [`BatchingEntityManager`](crate::BatchingEntityManager) to defer
/// submission to one point.
///
/// Cheap to clone and safe to share between threads.
#[derive(Clone, Debug)]
pub struct EntityManager {
    runtime: Arc<Runtime>,
}

impl EntityManager {
    /// Create a manager over a runtime.
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// The shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    fn operations(&self) -> Operations<'_> {
        let flush: Arc<dyn FlushContext> = Arc::new(ImmediateFlushContext::new(self.runtime.clone()));
        Operations::new(&self.runtime, flush)
    }

    /// Insert a transient entity and its cascaded joins.
    ///
    /// Fails with [`StateError::AlreadyManaged`](colmap_core::StateError::AlreadyManaged)
    /// if the entity is a proxy.
    pub fn persist(&self, entity: impl Into<EntityRef>) -> Result<Proxy> {
        self.persist_with(entity, Options::new())
    }

    /// Persist with per-call options.
    pub fn persist_with(&self, entity: impl Into<EntityRef>, options: Options) -> Result<Proxy> {
        self.operations().persist(entity.into(), options)
    }

    /// Write the dirty properties of a proxy and cascade.
    ///
    /// A transient entity is persisted instead and a new proxy returned;
    /// a proxy is returned as is.
    pub fn merge(&self, entity: impl Into<EntityRef>) -> Result<Proxy> {
        self.merge_with(entity, Options::new())
    }

    /// Merge with per-call options.
    pub fn merge_with(&self, entity: impl Into<EntityRef>, options: Options) -> Result<Proxy> {
        self.operations().merge(entity.into(), options)
    }

    /// Delete the row of a proxy. Joined entities are never removed.
    pub fn remove(&self, entity: impl Into<EntityRef>) -> Result<()> {
        self.remove_with(entity, Options::new())
    }

    /// Remove with per-call options.
    pub fn remove_with(&self, entity: impl Into<EntityRef>, options: Options) -> Result<()> {
        self.operations().remove(entity.into(), options)
    }

    /// Delete an entity by key without loading it.
    pub fn remove_by_id(&self, entity_type: &str, key: impl Into<Value>) -> Result<()> {
        self.remove_by_id_with(entity_type, key, Options::new())
    }

    /// Remove by key with per-call options.
    pub fn remove_by_id_with(
        &self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<()> {
        self.operations()
            .remove_by_id(entity_type, key.into(), options)
    }

    /// Reload a proxy from storage, dropping unflushed writes, and cascade.
    pub fn refresh(&self, entity: impl Into<EntityRef>) -> Result<()> {
        self.refresh_with(entity, Options::new())
    }

    /// Refresh with per-call options.
    pub fn refresh_with(&self, entity: impl Into<EntityRef>, options: Options) -> Result<()> {
        self.operations().refresh(entity.into(), options)
    }

    /// Load an entity by key. Returns `None` if it does not exist.
    pub fn find(&self, entity_type: &str, key: impl Into<Value>) -> Result<Option<Proxy>> {
        self.find_with(entity_type, key, Options::new())
    }

    /// Find with per-call options.
    pub fn find_with(
        &self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<Option<Proxy>> {
        self.operations().find(entity_type, key.into(), options)
    }

    /// A proxy for an entity known by key, without reading it.
    ///
    /// The first property access loads the row and fails with
    /// [`StateError::EntityNotFound`](colmap_core::StateError::EntityNotFound)
    /// if it does not exist.
    pub fn get_reference(&self, entity_type: &str, key: impl Into<Value>) -> Result<Proxy> {
        self.get_reference_with(entity_type, key, Options::new())
    }

    /// Get a reference with per-call options.
    ///
    /// The consistency level, if given, is used by the reads the proxy
    /// makes later.
    pub fn get_reference_with(
        &self,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<Proxy> {
        self.operations()
            .get_reference(entity_type, key.into(), options)
    }

    /// Load every property of a proxy that is not loaded yet.
    pub fn initialize(&self, proxy: &Proxy) -> Result<()> {
        proxy.initialize()
    }

    /// A plain copy of an entity, detached from any proxy.
    pub fn unwrap(&self, entity: &EntityRef) -> Entity {
        operations::unwrap(entity)
    }
}
