//! Entity operations shared by both managers.

use std::sync::Arc;

use colmap_core::{
    Entity, EntityRef, FlushContext, Options, PersistenceContext, Proxy, Result, Runtime,
};
use colmap_proto::Value;

/// Entry points bound to one runtime and one flush context.
pub(crate) struct Operations<'a> {
    runtime: &'a Arc<Runtime>,
    flush: Arc<dyn FlushContext>,
}

impl<'a> Operations<'a> {
    pub(crate) fn new(runtime: &'a Arc<Runtime>, flush: Arc<dyn FlushContext>) -> Self {
        Self { runtime, flush }
    }

    fn for_entity(&self, entity: EntityRef, options: Options) -> Result<PersistenceContext> {
        PersistenceContext::for_entity(self.runtime.clone(), self.flush.clone(), entity, options)
    }

    fn for_key(&self, entity_type: &str, key: Value, options: Options) -> Result<PersistenceContext> {
        PersistenceContext::for_key(
            self.runtime.clone(),
            self.flush.clone(),
            entity_type,
            key,
            options,
        )
    }

    pub(crate) fn persist(&self, entity: EntityRef, options: Options) -> Result<Proxy> {
        self.for_entity(entity, options)?.persist()
    }

    /// Merge a managed entity, or persist a transient one.
    pub(crate) fn merge(&self, entity: EntityRef, options: Options) -> Result<Proxy> {
        let transient = !entity.is_proxy();
        let ctx = self.for_entity(entity, options)?;
        if transient {
            ctx.persist()
        } else {
            ctx.merge()
        }
    }

    pub(crate) fn remove(&self, entity: EntityRef, options: Options) -> Result<()> {
        self.for_entity(entity, options)?.remove()
    }

    pub(crate) fn remove_by_id(&self, entity_type: &str, key: Value, options: Options) -> Result<()> {
        self.for_key(entity_type, key, options)?.remove()
    }

    pub(crate) fn refresh(&self, entity: EntityRef, options: Options) -> Result<()> {
        self.for_entity(entity, options)?.refresh()
    }

    pub(crate) fn find(&self, entity_type: &str, key: Value, options: Options) -> Result<Option<Proxy>> {
        self.for_key(entity_type, key, options)?.find()
    }

    /// A reference whose later reads use the consistency level in `options`.
    pub(crate) fn get_reference(
        &self,
        entity_type: &str,
        key: Value,
        options: Options,
    ) -> Result<Proxy> {
        let ctx = self.for_key(entity_type, key, options)?;
        Proxy::reference(&ctx)
    }
}

/// A plain copy of an entity, detached from any proxy.
pub(crate) fn unwrap(entity: &EntityRef) -> Entity {
    match entity {
        EntityRef::Managed(proxy) => proxy.detach(),
        EntityRef::Transient(entity) => entity.clone(),
    }
}
