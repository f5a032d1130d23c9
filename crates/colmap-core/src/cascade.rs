//! Cascading of persist, merge and refresh across join properties.
//!
//! Each root operation runs one [`CascadeExecutor`]. The executor walks
//! the join graph from the root, forking a child context for every joined
//! entity whose join property permits the operation. Entities already
//! visited by the current operation are not processed again, so cyclic
//! graphs terminate. Remove never cascades.

use std::collections::HashMap;

use colmap_proto::Value;
use tracing::debug;

use crate::catalog::{CascadeOperation, PropertyMeta};
use crate::config::EngineConfig;
use crate::context::{PersistenceContext, Undo};
use crate::entity::{Entity, EntityRef};
use crate::error::{Result, StateError};
use crate::proxy::Proxy;

/// Entity type and rendered key of a visited entity.
type VisitKey = (String, String);

/// Entities touched by one cascaded operation.
#[derive(Debug, Default)]
pub struct CascadeResult {
    /// Entities inserted, as (type, key).
    pub persisted: Vec<(String, Value)>,
    /// Entities whose dirty properties were written.
    pub merged: Vec<(String, Value)>,
    /// Entities reloaded from storage.
    pub refreshed: Vec<(String, Value)>,
}

impl CascadeResult {
    /// Create an empty cascade result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the total number of affected entities.
    pub fn affected_count(&self) -> usize {
        self.persisted.len() + self.merged.len() + self.refreshed.len()
    }
}

/// Runs one root operation and its cascade.
pub struct CascadeExecutor {
    max_depth: usize,
    ensure_join_exists: bool,
    visited: HashMap<VisitKey, Proxy>,
    result: CascadeResult,
}

impl CascadeExecutor {
    /// Create an executor for one root operation.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_depth: config.max_cascade_depth,
            ensure_join_exists: config.ensure_join_exists,
            visited: HashMap::new(),
            result: CascadeResult::new(),
        }
    }

    /// What the operations run so far touched.
    pub fn result(&self) -> &CascadeResult {
        &self.result
    }

    /// Persist a transient entity and cascade to its joins.
    pub fn persist(&mut self, ctx: &PersistenceContext, entity: &Entity) -> Result<Proxy> {
        let proxy = self.persist_entity(ctx, entity)?;
        self.finish(CascadeOperation::Persist, ctx);
        Ok(proxy)
    }

    /// Write the dirty properties of a managed entity and cascade.
    pub fn merge(&mut self, ctx: &PersistenceContext, proxy: &Proxy) -> Result<Proxy> {
        self.merge_proxy(ctx, proxy)?;
        self.finish(CascadeOperation::Merge, ctx);
        Ok(proxy.clone())
    }

    /// Reload a managed entity and cascade.
    pub fn refresh(&mut self, ctx: &PersistenceContext, proxy: &Proxy) -> Result<()> {
        self.refresh_proxy(ctx, proxy)?;
        self.finish(CascadeOperation::Refresh, ctx);
        Ok(())
    }

    fn finish(&self, operation: CascadeOperation, ctx: &PersistenceContext) {
        debug!(
            operation = %operation,
            entity_type = %ctx.entity_type(),
            affected = self.result.affected_count(),
            "cascade complete"
        );
    }

    fn check_depth(&self, ctx: &PersistenceContext) -> Result<()> {
        if ctx.depth() > self.max_depth {
            return Err(StateError::CascadeDepthExceeded { depth: ctx.depth() }.into());
        }
        Ok(())
    }

    fn visit_key(ctx: &PersistenceContext, key: &Value) -> VisitKey {
        (ctx.entity_type().to_string(), key.to_string())
    }

    fn persist_entity(&mut self, ctx: &PersistenceContext, entity: &Entity) -> Result<Proxy> {
        self.check_depth(ctx)?;
        if let Some(proxy) = ctx.flush().managed(entity.identity()) {
            debug!(entity_type = %ctx.entity_type(), "already persisted in this batch");
            return Ok(proxy);
        }

        let key = ctx.key()?;
        let visit = Self::visit_key(ctx, &key);
        if let Some(proxy) = self.visited.get(&visit) {
            return Ok(proxy.clone());
        }

        if self.ensure_join_exists {
            self.check_joins_exist(ctx, entity, CascadeOperation::Persist, None)?;
        }
        let counters = ctx.insert_row(entity)?;

        let loaded = ctx.meta().properties().iter().map(|p| p.name.clone());
        let proxy = Proxy::new(entity.clone(), ctx.for_proxy(key.clone()), loaded, counters);
        self.visited.insert(visit, proxy.clone());
        ctx.flush().register_managed(entity.identity(), &proxy);
        self.result
            .persisted
            .push((ctx.entity_type().to_string(), key));

        self.cascade(ctx, &proxy, CascadeOperation::Persist)?;
        Ok(proxy)
    }

    fn merge_proxy(&mut self, ctx: &PersistenceContext, proxy: &Proxy) -> Result<()> {
        self.check_depth(ctx)?;
        let key = proxy.key()?;
        let visit = Self::visit_key(ctx, &key);
        if self.visited.contains_key(&visit) {
            return Ok(());
        }
        self.visited.insert(visit, proxy.clone());

        let dirty = proxy.dirty();
        if !dirty.is_empty() {
            if self.ensure_join_exists {
                self.check_joins_exist(
                    ctx,
                    proxy.instance(),
                    CascadeOperation::Merge,
                    Some(dirty.as_slice()),
                )?;
            }
            let counters = ctx.update_row(proxy, &dirty)?;
            ctx.mark_flushed(proxy, &dirty, counters);
            self.result
                .merged
                .push((ctx.entity_type().to_string(), key));
        }

        self.cascade(ctx, proxy, CascadeOperation::Merge)
    }

    fn refresh_proxy(&mut self, ctx: &PersistenceContext, proxy: &Proxy) -> Result<()> {
        self.check_depth(ctx)?;
        let key = proxy.key()?;
        let visit = Self::visit_key(ctx, &key);
        if self.visited.contains_key(&visit) {
            return Ok(());
        }
        self.visited.insert(visit, proxy.clone());

        proxy.reload(ctx)?;
        self.result
            .refreshed
            .push((ctx.entity_type().to_string(), key));

        self.cascade(ctx, proxy, CascadeOperation::Refresh)
    }

    /// Apply `operation` to the entities joined to `proxy`.
    ///
    /// The permission is checked before the join value is read, so a join
    /// that does not cascade `operation` is never loaded.
    fn cascade(
        &mut self,
        ctx: &PersistenceContext,
        proxy: &Proxy,
        operation: CascadeOperation,
    ) -> Result<()> {
        let meta = ctx.meta().clone();
        for prop in meta.join_properties() {
            let permitted = prop
                .join
                .as_ref()
                .is_some_and(|join| join.permits(operation));
            if !permitted {
                continue;
            }
            self.cascade_property(ctx, proxy, prop, operation)?;
        }
        Ok(())
    }

    fn cascade_property(
        &mut self,
        ctx: &PersistenceContext,
        proxy: &Proxy,
        prop: &PropertyMeta,
        operation: CascadeOperation,
    ) -> Result<()> {
        let value = proxy.get(&prop.name)?;
        if value.is_null() {
            return Ok(());
        }

        // Transient children persisted here are swapped for their proxies.
        let mut replaced: HashMap<usize, EntityRef> = HashMap::new();
        let mut target_table = None;
        for child in value.entities() {
            let child_ctx = ctx.fork(&prop.name, child.clone())?;
            match (operation, child) {
                (CascadeOperation::Persist | CascadeOperation::Merge, EntityRef::Transient(entity)) => {
                    let managed = self.persist_entity(&child_ctx, entity)?;
                    replaced.insert(entity.identity(), EntityRef::Managed(managed));
                    target_table.get_or_insert_with(|| child_ctx.meta().table.clone());
                }
                (CascadeOperation::Merge, EntityRef::Managed(child_proxy)) => {
                    self.merge_proxy(&child_ctx, child_proxy)?;
                }
                (CascadeOperation::Refresh, EntityRef::Managed(child_proxy)) => {
                    self.refresh_proxy(&child_ctx, child_proxy)?;
                }
                _ => {}
            }
        }

        if let Some(table) = target_table {
            let updated = value.map_entities(|e| {
                replaced
                    .get(&e.identity())
                    .cloned()
                    .unwrap_or_else(|| e.clone())
            });
            ctx.flush()
                .record_undo(&table, Undo::swapped(proxy, &prop.name, value));
            proxy.replace_loaded(&prop.name, updated);
        }
        Ok(())
    }

    /// Check that transient entities behind joins that do not cascade
    /// `operation` already exist.
    fn check_joins_exist(
        &self,
        ctx: &PersistenceContext,
        entity: &Entity,
        operation: CascadeOperation,
        only: Option<&[String]>,
    ) -> Result<()> {
        for prop in ctx.meta().join_properties() {
            if prop.join.as_ref().is_some_and(|join| join.permits(operation)) {
                continue;
            }
            if only.is_some_and(|names| !names.contains(&prop.name)) {
                continue;
            }

            let value = entity.get(&prop.name);
            for child in value.entities() {
                if child.is_proxy() {
                    continue;
                }
                let child_ctx = ctx.fork(&prop.name, child.clone())?;
                let key = child_ctx.key()?;
                if !child_ctx.exists(&key)? {
                    return Err(StateError::JoinEntityMissing {
                        entity_type: child_ctx.entity_type().to_string(),
                        key: key.to_string(),
                        property: prop.name.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consistency::{ConsistencyPolicy, SessionLevels};
    use crate::context::{FlushContext, Options};
    use crate::entity::PropertyValue;
    use crate::error::Error;
    use crate::test_support::{batching, immediate, runtime, runtime_with, Recorder};
    use crate::runtime::Runtime;
    use colmap_proto::{Statement, StatementKind};
    use std::sync::Arc;

    fn order_with_items() -> (Entity, Entity, Entity) {
        let order = Entity::new("Order").with("id", 1i64).with("total", 25.0);
        let item1 = Entity::new("Item")
            .with("id", 10i64)
            .with("sku", "A-1")
            .with("order", order.clone());
        let item2 = Entity::new("Item")
            .with("id", 11i64)
            .with("sku", "B-2")
            .with("order", order.clone());
        order.set("items", vec![item1.clone(), item2.clone()]);
        (order, item1, item2)
    }

    fn ctx(
        runtime: &Arc<Runtime>,
        flush: Arc<dyn FlushContext>,
        entity: impl Into<EntityRef>,
    ) -> PersistenceContext {
        PersistenceContext::for_entity(runtime.clone(), flush, entity, Options::new()).unwrap()
    }

    fn inserts(recorder: &Recorder, table: &str) -> usize {
        recorder
            .for_table(table)
            .iter()
            .filter(|r| r.statement.kind() == StatementKind::Insert)
            .count()
    }

    #[test]
    fn test_persist_order_with_items_shares_one_batch() {
        let (runtime, recorder) = runtime();
        let flush = batching(&runtime);
        flush.start(SessionLevels::none()).unwrap();

        let (order, item1, _) = order_with_items();
        let proxy = ctx(&runtime, flush.clone(), order).persist().unwrap();

        // Everything went to the shared batch, nothing was submitted.
        assert!(recorder.mutations().is_empty());
        assert_eq!(flush.pending(), 3);

        flush.end().unwrap();
        assert_eq!(inserts(&recorder, "orders"), 1);
        assert_eq!(inserts(&recorder, "items"), 2);
        assert!(recorder.mutations().iter().all(|r| r.batched));

        let items = proxy.get("items").unwrap();
        let managed = items.entities();
        assert_eq!(managed.len(), 2);
        assert!(managed.iter().all(|e| e.is_proxy()));
        assert!(managed[0].unproxy().ptr_eq(&item1));
        assert!(!proxy.is_dirty());
    }

    #[test]
    fn test_cycle_back_to_root_terminates() {
        let (runtime, recorder) = runtime();
        let (order, item1, _) = order_with_items();
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();

        assert_eq!(inserts(&recorder, "orders"), 1);
        let items = proxy.get("items").unwrap();
        let item_proxy = Proxy::ensure_proxy(items.entities()[0]).unwrap();
        assert!(item_proxy.instance().ptr_eq(&item1));
        let back = item_proxy.get("order").unwrap();
        assert!(Proxy::ensure_proxy(back.as_entity().unwrap())
            .unwrap()
            .ptr_eq(&proxy));
    }

    #[test]
    fn test_join_without_permission_issues_nothing() {
        let (runtime, recorder) = runtime();
        let customer = Entity::new("Customer").with("id", 7i64).with("name", "Ada");
        let order = Entity::new("Order")
            .with("id", 1i64)
            .with("customer", customer.clone());
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();

        assert!(recorder.for_table("customers").is_empty());
        assert_eq!(
            recorder.inner().row("orders", &[Value::Int64(1)]).unwrap()["customer"],
            Value::Int64(7)
        );
        // The customer is left transient.
        assert!(!proxy.get("customer").unwrap().as_entity().unwrap().is_proxy());

        recorder.clear();
        proxy.set("total", 3.0).unwrap();
        proxy.set("customer", customer).unwrap();
        ctx(&runtime, immediate(&runtime), proxy).merge().unwrap();
        assert!(recorder.for_table("customers").is_empty());
    }

    #[test]
    fn test_remove_never_touches_joins() {
        let (runtime, recorder) = runtime();
        let (order, _, _) = order_with_items();
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        recorder.clear();

        ctx(&runtime, immediate(&runtime), proxy).remove().unwrap();
        assert!(recorder.for_table("items").is_empty());
        assert_eq!(recorder.inner().row_count("items"), 2);
        assert_eq!(recorder.inner().row_count("orders"), 0);
    }

    #[test]
    fn test_merge_writes_only_changed_property() {
        let (runtime, recorder) = runtime();
        let (order, _, _) = order_with_items();
        ctx(&runtime, immediate(&runtime), order).persist().unwrap();

        let found = PersistenceContext::for_key(
            runtime.clone(),
            immediate(&runtime),
            "Order",
            1i64,
            Options::new(),
        )
        .unwrap()
        .find()
        .unwrap()
        .unwrap();
        found.set("total", 30.0).unwrap();
        recorder.clear();

        let merged = ctx(&runtime, immediate(&runtime), found.clone()).merge().unwrap();
        assert!(merged.ptr_eq(&found));
        assert!(!found.is_dirty());

        let mutations = recorder.mutations();
        assert_eq!(mutations.len(), 1);
        match &mutations[0].statement {
            Statement::Update { table, values, .. } => {
                assert_eq!(table, "orders");
                assert_eq!(values.len(), 1);
                assert_eq!(values[0].column, "total");
                assert_eq!(values[0].value, Value::Float64(30.0));
            }
            other => panic!("expected an update, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_persists_new_children_and_merges_managed_ones() {
        let (runtime, recorder) = runtime();
        let (order, _, _) = order_with_items();
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();

        let items = proxy.get("items").unwrap();
        let first = Proxy::ensure_proxy(items.entities()[0]).unwrap();
        first.set("sku", "A-9").unwrap();

        let item3 = Entity::new("Item").with("id", 12i64).with("sku", "C-3");
        let mut list: Vec<Option<EntityRef>> = match items {
            PropertyValue::List(list) => list,
            other => panic!("unexpected {other:?}"),
        };
        list.push(Some(EntityRef::from(&item3)));
        proxy.set("items", PropertyValue::List(list)).unwrap();
        recorder.clear();

        ctx(&runtime, immediate(&runtime), proxy.clone()).merge().unwrap();
        assert_eq!(inserts(&recorder, "items"), 1);
        let updates: Vec<_> = recorder
            .mutations()
            .into_iter()
            .filter(|r| r.statement.kind() == StatementKind::Update)
            .map(|r| r.statement.table().to_string())
            .collect();
        assert_eq!(updates, vec!["orders".to_string(), "items".to_string()]);
        assert!(!first.is_dirty());

        let stored = recorder.inner().row("items", &[Value::Int64(10)]).unwrap();
        assert_eq!(stored["sku"], Value::String("A-9".into()));
        assert!(proxy.get("items").unwrap().entities()[2].is_proxy());
    }

    #[test]
    fn test_refresh_reloads_and_cascades() {
        let (runtime, _) = runtime();
        let (order, _, _) = order_with_items();
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        let item = Proxy::ensure_proxy(proxy.get("items").unwrap().entities()[0]).unwrap();

        // Another handle changes the stored rows.
        let other = PersistenceContext::for_key(
            runtime.clone(),
            immediate(&runtime),
            "Item",
            10i64,
            Options::new(),
        )
        .unwrap()
        .find()
        .unwrap()
        .unwrap();
        other.set("sku", "Z-0").unwrap();
        ctx(&runtime, immediate(&runtime), other).merge().unwrap();

        proxy.set("total", 99.0).unwrap();
        ctx(&runtime, immediate(&runtime), proxy.clone())
            .refresh()
            .unwrap();
        assert!(!proxy.is_dirty());
        assert_eq!(proxy.get("total").unwrap(), PropertyValue::from(25.0));

        // Order.items does not cascade refresh: the held item proxy keeps
        // its value while the reloaded list holds fresh proxies.
        assert_eq!(item.get("sku").unwrap(), PropertyValue::from("A-1"));
        let reloaded = proxy.get("items").unwrap();
        let fresh = Proxy::ensure_proxy(reloaded.entities()[0]).unwrap();
        assert_eq!(fresh.get("sku").unwrap(), PropertyValue::from("Z-0"));
    }

    #[test]
    fn test_refresh_of_deleted_row_fails() {
        let (runtime, _) = runtime();
        let order = Entity::new("Order").with("id", 1i64);
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        PersistenceContext::for_key(runtime.clone(), immediate(&runtime), "Order", 1i64, Options::new())
            .unwrap()
            .remove()
            .unwrap();

        assert!(matches!(
            ctx(&runtime, immediate(&runtime), proxy).refresh(),
            Err(Error::State(StateError::EntityNotFound { .. }))
        ));
    }

    #[test]
    fn test_depth_limit() {
        let config = EngineConfig::default().with_max_cascade_depth(0);
        let (runtime, recorder) = runtime_with(config, ConsistencyPolicy::default());
        let (order, _, _) = order_with_items();

        let err = ctx(&runtime, immediate(&runtime), order).persist().unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::CascadeDepthExceeded { depth: 1 })
        ));
        // The root was written before the failing child.
        assert_eq!(inserts(&recorder, "orders"), 1);
        assert_eq!(inserts(&recorder, "items"), 0);
    }

    #[test]
    fn test_ensure_join_exists() {
        let config = EngineConfig::default().with_ensure_join_exists(true);
        let (runtime, recorder) = runtime_with(config, ConsistencyPolicy::default());
        let customer = Entity::new("Customer").with("id", 7i64).with("name", "Ada");
        let order = Entity::new("Order")
            .with("id", 1i64)
            .with("customer", customer.clone());

        let err = ctx(&runtime, immediate(&runtime), order.clone())
            .persist()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::State(StateError::JoinEntityMissing { ref property, .. }) if property == "customer"
        ));
        assert!(recorder.mutations().is_empty());

        ctx(&runtime, immediate(&runtime), customer).persist().unwrap();
        ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        assert_eq!(inserts(&recorder, "orders"), 1);
    }

    #[test]
    fn test_second_persist_in_batch_is_not_duplicated() {
        let (runtime, recorder) = runtime();
        let flush = batching(&runtime);
        flush.start(SessionLevels::none()).unwrap();

        let order = Entity::new("Order").with("id", 1i64);
        let first = ctx(&runtime, flush.clone(), order.clone()).persist().unwrap();
        let second = ctx(&runtime, flush.clone(), order).persist().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(flush.pending(), 1);

        flush.end().unwrap();
        assert_eq!(inserts(&recorder, "orders"), 1);
    }

    #[test]
    fn test_discarded_persist_can_be_retried() {
        let (runtime, recorder) = runtime();
        let flush = batching(&runtime);
        let (order, item1, _) = order_with_items();

        flush.start(SessionLevels::none()).unwrap();
        ctx(&runtime, flush.clone(), order.clone()).persist().unwrap();
        assert_eq!(flush.discard(), 3);

        // The instances hold their transient joins again.
        assert!(order.get("items").entities().iter().all(|e| !e.is_proxy()));
        assert!(!item1.get("order").as_entity().unwrap().is_proxy());

        flush.start(SessionLevels::none()).unwrap();
        let proxy = ctx(&runtime, flush.clone(), order).persist().unwrap();
        flush.end().unwrap();
        assert_eq!(inserts(&recorder, "orders"), 1);
        assert_eq!(inserts(&recorder, "items"), 2);
        assert!(proxy.get("items").unwrap().entities().iter().all(|e| e.is_proxy()));
    }

    #[test]
    fn test_discarded_merge_keeps_dirty_properties() {
        let (runtime, recorder) = runtime();
        let order = Entity::new("Order").with("id", 1i64).with("total", 25.0);
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        proxy.set("total", 30.0).unwrap();

        let flush = batching(&runtime);
        flush.start(SessionLevels::none()).unwrap();
        ctx(&runtime, flush.clone(), proxy.clone()).merge().unwrap();
        assert!(!proxy.is_dirty());
        flush.discard();
        assert_eq!(proxy.dirty(), vec!["total".to_string()]);

        flush.start(SessionLevels::none()).unwrap();
        ctx(&runtime, flush.clone(), proxy.clone()).merge().unwrap();
        flush.end().unwrap();
        assert!(!proxy.is_dirty());
        assert_eq!(
            recorder.inner().row("orders", &[Value::Int64(1)]).unwrap()["total"],
            Value::Float64(30.0)
        );
    }

    #[test]
    fn test_failed_end_then_discard_restores_unsubmitted_tables() {
        let (runtime, recorder) = runtime();
        let order = Entity::new("Order")
            .with("id", 1i64)
            .with("total", 25.0)
            .with("views", 1i64);
        let proxy = ctx(&runtime, immediate(&runtime), order).persist().unwrap();
        proxy.set("total", 30.0).unwrap();
        proxy.set("views", 4i64).unwrap();

        let flush = batching(&runtime);
        flush.start(SessionLevels::none()).unwrap();
        ctx(&runtime, flush.clone(), proxy.clone()).merge().unwrap();
        recorder.inner().fail_on("orders_counters");
        assert!(matches!(flush.end(), Err(Error::Driver(_))));
        flush.discard();

        // The row update went through; the counter increment did not.
        assert_eq!(proxy.dirty(), vec!["views".to_string()]);
        assert_eq!(
            recorder.inner().row("orders", &[Value::Int64(1)]).unwrap()["total"],
            Value::Float64(30.0)
        );

        recorder.inner().recover();
        flush.start(SessionLevels::none()).unwrap();
        ctx(&runtime, flush.clone(), proxy.clone()).merge().unwrap();
        flush.end().unwrap();
        assert_eq!(
            recorder.inner().row("orders_counters", &[Value::Int64(1)]).unwrap()["views"],
            Value::Int64(4)
        );
    }

    #[test]
    fn test_result_counts() {
        let (runtime, _) = runtime();
        let (order, _, _) = order_with_items();
        let ctx = ctx(&runtime, immediate(&runtime), order.clone());
        let mut executor = CascadeExecutor::new(runtime.config());
        executor.persist(&ctx, &order).unwrap();
        assert_eq!(executor.result().persisted.len(), 3);
        assert_eq!(executor.result().affected_count(), 3);
    }
}
