//! Persistence contexts.
//!
//! A [`PersistenceContext`] bundles everything one operation on one entity
//! needs: the entity (or its type and key), its metadata, the call
//! options, and the flush context its statements go to. Cascaded
//! operations run in contexts forked from their parent: a fork shares the
//! parent's flush context and options but resolves its own consistency
//! levels against the joined entity's type.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use colmap_proto::{ColumnValue, ConsistencyLevel, Statement, Value};
use tracing::{debug, instrument};

use crate::cascade::CascadeExecutor;
use crate::catalog::{EntityMeta, PropertyMeta};
use crate::consistency::OperationKind;
use crate::context::flush::{FlushContext, Undo};
use crate::entity::{Entity, EntityRef, PropertyValue};
use crate::error::{CodecError, Result, StateError};
use crate::mapping;
use crate::proxy::Proxy;
use crate::runtime::Runtime;

/// Per-call options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Options {
    /// Explicit consistency level for every statement of the call.
    pub consistency: Option<ConsistencyLevel>,
    /// Time-to-live of written columns, in seconds.
    pub ttl: Option<u32>,
    /// Write timestamp, in microseconds.
    pub timestamp: Option<i64>,
}

impl Options {
    /// No options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the consistency level.
    pub fn with_consistency(mut self, level: ConsistencyLevel) -> Self {
        self.consistency = Some(level);
        self
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self
    }

    /// Set the write timestamp.
    pub fn with_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self
    }
}

/// What a context operates on.
#[derive(Clone)]
pub enum ContextTarget {
    /// An entity instance, transient or managed.
    Entity(EntityRef),
    /// An entity addressed by its key only.
    Key(Value),
}

/// Property values read from storage.
pub(crate) struct LoadedValues {
    pub values: Vec<(String, PropertyValue)>,
    pub counters: HashMap<String, i64>,
}

/// The unit of work of one operation on one entity.
#[derive(Clone)]
pub struct PersistenceContext {
    runtime: Arc<Runtime>,
    meta: Arc<EntityMeta>,
    flush: Arc<dyn FlushContext>,
    options: Options,
    target: ContextTarget,
    depth: usize,
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &self.target {
            ContextTarget::Entity(e) => format!("{e:?}"),
            ContextTarget::Key(k) => k.to_string(),
        };
        f.debug_struct("PersistenceContext")
            .field("entity_type", &self.meta.entity_type)
            .field("target", &target)
            .field("options", &self.options)
            .field("flush", &self.flush.mode())
            .field("depth", &self.depth)
            .finish()
    }
}

impl PersistenceContext {
    /// Context for an entity instance.
    pub fn for_entity(
        runtime: Arc<Runtime>,
        flush: Arc<dyn FlushContext>,
        entity: impl Into<EntityRef>,
        options: Options,
    ) -> Result<Self> {
        let entity = entity.into();
        let meta = runtime.meta(entity.entity_type())?;
        Ok(Self {
            runtime,
            meta,
            flush,
            options,
            target: ContextTarget::Entity(entity),
            depth: 0,
        })
    }

    /// Context for an entity addressed by type and key.
    pub fn for_key(
        runtime: Arc<Runtime>,
        flush: Arc<dyn FlushContext>,
        entity_type: &str,
        key: impl Into<Value>,
        options: Options,
    ) -> Result<Self> {
        let meta = runtime.meta(entity_type)?;
        let key = mapping::normalize_key(&meta, &key.into())?;
        Ok(Self {
            runtime,
            meta,
            flush,
            options,
            target: ContextTarget::Key(key),
            depth: 0,
        })
    }

    fn join_meta(&self, join_property: &str) -> Result<Arc<EntityMeta>> {
        let prop = self.meta.property(join_property)?;
        let join = prop.join.as_ref().ok_or_else(|| CodecError::ShapeMismatch {
            property: prop.name.clone(),
            expected: "a join property",
        })?;
        self.runtime.meta(&join.target)
    }

    /// Child context for an entity joined through `join_property`.
    ///
    /// The child shares this context's flush context and options.
    pub fn fork(&self, join_property: &str, target: impl Into<EntityRef>) -> Result<Self> {
        let meta = self.join_meta(join_property)?;
        Ok(Self {
            runtime: self.runtime.clone(),
            meta,
            flush: self.flush.clone(),
            options: self.options,
            target: ContextTarget::Entity(target.into()),
            depth: self.depth + 1,
        })
    }

    /// Child context for an entity joined through `join_property`, by key.
    pub fn fork_key(&self, join_property: &str, key: &Value) -> Result<Self> {
        let meta = self.join_meta(join_property)?;
        let key = mapping::normalize_key(&meta, key)?;
        Ok(Self {
            runtime: self.runtime.clone(),
            meta,
            flush: self.flush.clone(),
            options: self.options,
            target: ContextTarget::Key(key),
            depth: self.depth + 1,
        })
    }

    /// The context a proxy keeps for loading its properties later.
    ///
    /// It addresses the entity by key. Of the call options it keeps only
    /// the consistency level, so lazy reads use the level the proxy was
    /// obtained with.
    pub(crate) fn for_proxy(&self, key: Value) -> Self {
        Self {
            runtime: self.runtime.clone(),
            meta: self.meta.clone(),
            flush: self.flush.clone(),
            options: Options {
                consistency: self.options.consistency,
                ..Options::default()
            },
            target: ContextTarget::Key(key),
            depth: 0,
        }
    }

    /// Entity type name.
    pub fn entity_type(&self) -> &str {
        &self.meta.entity_type
    }

    /// Entity metadata.
    pub fn meta(&self) -> &Arc<EntityMeta> {
        &self.meta
    }

    /// The shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The flush context.
    pub fn flush(&self) -> &Arc<dyn FlushContext> {
        &self.flush
    }

    /// Call options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The target of the context.
    pub fn target(&self) -> &ContextTarget {
        &self.target
    }

    /// Nesting depth; zero for a root context.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Effective read level of this context.
    pub fn read_level(&self) -> Result<ConsistencyLevel> {
        self.level(OperationKind::Read)
    }

    /// Effective write level of this context.
    pub fn write_level(&self) -> Result<ConsistencyLevel> {
        self.level(OperationKind::Write)
    }

    fn level(&self, kind: OperationKind) -> Result<ConsistencyLevel> {
        self.runtime.policy().resolve(
            &self.meta.entity_type,
            kind,
            self.options.consistency,
            self.flush.session_levels(),
        )
    }

    /// The stored key of the target.
    pub fn key(&self) -> Result<Value> {
        match &self.target {
            ContextTarget::Key(key) => Ok(key.clone()),
            ContextTarget::Entity(entity) => mapping::entity_key(&self.meta, &entity.unproxy()),
        }
    }

    // Operations

    /// Persist a transient target and its cascaded joins.
    #[instrument(level = "debug", skip(self), fields(entity_type = %self.meta.entity_type))]
    pub fn persist(&self) -> Result<Proxy> {
        match &self.target {
            ContextTarget::Entity(EntityRef::Transient(entity)) => {
                CascadeExecutor::new(self.runtime.config()).persist(self, entity)
            }
            ContextTarget::Entity(EntityRef::Managed(_)) => Err(StateError::AlreadyManaged {
                entity_type: self.meta.entity_type.clone(),
            }
            .into()),
            ContextTarget::Key(_) => Err(self.missing_instance("persist")),
        }
    }

    /// Write the dirty properties of a managed target and cascade.
    #[instrument(level = "debug", skip(self), fields(entity_type = %self.meta.entity_type))]
    pub fn merge(&self) -> Result<Proxy> {
        let proxy = self.managed_target("merge")?;
        CascadeExecutor::new(self.runtime.config()).merge(self, &proxy)
    }

    /// Delete the target's row. Joined entities are never touched.
    #[instrument(level = "debug", skip(self), fields(entity_type = %self.meta.entity_type))]
    pub fn remove(&self) -> Result<()> {
        if let ContextTarget::Entity(EntityRef::Transient(_)) = &self.target {
            return Err(self.not_managed("remove"));
        }
        let key = self.key()?;
        self.delete_row(&key)
    }

    /// Reload a managed target from storage and cascade.
    #[instrument(level = "debug", skip(self), fields(entity_type = %self.meta.entity_type))]
    pub fn refresh(&self) -> Result<()> {
        let proxy = self.managed_target("refresh")?;
        CascadeExecutor::new(self.runtime.config()).refresh(self, &proxy)
    }

    /// Load the target by key. Returns `None` if no row exists.
    #[instrument(level = "debug", skip(self), fields(entity_type = %self.meta.entity_type))]
    pub fn find(&self) -> Result<Option<Proxy>> {
        let key = self.key()?;
        let eager: Vec<&PropertyMeta> = self
            .meta
            .eager_properties()
            .chain(self.meta.counter_properties().filter(|p| !p.lazy))
            .collect();

        let Some(loaded) = self.load_properties(&key, &eager, true)? else {
            return Ok(None);
        };

        let instance = Entity::new(&self.meta.entity_type);
        let key_property = self.meta.key_shape()?.property().to_string();
        instance.set(&key_property, key.clone());
        let mut names: BTreeSet<String> = BTreeSet::from([key_property]);
        for (name, value) in loaded.values {
            instance.set(&name, value);
            names.insert(name);
        }

        Ok(Some(Proxy::new(
            instance,
            self.for_proxy(key),
            names,
            loaded.counters,
        )))
    }

    fn managed_target(&self, operation: &'static str) -> Result<Proxy> {
        match &self.target {
            ContextTarget::Entity(EntityRef::Managed(proxy)) => Ok(proxy.clone()),
            ContextTarget::Entity(EntityRef::Transient(_)) => Err(self.not_managed(operation)),
            ContextTarget::Key(_) => Err(self.missing_instance(operation)),
        }
    }

    fn not_managed(&self, operation: &'static str) -> crate::Error {
        StateError::NotManaged {
            entity_type: self.meta.entity_type.clone(),
            operation,
        }
        .into()
    }

    fn missing_instance(&self, operation: &'static str) -> crate::Error {
        StateError::MissingInstance {
            entity_type: self.meta.entity_type.clone(),
            operation,
        }
        .into()
    }

    // Statements

    fn write_options(&self, statement: Statement) -> Statement {
        statement
            .with_ttl(self.options.ttl)
            .with_timestamp(self.options.timestamp)
    }

    fn write_counters(
        &self,
        key_columns: &[ColumnValue],
        changes: &[(&PropertyMeta, i64, i64)],
        level: ConsistencyLevel,
    ) -> Result<()> {
        for (prop, current, baseline) in changes {
            let delta = current - baseline;
            if delta != 0 {
                let statement = Statement::increment(
                    self.meta.counter_table(),
                    key_columns.to_vec(),
                    &prop.column,
                    delta,
                );
                self.flush.enqueue(statement, level)?;
            }
        }
        Ok(())
    }

    /// Insert the full row of a transient instance.
    ///
    /// Returns the counter values written, as baselines for later deltas.
    pub(crate) fn insert_row(&self, entity: &Entity) -> Result<HashMap<String, i64>> {
        let level = self.write_level()?;
        let key = mapping::entity_key(&self.meta, entity)?;
        let key_columns = mapping::key_columns(&self.meta, &key)?;

        let mut values = key_columns.clone();
        for prop in self.meta.value_properties() {
            let encoded =
                mapping::encode_property(self.runtime.registry(), prop, &entity.get(&prop.name))?;
            if !encoded.is_null() {
                values.push(ColumnValue::new(&prop.column, encoded));
            }
        }
        let insert = self.write_options(Statement::insert(&self.meta.table, values));
        self.flush.enqueue(insert, level)?;

        let mut baselines = HashMap::new();
        let mut changes = Vec::new();
        for prop in self.meta.counter_properties() {
            let current = mapping::counter_value(prop, &entity.get(&prop.name))?;
            changes.push((prop, current, 0));
            baselines.insert(prop.name.clone(), current);
        }
        self.write_counters(&key_columns, &changes, level)?;

        debug!(table = %self.meta.table, key = %key, "row inserted");
        Ok(baselines)
    }

    /// Write the given dirty properties of a managed instance.
    ///
    /// Returns the new counter baselines.
    pub(crate) fn update_row(
        &self,
        proxy: &Proxy,
        dirty: &[String],
    ) -> Result<HashMap<String, i64>> {
        let level = self.write_level()?;
        let key = proxy.key()?;
        let key_columns = mapping::key_columns(&self.meta, &key)?;
        let instance = proxy.instance();

        let mut values = Vec::new();
        let mut changes = Vec::new();
        let mut baselines = HashMap::new();
        for name in dirty {
            let prop = self.meta.property(name)?;
            let value = instance.get(name);
            if prop.kind.is_counter() {
                let current = mapping::counter_value(prop, &value)?;
                changes.push((prop, current, proxy.counter_baseline(name)));
                baselines.insert(name.clone(), current);
            } else {
                let encoded = mapping::encode_property(self.runtime.registry(), prop, &value)?;
                values.push(ColumnValue::new(&prop.column, encoded));
            }
        }

        if !values.is_empty() {
            let update = Statement::update(&self.meta.table, key_columns.clone(), values);
            self.flush.enqueue(self.write_options(update), level)?;
        }
        self.write_counters(&key_columns, &changes, level)?;

        debug!(table = %self.meta.table, key = %key, columns = dirty.len(), "row updated");
        Ok(baselines)
    }

    /// Clear the dirty flags of `properties` once their update is handed to
    /// the flush context.
    ///
    /// One undo entry is kept per written table, so a discarded batch
    /// leaves the properties dirty with their old counter baselines.
    pub(crate) fn mark_flushed(
        &self,
        proxy: &Proxy,
        properties: &[String],
        counters: HashMap<String, i64>,
    ) {
        let (counter_props, value_props): (Vec<String>, Vec<String>) = properties
            .iter()
            .cloned()
            .partition(|name| counters.contains_key(name));
        let previous = proxy.mark_flushed(properties, counters);
        if !value_props.is_empty() {
            self.flush.record_undo(
                &self.meta.table,
                Undo::flushed(proxy, value_props, HashMap::new()),
            );
        }
        if !counter_props.is_empty() {
            self.flush.record_undo(
                &self.meta.counter_table(),
                Undo::flushed(proxy, counter_props, previous),
            );
        }
    }

    /// Delete the row of `key`, and its counter row if the entity has counters.
    pub(crate) fn delete_row(&self, key: &Value) -> Result<()> {
        let level = self.write_level()?;
        let key_columns = mapping::key_columns(&self.meta, key)?;
        let delete = Statement::delete(&self.meta.table, key_columns.clone())
            .with_timestamp(self.options.timestamp);
        self.flush.enqueue(delete, level)?;

        if self.meta.has_counters() {
            let delete = Statement::delete(self.meta.counter_table(), key_columns)
                .with_timestamp(self.options.timestamp);
            self.flush.enqueue(delete, level)?;
        }

        debug!(table = %self.meta.table, key = %key, "row deleted");
        Ok(())
    }

    /// Check if a row exists for `key`.
    pub(crate) fn exists(&self, key: &Value) -> Result<bool> {
        let level = self.read_level()?;
        let key_columns = mapping::key_columns(&self.meta, key)?;
        let columns = key_columns.iter().map(|c| c.column.clone()).collect();
        let select = Statement::select(&self.meta.table, key_columns, columns);
        Ok(!self.flush.read(select, level)?.is_empty())
    }

    /// Read `props` of the row at `key`.
    ///
    /// Returns `None` if the entity row does not exist. With `require_row`
    /// the row is checked even when only counters are requested.
    pub(crate) fn load_properties(
        &self,
        key: &Value,
        props: &[&PropertyMeta],
        require_row: bool,
    ) -> Result<Option<LoadedValues>> {
        let level = self.read_level()?;
        let key_columns = mapping::key_columns(&self.meta, key)?;
        let (counters, columns): (Vec<&PropertyMeta>, Vec<&PropertyMeta>) =
            props.iter().copied().partition(|p| p.kind.is_counter());

        let mut loaded = LoadedValues {
            values: Vec::with_capacity(props.len()),
            counters: HashMap::new(),
        };

        if !columns.is_empty() || require_row {
            let mut names: Vec<String> = key_columns.iter().map(|c| c.column.clone()).collect();
            names.extend(columns.iter().map(|p| p.column.clone()));
            let select = Statement::select(&self.meta.table, key_columns.clone(), names);
            let result = self.flush.read(select, level)?;
            let Some(row) = result.first() else {
                return Ok(None);
            };

            for prop in columns {
                let stored = row.get(&prop.column).cloned().unwrap_or(Value::Null);
                let value = if prop.is_join() {
                    self.resolve_join(prop, &stored)?
                } else {
                    mapping::decode_value(prop, &stored)?
                };
                loaded.values.push((prop.name.clone(), value));
            }
        }

        if !counters.is_empty() {
            let names = counters.iter().map(|p| p.column.clone()).collect();
            let select = Statement::select(self.meta.counter_table(), key_columns, names);
            let result = self.flush.read(select, level)?;
            let row = result.first();
            for prop in counters {
                let current = row
                    .and_then(|r| r.get(&prop.column))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                loaded
                    .values
                    .push((prop.name.clone(), PropertyValue::from(current)));
                loaded.counters.insert(prop.name.clone(), current);
            }
        }

        Ok(Some(loaded))
    }

    /// Turn the stored keys of a join column into unloaded proxies.
    ///
    /// Joined rows are read on first access, so a key whose row is gone
    /// fails there with `EntityNotFound`.
    fn resolve_join(&self, prop: &PropertyMeta, stored: &Value) -> Result<PropertyValue> {
        mapping::decode_join(prop, stored, |key| {
            let child = self.fork_key(&prop.name, key)?;
            Ok(Some(EntityRef::Managed(Proxy::reference(&child)?)))
        })
    }
}
