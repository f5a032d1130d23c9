//! Managed entity proxies.
//!
//! A [`Proxy`] wraps one managed instance together with the context it
//! was loaded in. Reads of properties that have not been loaded yet go to
//! storage first; writes are recorded in the dirty set so that a later
//! merge only writes what changed. Writing a value equal to the current
//! one is a no-op and does not dirty the property.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use colmap_proto::Value;
use parking_lot::Mutex;
use tracing::trace;

use crate::catalog::PropertyMeta;
use crate::context::{LoadedValues, PersistenceContext};
use crate::entity::{Entity, EntityAccess, EntityRef, PropertyValue};
use crate::error::{Result, StateError};
use crate::mapping;

#[derive(Debug, Default)]
struct ProxyState {
    dirty: BTreeSet<String>,
    loaded: BTreeSet<String>,
    counters: HashMap<String, i64>,
}

struct ProxyInner {
    instance: Entity,
    context: PersistenceContext,
    state: Mutex<ProxyState>,
}

/// A managed entity.
///
/// Clones share the same instance and tracking state.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Wrap a managed instance whose `loaded` properties hold current values.
    pub(crate) fn new(
        instance: Entity,
        context: PersistenceContext,
        loaded: impl IntoIterator<Item = String>,
        counters: HashMap<String, i64>,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                instance,
                context,
                state: Mutex::new(ProxyState {
                    dirty: BTreeSet::new(),
                    loaded: loaded.into_iter().collect(),
                    counters,
                }),
            }),
        }
    }

    /// A proxy for an entity known only by key. Nothing is read until a
    /// property is accessed.
    pub fn reference(context: &PersistenceContext) -> Result<Self> {
        let key = context.key()?;
        let key_property = context.meta().key_shape()?.property().to_string();
        let instance = Entity::new(context.entity_type());
        instance.set(&key_property, key.clone());
        Ok(Self::new(
            instance,
            context.for_proxy(key),
            [key_property],
            HashMap::new(),
        ))
    }

    /// The proxy behind a reference, or an error if it is transient.
    pub fn ensure_proxy(entity: &EntityRef) -> Result<Proxy> {
        match entity {
            EntityRef::Managed(proxy) => Ok(proxy.clone()),
            EntityRef::Transient(instance) => Err(StateError::NotManaged {
                entity_type: instance.entity_type().to_string(),
                operation: "ensure_proxy",
            }
            .into()),
        }
    }

    /// The wrapped instance.
    pub fn instance(&self) -> &Entity {
        &self.inner.instance
    }

    /// The context the proxy loads through.
    pub fn context(&self) -> &PersistenceContext {
        &self.inner.context
    }

    /// The entity type name.
    pub fn entity_type(&self) -> &str {
        self.inner.instance.entity_type()
    }

    /// The stored key of the entity.
    pub fn key(&self) -> Result<Value> {
        self.inner.context.key()
    }

    /// Check if both handles wrap the same proxy.
    pub fn ptr_eq(&self, other: &Proxy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Names of the properties written since the last flush.
    pub fn dirty(&self) -> Vec<String> {
        self.inner.state.lock().dirty.iter().cloned().collect()
    }

    /// Check if any property was written since the last flush.
    pub fn is_dirty(&self) -> bool {
        !self.inner.state.lock().dirty.is_empty()
    }

    /// Names of the properties holding current values.
    pub fn loaded(&self) -> Vec<String> {
        self.inner.state.lock().loaded.iter().cloned().collect()
    }

    /// Check if a property holds its current value.
    pub fn is_loaded(&self, property: &str) -> bool {
        self.inner.state.lock().loaded.contains(property)
    }

    /// Read a property, loading it first if needed.
    ///
    /// Loading a lazy property reads only that property. Loading an eager
    /// property reads every eager property that is not loaded yet.
    pub fn get(&self, property: &str) -> Result<PropertyValue> {
        let meta = self.inner.context.meta().clone();
        let prop = meta.property(property)?;
        if self.is_loaded(property) {
            return Ok(self.inner.instance.get(property));
        }

        let props: Vec<&PropertyMeta> = if prop.lazy {
            vec![prop]
        } else {
            let loaded = self.inner.state.lock().loaded.clone();
            meta.eager_properties()
                .chain(meta.counter_properties().filter(|p| !p.lazy))
                .filter(|p| !loaded.contains(&p.name))
                .collect()
        };
        self.load(&self.inner.context, &props)?;
        Ok(self.inner.instance.get(property))
    }

    /// Write a property and mark it dirty, unless the value is unchanged.
    ///
    /// A property that is not loaded is never compared: the write always
    /// dirties it.
    pub fn set(&self, property: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        let meta = self.inner.context.meta();
        let prop = meta.property(property)?;
        mapping::check_shape(prop, &value)?;

        if meta.is_key(property) {
            if self.inner.instance.get(property) == value {
                return Ok(());
            }
            return Err(StateError::KeyMutation {
                entity_type: meta.entity_type.clone(),
                property: property.to_string(),
            }
            .into());
        }

        let mut state = self.inner.state.lock();
        if state.loaded.contains(property) && self.inner.instance.get(property) == value {
            trace!(property, "unchanged write ignored");
            return Ok(());
        }
        self.inner.instance.set(property, value);
        state.dirty.insert(property.to_string());
        state.loaded.insert(property.to_string());
        Ok(())
    }

    /// Load every property that is not loaded yet.
    pub fn initialize(&self) -> Result<()> {
        let meta = self.inner.context.meta().clone();
        let loaded = self.inner.state.lock().loaded.clone();
        let props: Vec<&PropertyMeta> = meta
            .properties()
            .iter()
            .filter(|p| !meta.is_key(&p.name) && !loaded.contains(&p.name))
            .collect();
        if props.is_empty() {
            return Ok(());
        }
        self.load(&self.inner.context, &props)
    }

    /// A plain copy of the instance, detached from the proxy.
    ///
    /// Joined proxies are unwrapped to their instances.
    pub fn detach(&self) -> Entity {
        let copy = Entity::new(self.entity_type());
        for (name, value) in self.inner.instance.snapshot() {
            copy.set(&name, value.map_entities(|e| EntityRef::Transient(e.unproxy())));
        }
        copy
    }

    /// Read `props` through `context` and store them as loaded.
    fn load(&self, context: &PersistenceContext, props: &[&PropertyMeta]) -> Result<()> {
        let key = self.key()?;
        let loaded = context
            .load_properties(&key, props, false)?
            .ok_or_else(|| StateError::EntityNotFound {
                entity_type: self.entity_type().to_string(),
                key: key.to_string(),
            })?;
        self.apply_loaded(loaded, false);
        Ok(())
    }

    /// Reload the loaded and eager properties through `context`, dropping
    /// unflushed writes.
    pub(crate) fn reload(&self, context: &PersistenceContext) -> Result<()> {
        let meta = self.inner.context.meta().clone();
        let loaded = self.inner.state.lock().loaded.clone();
        let props: Vec<&PropertyMeta> = meta
            .properties()
            .iter()
            .filter(|p| !meta.is_key(&p.name))
            .filter(|p| loaded.contains(&p.name) || !p.lazy)
            .collect();

        let key = self.key()?;
        let values = context
            .load_properties(&key, &props, true)?
            .ok_or_else(|| StateError::EntityNotFound {
                entity_type: self.entity_type().to_string(),
                key: key.to_string(),
            })?;
        self.apply_loaded(values, true);
        Ok(())
    }

    fn apply_loaded(&self, loaded: LoadedValues, reset_dirty: bool) {
        let mut state = self.inner.state.lock();
        if reset_dirty {
            state.dirty.clear();
        }
        for (name, value) in loaded.values {
            // Unflushed writes win over what storage returned.
            if state.dirty.contains(&name) {
                continue;
            }
            self.inner.instance.set(&name, value);
            state.loaded.insert(name);
        }
        for (name, current) in loaded.counters {
            if !state.dirty.contains(&name) {
                state.counters.insert(name, current);
            }
        }
    }

    /// Last counter value read from or written to storage.
    pub(crate) fn counter_baseline(&self, property: &str) -> i64 {
        self.inner
            .state
            .lock()
            .counters
            .get(property)
            .copied()
            .unwrap_or(0)
    }

    /// Forget the given dirty properties once their write was handed over
    /// and move the counter baselines forward.
    ///
    /// Returns the baselines that were replaced.
    pub(crate) fn mark_flushed(
        &self,
        properties: &[String],
        counters: HashMap<String, i64>,
    ) -> HashMap<String, i64> {
        let mut state = self.inner.state.lock();
        for name in properties {
            state.dirty.remove(name);
        }
        counters
            .into_iter()
            .map(|(name, current)| {
                let previous = state.counters.insert(name.clone(), current).unwrap_or(0);
                (name, previous)
            })
            .collect()
    }

    /// Mark properties dirty again, putting back their counter baselines.
    pub(crate) fn restore_dirty(&self, properties: &[String], counters: HashMap<String, i64>) {
        let mut state = self.inner.state.lock();
        state.dirty.extend(properties.iter().cloned());
        state.counters.extend(counters);
    }

    /// Replace a loaded value without dirtying it.
    pub(crate) fn replace_loaded(&self, property: &str, value: PropertyValue) {
        let mut state = self.inner.state.lock();
        self.inner.instance.set(property, value);
        state.loaded.insert(property.to_string());
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Proxy")
            .field("instance", &self.inner.instance)
            .field("dirty", &state.dirty)
            .field("loaded", &state.loaded)
            .finish()
    }
}

impl EntityAccess for Proxy {
    fn entity_type(&self) -> &str {
        Proxy::entity_type(self)
    }

    fn read(&self, property: &str) -> Result<PropertyValue> {
        self.get(property)
    }

    fn write(&self, property: &str, value: PropertyValue) -> Result<()> {
        self.set(property, value)
    }
}
