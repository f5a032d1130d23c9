//! Application-side entity instances.
//!
//! An [`Entity`] is a dynamically typed bag of property values shared by
//! reference: cloning an `Entity` yields another handle to the same
//! instance, which is what lets a [`Proxy`] wrap the caller's object
//! without copying it. Joined entities are held as [`EntityRef`]s, which
//! are either plain (transient) instances or managed proxies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use colmap_proto::Value;
use parking_lot::RwLock;

use crate::error::Result;
use crate::proxy::Proxy;

/// The value of one entity property.
#[derive(Clone)]
pub enum PropertyValue {
    /// Unset.
    Null,
    /// A plain value (scalar, collection or counter).
    Value(Value),
    /// A single joined entity.
    Entity(EntityRef),
    /// An ordered list of joined entities.
    List(Vec<Option<EntityRef>>),
    /// A set of joined entities.
    Set(Vec<Option<EntityRef>>),
    /// A map whose values are joined entities.
    Map(Vec<(Value, Option<EntityRef>)>),
}

impl PropertyValue {
    /// Check if the value is unset.
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// The plain value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PropertyValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The joined entity, if this is a single join.
    pub fn as_entity(&self) -> Option<&EntityRef> {
        match self {
            PropertyValue::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Every non-null joined entity held by this value, in iteration order.
    ///
    /// Map keys are not entities and are never returned.
    pub fn entities(&self) -> Vec<&EntityRef> {
        match self {
            PropertyValue::Entity(e) => vec![e],
            PropertyValue::List(items) | PropertyValue::Set(items) => {
                items.iter().flatten().collect()
            }
            PropertyValue::Map(entries) => entries.iter().filter_map(|(_, v)| v.as_ref()).collect(),
            PropertyValue::Null | PropertyValue::Value(_) => Vec::new(),
        }
    }

    /// Rebuild the value with every joined entity replaced through `f`.
    pub fn map_entities(&self, mut f: impl FnMut(&EntityRef) -> EntityRef) -> PropertyValue {
        match self {
            PropertyValue::Entity(e) => PropertyValue::Entity(f(e)),
            PropertyValue::List(items) => {
                PropertyValue::List(items.iter().map(|i| i.as_ref().map(|e| f(e))).collect())
            }
            PropertyValue::Set(items) => {
                PropertyValue::Set(items.iter().map(|i| i.as_ref().map(|e| f(e))).collect())
            }
            PropertyValue::Map(entries) => PropertyValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_ref().map(|e| f(e))))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        fn same(a: &Option<EntityRef>, b: &Option<EntityRef>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a.same_instance(b),
                (None, None) => true,
                _ => false,
            }
        }

        match (self, other) {
            (PropertyValue::Null, PropertyValue::Null) => true,
            (PropertyValue::Value(a), PropertyValue::Value(b)) => a == b,
            (PropertyValue::Entity(a), PropertyValue::Entity(b)) => a.same_instance(b),
            (PropertyValue::List(a), PropertyValue::List(b))
            | (PropertyValue::Set(a), PropertyValue::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| same(x, y))
            }
            (PropertyValue::Map(a), PropertyValue::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && same(va, vb))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Null => f.write_str("Null"),
            PropertyValue::Value(v) => write!(f, "{v}"),
            PropertyValue::Entity(e) => write!(f, "{e:?}"),
            PropertyValue::List(items) | PropertyValue::Set(items) => {
                f.debug_list().entries(items).finish()
            }
            PropertyValue::Map(entries) => f
                .debug_map()
                .entries(entries.iter().map(|(k, v)| (k.to_string(), v)))
                .finish(),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PropertyValue::Null,
            other => PropertyValue::Value(other),
        }
    }
}

macro_rules! plain_value_from {
    ($($t:ty),*) => {
        $(impl From<$t> for PropertyValue {
            fn from(value: $t) -> Self {
                PropertyValue::from(Value::from(value))
            }
        })*
    };
}

plain_value_from!(bool, i32, i64, f32, f64, String, &str, Vec<u8>);

impl From<Entity> for PropertyValue {
    fn from(entity: Entity) -> Self {
        PropertyValue::Entity(entity.into())
    }
}

impl From<Proxy> for PropertyValue {
    fn from(proxy: Proxy) -> Self {
        PropertyValue::Entity(proxy.into())
    }
}

impl From<EntityRef> for PropertyValue {
    fn from(entity: EntityRef) -> Self {
        PropertyValue::Entity(entity)
    }
}

impl From<Vec<Entity>> for PropertyValue {
    fn from(entities: Vec<Entity>) -> Self {
        PropertyValue::List(entities.into_iter().map(|e| Some(e.into())).collect())
    }
}

struct EntityInner {
    entity_type: String,
    properties: RwLock<BTreeMap<String, PropertyValue>>,
}

/// A plain entity instance.
///
/// Clones share the same instance; use [`Entity::snapshot`] to copy the
/// property values.
#[derive(Clone)]
pub struct Entity {
    inner: Arc<EntityInner>,
}

impl Entity {
    /// Create an empty instance of `entity_type`.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EntityInner {
                entity_type: entity_type.into(),
                properties: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Set a property while building the instance.
    pub fn with(self, property: &str, value: impl Into<PropertyValue>) -> Self {
        self.set(property, value);
        self
    }

    /// The entity type name.
    pub fn entity_type(&self) -> &str {
        &self.inner.entity_type
    }

    /// Get a property value. Unset properties read as [`PropertyValue::Null`].
    pub fn get(&self, property: &str) -> PropertyValue {
        self.inner
            .properties
            .read()
            .get(property)
            .cloned()
            .unwrap_or(PropertyValue::Null)
    }

    /// Set a property value, returning the previous one.
    pub fn set(&self, property: &str, value: impl Into<PropertyValue>) -> PropertyValue {
        let value = value.into();
        let mut properties = self.inner.properties.write();
        let previous = if value.is_null() {
            properties.remove(property)
        } else {
            properties.insert(property.to_string(), value)
        };
        previous.unwrap_or(PropertyValue::Null)
    }

    /// Names of the properties that are set.
    pub fn property_names(&self) -> Vec<String> {
        self.inner.properties.read().keys().cloned().collect()
    }

    /// Copy of every set property.
    pub fn snapshot(&self) -> BTreeMap<String, PropertyValue> {
        self.inner.properties.read().clone()
    }

    /// Identity of the instance, stable for its lifetime.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Check if both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Entity) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Entity {
    // Joined entities print by type only, so cyclic graphs terminate.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let properties = self.inner.properties.read();
        let mut s = f.debug_struct(&self.inner.entity_type);
        for (name, value) in properties.iter() {
            match value {
                PropertyValue::Value(v) => s.field(name, &format_args!("{v}")),
                PropertyValue::Null => s.field(name, &"null"),
                other => s.field(name, &format_args!("<{} joined>", other.entities().len())),
            };
        }
        s.finish()
    }
}

/// A reference to a joined entity: a transient instance or a managed proxy.
#[derive(Clone)]
pub enum EntityRef {
    /// A plain instance, not yet managed.
    Transient(Entity),
    /// A managed proxy.
    Managed(Proxy),
}

impl EntityRef {
    /// Check if the referenced entity is managed.
    pub fn is_proxy(&self) -> bool {
        matches!(self, EntityRef::Managed(_))
    }

    /// The underlying instance, unwrapping a proxy if necessary.
    pub fn unproxy(&self) -> Entity {
        match self {
            EntityRef::Transient(entity) => entity.clone(),
            EntityRef::Managed(proxy) => proxy.instance().clone(),
        }
    }

    /// The proxy, if the entity is managed.
    pub fn as_proxy(&self) -> Option<&Proxy> {
        match self {
            EntityRef::Managed(proxy) => Some(proxy),
            EntityRef::Transient(_) => None,
        }
    }

    /// The entity type name.
    pub fn entity_type(&self) -> &str {
        match self {
            EntityRef::Transient(entity) => entity.entity_type(),
            EntityRef::Managed(proxy) => proxy.instance().entity_type(),
        }
    }

    /// Identity of the underlying instance.
    pub fn identity(&self) -> usize {
        match self {
            EntityRef::Transient(entity) => entity.identity(),
            EntityRef::Managed(proxy) => proxy.instance().identity(),
        }
    }

    /// Check if both references point at the same instance.
    pub fn same_instance(&self, other: &EntityRef) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Transient(entity) => write!(f, "Transient({})", entity.entity_type()),
            EntityRef::Managed(proxy) => write!(f, "Managed({})", proxy.instance().entity_type()),
        }
    }
}

impl From<Entity> for EntityRef {
    fn from(entity: Entity) -> Self {
        EntityRef::Transient(entity)
    }
}

impl From<&Entity> for EntityRef {
    fn from(entity: &Entity) -> Self {
        EntityRef::Transient(entity.clone())
    }
}

impl From<Proxy> for EntityRef {
    fn from(proxy: Proxy) -> Self {
        EntityRef::Managed(proxy)
    }
}

impl From<&Proxy> for EntityRef {
    fn from(proxy: &Proxy) -> Self {
        EntityRef::Managed(proxy.clone())
    }
}

/// Property access shared by transient instances and managed proxies.
///
/// Reading through a proxy may load the property from storage; writing
/// through a proxy records it as dirty.
pub trait EntityAccess {
    /// The entity type name.
    fn entity_type(&self) -> &str;

    /// Read a property.
    fn read(&self, property: &str) -> Result<PropertyValue>;

    /// Write a property.
    fn write(&self, property: &str, value: PropertyValue) -> Result<()>;
}

impl EntityAccess for Entity {
    fn entity_type(&self) -> &str {
        Entity::entity_type(self)
    }

    fn read(&self, property: &str) -> Result<PropertyValue> {
        Ok(self.get(property))
    }

    fn write(&self, property: &str, value: PropertyValue) -> Result<()> {
        self.set(property, value);
        Ok(())
    }
}

impl EntityAccess for EntityRef {
    fn entity_type(&self) -> &str {
        EntityRef::entity_type(self)
    }

    fn read(&self, property: &str) -> Result<PropertyValue> {
        match self {
            EntityRef::Transient(entity) => Ok(entity.get(property)),
            EntityRef::Managed(proxy) => proxy.get(property),
        }
    }

    fn write(&self, property: &str, value: PropertyValue) -> Result<()> {
        match self {
            EntityRef::Transient(entity) => {
                entity.set(property, value);
                Ok(())
            }
            EntityRef::Managed(proxy) => proxy.set(property, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_instance() {
        let order = Entity::new("Order").with("id", 1i64);
        let other = order.clone();
        other.set("total", 9.5);

        assert!(order.ptr_eq(&other));
        assert_eq!(order.identity(), other.identity());
        assert_eq!(order.get("total"), PropertyValue::from(9.5));
        assert_eq!(order.get("missing"), PropertyValue::Null);
    }

    #[test]
    fn test_set_returns_previous_and_null_unsets() {
        let order = Entity::new("Order").with("total", 1.0);
        assert_eq!(order.set("total", 2.0), PropertyValue::from(1.0));
        assert_eq!(order.set("total", Value::Null), PropertyValue::from(2.0));
        assert!(order.property_names().is_empty());
    }

    #[test]
    fn test_join_equality_is_identity() {
        let a = Entity::new("Item").with("id", 1i64);
        let b = Entity::new("Item").with("id", 1i64);

        assert_eq!(PropertyValue::from(a.clone()), PropertyValue::from(a.clone()));
        assert_ne!(PropertyValue::from(a.clone()), PropertyValue::from(b.clone()));

        let list = PropertyValue::from(vec![a.clone(), b.clone()]);
        assert_eq!(list.entities().len(), 2);
        assert_eq!(list, PropertyValue::from(vec![a, b]));
    }

    #[test]
    fn test_entities_skip_nulls_and_map_keys() {
        let item = Entity::new("Item");
        let map = PropertyValue::Map(vec![
            (Value::from("a"), Some(item.clone().into())),
            (Value::from("b"), None),
        ]);
        assert_eq!(map.entities().len(), 1);

        let list = PropertyValue::List(vec![None, Some(item.into())]);
        assert_eq!(list.entities().len(), 1);
    }

    #[test]
    fn test_cyclic_debug_terminates() {
        let order = Entity::new("Order");
        let item = Entity::new("Item").with("order", order.clone());
        order.set("items", vec![item]);
        let printed = format!("{order:?}");
        assert!(printed.contains("Order"));
    }
}
