//! Property definitions within an entity.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use colmap_proto::{ColumnType, ValueKind};

use super::codec::{Codec, CollectionCodec, PassthroughCodec, ScalarCodec};

/// The storage shape of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// A single value.
    Scalar,
    /// An ordered list of values.
    List,
    /// A set of distinct values.
    Set,
    /// A map of values.
    Map,
    /// A distributed counter, stored in the entity's counter table.
    Counter,
    /// The tuple of components of a compound primary key.
    EmbeddedKey,
    /// A single joined entity, stored as its key.
    JoinScalar,
    /// A list of joined entities, stored as a list of keys.
    JoinList,
    /// A set of joined entities, stored as a set of keys.
    JoinSet,
    /// A map to joined entities, stored as a map of keys.
    JoinMap,
}

impl PropertyKind {
    /// Check if this is one of the join kinds.
    pub fn is_join(&self) -> bool {
        matches!(
            self,
            PropertyKind::JoinScalar
                | PropertyKind::JoinList
                | PropertyKind::JoinSet
                | PropertyKind::JoinMap
        )
    }

    /// Check if this kind is stored as a collection column.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            PropertyKind::List
                | PropertyKind::Set
                | PropertyKind::Map
                | PropertyKind::JoinList
                | PropertyKind::JoinSet
                | PropertyKind::JoinMap
        )
    }

    /// Check if this is a counter.
    pub fn is_counter(&self) -> bool {
        matches!(self, PropertyKind::Counter)
    }
}

/// Operations a join property may propagate to its target.
///
/// There is deliberately no `Remove`: removing a joined entity is always a
/// separate, explicit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CascadeType {
    Persist,
    Merge,
    Refresh,
    All,
}

/// The operations the cascade engine walks the join graph for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeOperation {
    Persist,
    Merge,
    Refresh,
    Remove,
}

impl CascadeOperation {
    /// Operation name for logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            CascadeOperation::Persist => "persist",
            CascadeOperation::Merge => "merge",
            CascadeOperation::Refresh => "refresh",
            CascadeOperation::Remove => "remove",
        }
    }
}

impl fmt::Display for CascadeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Join target and cascade permissions of a join property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinProperties {
    /// Target entity type name.
    pub target: String,
    /// Permitted cascaded operations.
    pub cascade: BTreeSet<CascadeType>,
}

impl JoinProperties {
    /// A join with no cascaded operations.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cascade: BTreeSet::new(),
        }
    }

    /// Check if `operation` propagates through this join.
    pub fn permits(&self, operation: CascadeOperation) -> bool {
        let required = match operation {
            CascadeOperation::Persist => CascadeType::Persist,
            CascadeOperation::Merge => CascadeType::Merge,
            CascadeOperation::Refresh => CascadeType::Refresh,
            CascadeOperation::Remove => return false,
        };
        self.cascade.contains(&CascadeType::All) || self.cascade.contains(&required)
    }
}

/// A property (column) definition within an entity.
#[derive(Clone)]
pub struct PropertyMeta {
    /// Logical property name.
    pub name: String,
    /// Column name in the table.
    pub column: String,
    /// Storage shape.
    pub kind: PropertyKind,
    /// Value kind of the column (element kind for collections).
    pub value_kind: ValueKind,
    /// Codec applied at the read/write boundary.
    pub codec: Arc<dyn Codec>,
    /// Whether the property is fetched on first access instead of on load.
    pub lazy: bool,
    /// Join target and cascade permissions, for join kinds.
    pub join: Option<JoinProperties>,
}

impl fmt::Debug for PropertyMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyMeta")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("value_kind", &self.value_kind)
            .field("lazy", &self.lazy)
            .field("join", &self.join)
            .finish()
    }
}

impl PropertyMeta {
    fn build(
        name: impl Into<String>,
        kind: PropertyKind,
        value_kind: ValueKind,
        codec: Arc<dyn Codec>,
    ) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            value_kind,
            codec,
            lazy: kind.is_join(),
            join: None,
        }
    }

    /// A scalar property.
    pub fn scalar(name: impl Into<String>, kind: ValueKind) -> Self {
        Self::build(name, PropertyKind::Scalar, kind, Arc::new(ScalarCodec::new(kind)))
    }

    /// A list property.
    pub fn list(name: impl Into<String>, element: ValueKind) -> Self {
        Self::build(
            name,
            PropertyKind::List,
            element,
            Arc::new(CollectionCodec::list(element)),
        )
    }

    /// A set property.
    pub fn set(name: impl Into<String>, element: ValueKind) -> Self {
        Self::build(
            name,
            PropertyKind::Set,
            element,
            Arc::new(CollectionCodec::set(element)),
        )
    }

    /// A map property.
    pub fn map(name: impl Into<String>, key: ValueKind, value: ValueKind) -> Self {
        Self::build(
            name,
            PropertyKind::Map,
            value,
            Arc::new(CollectionCodec::map(key, value)),
        )
    }

    /// A counter property.
    pub fn counter(name: impl Into<String>) -> Self {
        Self::build(
            name,
            PropertyKind::Counter,
            ValueKind::Int64,
            Arc::new(ScalarCodec::new(ValueKind::Int64)),
        )
    }

    /// The tuple property of a compound key. Built by [`super::KeyShape`].
    pub(crate) fn embedded_key(name: impl Into<String>) -> Self {
        Self::build(
            name,
            PropertyKind::EmbeddedKey,
            ValueKind::Tuple,
            Arc::new(PassthroughCodec),
        )
    }

    fn join_of(name: impl Into<String>, kind: PropertyKind, target: impl Into<String>) -> Self {
        let mut meta = Self::build(name, kind, ValueKind::Null, Arc::new(PassthroughCodec));
        meta.join = Some(JoinProperties::new(target));
        meta
    }

    /// A join to a single entity.
    pub fn join(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::join_of(name, PropertyKind::JoinScalar, target)
    }

    /// A join to a list of entities.
    pub fn join_list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::join_of(name, PropertyKind::JoinList, target)
    }

    /// A join to a set of entities.
    pub fn join_set(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::join_of(name, PropertyKind::JoinSet, target)
    }

    /// A join to a map of entities. Map keys are plain values.
    pub fn join_map(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::join_of(name, PropertyKind::JoinMap, target)
    }

    /// Store the property under a different column name.
    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Use a custom codec.
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Fetch the property on first access.
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Set the cascade permissions of a join property.
    ///
    /// Ignored for non-join properties.
    pub fn with_cascade(mut self, cascade: impl IntoIterator<Item = CascadeType>) -> Self {
        if let Some(join) = self.join.as_mut() {
            join.cascade = cascade.into_iter().collect();
        }
        self
    }

    /// Check if this is a join property.
    pub fn is_join(&self) -> bool {
        self.kind.is_join()
    }

    /// Storage type for table definitions.
    pub fn column_type(&self) -> ColumnType {
        match self.kind {
            PropertyKind::List | PropertyKind::JoinList => ColumnType::List,
            PropertyKind::Set | PropertyKind::JoinSet => ColumnType::Set,
            PropertyKind::Map | PropertyKind::JoinMap => ColumnType::Map,
            PropertyKind::Counter => ColumnType::Counter,
            PropertyKind::EmbeddedKey => ColumnType::Tuple,
            // Single joins store the target key; its exact type is the target's.
            PropertyKind::JoinScalar => ColumnType::Blob,
            PropertyKind::Scalar => column_type_of(self.value_kind),
        }
    }
}

/// Map a scalar value kind to its column type.
pub fn column_type_of(kind: ValueKind) -> ColumnType {
    match kind {
        ValueKind::Bool => ColumnType::Boolean,
        ValueKind::Int32 => ColumnType::Int,
        ValueKind::Int64 => ColumnType::BigInt,
        ValueKind::Float32 => ColumnType::Float,
        ValueKind::Float64 => ColumnType::Double,
        ValueKind::String => ColumnType::Text,
        ValueKind::Timestamp => ColumnType::Timestamp,
        ValueKind::Uuid => ColumnType::Uuid,
        ValueKind::List => ColumnType::List,
        ValueKind::Set => ColumnType::Set,
        ValueKind::Map => ColumnType::Map,
        ValueKind::Tuple => ColumnType::Tuple,
        ValueKind::Bytes | ValueKind::Null => ColumnType::Blob,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_never_permitted() {
        let all = PropertyMeta::join_list("items", "Item").with_cascade([CascadeType::All]);
        let join = all.join.as_ref().unwrap();

        assert!(join.permits(CascadeOperation::Persist));
        assert!(join.permits(CascadeOperation::Merge));
        assert!(join.permits(CascadeOperation::Refresh));
        assert!(!join.permits(CascadeOperation::Remove));
    }

    #[test]
    fn test_partial_permissions() {
        let prop = PropertyMeta::join("customer", "Customer").with_cascade([CascadeType::Persist]);
        let join = prop.join.as_ref().unwrap();

        assert!(join.permits(CascadeOperation::Persist));
        assert!(!join.permits(CascadeOperation::Merge));
        assert!(!join.permits(CascadeOperation::Refresh));
    }

    #[test]
    fn test_property_builders() {
        let total = PropertyMeta::scalar("total", ValueKind::Float64).with_column("order_total");
        assert_eq!(total.name, "total");
        assert_eq!(total.column, "order_total");
        assert!(!total.lazy);
        assert!(!total.is_join());
        assert_eq!(total.column_type(), ColumnType::Double);

        let items = PropertyMeta::join_list("items", "Item");
        assert!(items.lazy);
        assert!(items.kind.is_collection());
        assert_eq!(items.column_type(), ColumnType::List);

        let views = PropertyMeta::counter("views");
        assert!(views.kind.is_counter());

        let tags = PropertyMeta::set("tags", ValueKind::String).with_cascade([CascadeType::All]);
        assert!(tags.join.is_none());
    }
}
