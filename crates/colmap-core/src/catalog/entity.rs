//! Entity metadata: table, primary key shape and properties.

use std::collections::HashMap;

use colmap_proto::{ColumnDef, ColumnType, TableDef, ValueKind};

use super::property::{column_type_of, PropertyMeta};
use crate::error::ConfigError;

/// Suffix of the table holding an entity's counter columns.
pub const COUNTER_TABLE_SUFFIX: &str = "_counters";

/// One column of a compound primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComponent {
    /// Column name.
    pub column: String,
    /// Value kind of the column.
    pub kind: ValueKind,
}

impl KeyComponent {
    /// Create a key component.
    pub fn new(column: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            column: column.into(),
            kind,
        }
    }
}

/// Primary key layout of an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyShape {
    /// A single scalar property is the whole key.
    Single {
        /// Name of the key property.
        property: String,
    },
    /// An embedded tuple property, split into partition and clustering columns.
    Compound {
        /// Name of the tuple property.
        property: String,
        /// Partition key columns.
        partition: Vec<KeyComponent>,
        /// Clustering key columns.
        clustering: Vec<KeyComponent>,
    },
}

impl KeyShape {
    /// Name of the property holding the key.
    pub fn property(&self) -> &str {
        match self {
            KeyShape::Single { property } | KeyShape::Compound { property, .. } => property,
        }
    }
}

/// Mapping metadata of one entity type.
#[derive(Debug, Clone)]
pub struct EntityMeta {
    /// Entity type name.
    pub entity_type: String,
    /// Table name.
    pub table: String,
    /// Primary key layout. `None` until a key is declared.
    pub key: Option<KeyShape>,
    properties: Vec<PropertyMeta>,
    by_name: HashMap<String, usize>,
}

impl EntityMeta {
    /// Create metadata for an entity type stored in `table`.
    pub fn new(entity_type: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            table: table.into(),
            key: None,
            properties: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Declare a scalar property as the primary key.
    pub fn with_id(mut self, property: PropertyMeta) -> Self {
        self.key = Some(KeyShape::Single {
            property: property.name.clone(),
        });
        self.with_property(property)
    }

    /// Declare a compound primary key held in the tuple property `property`.
    pub fn with_compound_key(
        mut self,
        property: impl Into<String>,
        partition: Vec<KeyComponent>,
        clustering: Vec<KeyComponent>,
    ) -> Self {
        let property = property.into();
        self.key = Some(KeyShape::Compound {
            property: property.clone(),
            partition,
            clustering,
        });
        self.with_property(PropertyMeta::embedded_key(property))
    }

    /// Add a property.
    ///
    /// Duplicate names are kept and reported when the registry is built.
    pub fn with_property(mut self, property: PropertyMeta) -> Self {
        self.by_name
            .entry(property.name.clone())
            .or_insert(self.properties.len());
        self.properties.push(property);
        self
    }

    /// All properties, in declaration order.
    pub fn properties(&self) -> &[PropertyMeta] {
        &self.properties
    }

    /// Look up a property.
    pub fn property(&self, name: &str) -> Result<&PropertyMeta, ConfigError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.properties[idx])
            .ok_or_else(|| ConfigError::UnmappedProperty {
                entity_type: self.entity_type.clone(),
                property: name.to_string(),
            })
    }

    /// Get the key shape.
    pub fn key_shape(&self) -> Result<&KeyShape, ConfigError> {
        self.key
            .as_ref()
            .ok_or_else(|| ConfigError::MissingKey(self.entity_type.clone()))
    }

    /// Name of the key property, if a key is declared.
    pub fn key_property(&self) -> Option<&str> {
        self.key.as_ref().map(KeyShape::property)
    }

    /// Check if `name` is the key property.
    pub fn is_key(&self, name: &str) -> bool {
        self.key_property() == Some(name)
    }

    /// Join properties, in declaration order.
    pub fn join_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.is_join())
    }

    /// Counter properties, in declaration order.
    pub fn counter_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties.iter().filter(|p| p.kind.is_counter())
    }

    /// Properties stored as regular columns of the entity table, key excluded.
    pub fn value_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.properties
            .iter()
            .filter(move |p| !p.kind.is_counter() && !self.is_key(&p.name))
    }

    /// Properties loaded together when an entity is fetched.
    pub fn eager_properties(&self) -> impl Iterator<Item = &PropertyMeta> {
        self.value_properties().filter(|p| !p.lazy)
    }

    /// Check if the entity declares counters.
    pub fn has_counters(&self) -> bool {
        self.counter_properties().next().is_some()
    }

    /// Name of the counter table.
    pub fn counter_table(&self) -> String {
        format!("{}{}", self.table, COUNTER_TABLE_SUFFIX)
    }

    /// Key columns with their types, partition columns first.
    pub fn key_columns(&self) -> Result<Vec<(String, ColumnType)>, ConfigError> {
        match self.key_shape()? {
            KeyShape::Single { property } => {
                let prop = self.property(property)?;
                Ok(vec![(prop.column.clone(), prop.column_type())])
            }
            KeyShape::Compound {
                partition,
                clustering,
                ..
            } => Ok(partition
                .iter()
                .chain(clustering)
                .map(|c| (c.column.clone(), column_type_of(c.kind)))
                .collect()),
        }
    }

    fn partitioned(&self, table: TableDef) -> Result<TableDef, ConfigError> {
        let table = match self.key_shape()? {
            KeyShape::Single { property } => {
                let column = self.property(property)?.column.clone();
                table.with_partition_key(vec![column])
            }
            KeyShape::Compound {
                partition,
                clustering,
                ..
            } => table
                .with_partition_key(partition.iter().map(|c| c.column.clone()).collect())
                .with_clustering_key(clustering.iter().map(|c| c.column.clone()).collect()),
        };
        Ok(table)
    }

    /// Definition of the entity table.
    pub fn table_def(&self) -> Result<TableDef, ConfigError> {
        let mut table = TableDef::new(&self.table);
        for (column, column_type) in self.key_columns()? {
            table = table.with_column(ColumnDef::new(column, column_type));
        }
        for prop in self.value_properties() {
            table = table.with_column(ColumnDef::new(&prop.column, prop.column_type()));
        }
        self.partitioned(table)
    }

    /// Definition of the counter table, if the entity declares counters.
    pub fn counter_table_def(&self) -> Result<Option<TableDef>, ConfigError> {
        if !self.has_counters() {
            return Ok(None);
        }
        let mut table = TableDef::new(self.counter_table());
        for (column, column_type) in self.key_columns()? {
            table = table.with_column(ColumnDef::new(column, column_type));
        }
        for prop in self.counter_properties() {
            table = table.with_column(ColumnDef::new(&prop.column, ColumnType::Counter));
        }
        self.partitioned(table).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CascadeType, PropertyKind};

    fn order_meta() -> EntityMeta {
        EntityMeta::new("Order", "orders")
            .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
            .with_property(PropertyMeta::scalar("total", ValueKind::Float64))
            .with_property(PropertyMeta::scalar("notes", ValueKind::String).lazy())
            .with_property(PropertyMeta::counter("views"))
            .with_property(
                PropertyMeta::join_list("items", "Item").with_cascade([CascadeType::All]),
            )
    }

    #[test]
    fn test_property_lookup() {
        let meta = order_meta();
        assert_eq!(meta.property("total").unwrap().column, "total");
        assert!(matches!(
            meta.property("missing"),
            Err(ConfigError::UnmappedProperty { .. })
        ));
        assert!(meta.is_key("id"));
        assert_eq!(meta.key_property(), Some("id"));
    }

    #[test]
    fn test_property_groups() {
        let meta = order_meta();
        let value: Vec<_> = meta.value_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(value, vec!["total", "notes", "items"]);

        let eager: Vec<_> = meta.eager_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(eager, vec!["total"]);

        let joins: Vec<_> = meta.join_properties().map(|p| p.name.as_str()).collect();
        assert_eq!(joins, vec!["items"]);
        assert!(meta.has_counters());
    }

    #[test]
    fn test_table_defs() {
        let meta = order_meta();
        let table = meta.table_def().unwrap();
        assert_eq!(table.name, "orders");
        assert_eq!(table.partition_key, vec!["id"]);
        assert!(table.get_column("views").is_none());
        assert!(table.get_column("items").is_some());

        let counters = meta.counter_table_def().unwrap().unwrap();
        assert_eq!(counters.name, "orders_counters");
        assert_eq!(
            counters.get_column("views").map(|c| c.column_type),
            Some(ColumnType::Counter)
        );
    }

    #[test]
    fn test_compound_key() {
        let meta = EntityMeta::new("Event", "events")
            .with_compound_key(
                "key",
                vec![KeyComponent::new("tenant", ValueKind::String)],
                vec![KeyComponent::new("seq", ValueKind::Int64)],
            )
            .with_property(PropertyMeta::scalar("payload", ValueKind::String));

        let table = meta.table_def().unwrap();
        assert_eq!(table.partition_key, vec!["tenant"]);
        assert_eq!(table.clustering_key, vec!["seq"]);
        assert_eq!(
            table.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["tenant", "seq", "payload"]
        );
        assert_eq!(meta.property("key").unwrap().kind, PropertyKind::EmbeddedKey);
    }

    #[test]
    fn test_missing_key() {
        let meta = EntityMeta::new("Note", "notes");
        assert!(matches!(meta.key_shape(), Err(ConfigError::MissingKey(_))));
    }
}
