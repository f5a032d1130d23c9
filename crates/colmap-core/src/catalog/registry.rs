//! Entity metadata registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use colmap_proto::{validate_identifier, TableDef};

use super::entity::{EntityMeta, KeyShape};
use super::property::PropertyKind;
use crate::error::ConfigError;

/// Read-only registry of every mapped entity type.
///
/// Built once at startup with [`EntityRegistry::builder`] and shared
/// through an `Arc` afterwards.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntityMeta>>,
    order: Vec<String>,
}

impl EntityRegistry {
    /// Start declaring entity types.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up the metadata of an entity type.
    pub fn get(&self, entity_type: &str) -> Result<Arc<EntityMeta>, ConfigError> {
        self.entities
            .get(entity_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownEntity(entity_type.to_string()))
    }

    /// Check if an entity type is registered.
    pub fn contains(&self, entity_type: &str) -> bool {
        self.entities.contains_key(entity_type)
    }

    /// All entity types, in declaration order.
    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// All metadata, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<EntityMeta>> {
        self.order.iter().filter_map(|name| self.entities.get(name))
    }

    /// Number of registered entity types.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every table the registered entities need, counter tables included.
    pub fn table_defs(&self) -> Result<Vec<(String, TableDef)>, ConfigError> {
        let mut tables = Vec::new();
        for meta in self.iter() {
            tables.push((meta.entity_type.clone(), meta.table_def()?));
            if let Some(counters) = meta.counter_table_def()? {
                tables.push((meta.entity_type.clone(), counters));
            }
        }
        Ok(tables)
    }
}

/// Collects entity declarations and validates them as a whole.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entities: Vec<EntityMeta>,
}

impl RegistryBuilder {
    /// Declare an entity type.
    pub fn with_entity(mut self, meta: EntityMeta) -> Self {
        self.entities.push(meta);
        self
    }

    /// Validate every declaration and build the registry.
    pub fn build(self) -> Result<EntityRegistry, ConfigError> {
        let mut registry = EntityRegistry::default();
        for meta in self.entities {
            if registry.entities.contains_key(&meta.entity_type) {
                return Err(ConfigError::DuplicateEntity(meta.entity_type));
            }
            validate_entity(&meta)?;
            registry.order.push(meta.entity_type.clone());
            registry
                .entities
                .insert(meta.entity_type.clone(), Arc::new(meta));
        }

        for meta in registry.entities.values() {
            for prop in meta.join_properties() {
                if let Some(join) = &prop.join {
                    if !registry.entities.contains_key(&join.target) {
                        return Err(ConfigError::UnknownJoinTarget {
                            entity_type: meta.entity_type.clone(),
                            property: prop.name.clone(),
                            target: join.target.clone(),
                        });
                    }
                }
            }
        }

        tracing::debug!(entities = registry.len(), "entity registry built");
        Ok(registry)
    }
}

fn schema_name(name: &str) -> Result<(), ConfigError> {
    validate_identifier(name).map_err(|_| ConfigError::InvalidSchemaName(name.to_string()))
}

fn validate_entity(meta: &EntityMeta) -> Result<(), ConfigError> {
    schema_name(&meta.table)?;
    let key = meta.key_shape()?;

    let mut names = HashSet::new();
    let mut columns = HashSet::new();
    let duplicate = |name: &str| ConfigError::DuplicateProperty {
        entity_type: meta.entity_type.clone(),
        name: name.to_string(),
    };

    for prop in meta.properties() {
        if !names.insert(prop.name.as_str()) {
            return Err(duplicate(&prop.name));
        }
        if prop.kind == PropertyKind::EmbeddedKey {
            continue;
        }
        schema_name(&prop.column)?;
        if !columns.insert(prop.column.as_str()) {
            return Err(duplicate(&prop.column));
        }
    }

    match key {
        KeyShape::Single { property } => {
            let prop = meta.property(property)?;
            if prop.kind != PropertyKind::Scalar || prop.lazy {
                return Err(ConfigError::MissingKey(meta.entity_type.clone()));
            }
        }
        KeyShape::Compound {
            partition,
            clustering,
            ..
        } => {
            if partition.is_empty() {
                return Err(ConfigError::MissingKey(meta.entity_type.clone()));
            }
            for component in partition.iter().chain(clustering) {
                schema_name(&component.column)?;
                if !columns.insert(component.column.as_str()) {
                    return Err(duplicate(&component.column));
                }
            }
        }
    }
    Ok(())
}
