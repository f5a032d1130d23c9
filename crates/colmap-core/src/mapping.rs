//! Conversion between entity property values and stored column values.

use colmap_proto::{ColumnValue, Value};

use crate::catalog::{
    Codec, EntityMeta, EntityRegistry, JoinProperties, KeyShape, PropertyKind, PropertyMeta,
    ScalarCodec,
};
use crate::entity::{Entity, EntityRef, PropertyValue};
use crate::error::{CodecError, Result, StateError};

fn shape(prop: &PropertyMeta, expected: &'static str) -> CodecError {
    CodecError::ShapeMismatch {
        property: prop.name.clone(),
        expected,
    }
}

/// Bring a raw key to its stored form.
///
/// A null key, or a compound key with a null component, is a missing key.
pub(crate) fn normalize_key(meta: &EntityMeta, raw: &Value) -> Result<Value> {
    let missing = || StateError::MissingPrimaryKey {
        entity_type: meta.entity_type.clone(),
    };
    if raw.is_null() {
        return Err(missing().into());
    }

    match meta.key_shape()? {
        KeyShape::Single { property } => {
            let prop = meta.property(property)?;
            Ok(prop.codec.encode(&prop.name, raw)?)
        }
        KeyShape::Compound {
            property,
            partition,
            clustering,
        } => {
            let components: Vec<_> = partition.iter().chain(clustering).collect();
            let items = match raw {
                Value::Tuple(items) if items.len() == components.len() => items,
                _ => {
                    return Err(CodecError::ShapeMismatch {
                        property: property.clone(),
                        expected: "a key tuple",
                    }
                    .into())
                }
            };

            let mut encoded = Vec::with_capacity(items.len());
            for (component, item) in components.iter().zip(items) {
                if item.is_null() {
                    return Err(missing().into());
                }
                encoded.push(ScalarCodec::new(component.kind).encode(&component.column, item)?);
            }
            Ok(Value::Tuple(encoded))
        }
    }
}

/// The stored key of an entity instance.
pub(crate) fn entity_key(meta: &EntityMeta, entity: &Entity) -> Result<Value> {
    let property = meta.key_shape()?.property();
    match entity.get(property) {
        PropertyValue::Value(raw) => normalize_key(meta, &raw),
        PropertyValue::Null => Err(StateError::MissingPrimaryKey {
            entity_type: meta.entity_type.clone(),
        }
        .into()),
        _ => Err(CodecError::ShapeMismatch {
            property: property.to_string(),
            expected: "a key value",
        }
        .into()),
    }
}

/// Key columns addressing the row of `key`.
pub(crate) fn key_columns(meta: &EntityMeta, key: &Value) -> Result<Vec<ColumnValue>> {
    match meta.key_shape()? {
        KeyShape::Single { property } => {
            let column = meta.property(property)?.column.clone();
            Ok(vec![ColumnValue::new(column, key.clone())])
        }
        KeyShape::Compound {
            partition,
            clustering,
            property,
        } => match key {
            Value::Tuple(items) => Ok(partition
                .iter()
                .chain(clustering)
                .zip(items)
                .map(|(c, v)| ColumnValue::new(c.column.clone(), v.clone()))
                .collect()),
            _ => Err(CodecError::ShapeMismatch {
                property: property.clone(),
                expected: "a key tuple",
            }
            .into()),
        },
    }
}

/// Check that a value has the shape its property expects.
pub(crate) fn check_shape(prop: &PropertyMeta, value: &PropertyValue) -> Result<()> {
    let ok = match (prop.kind, value) {
        (_, PropertyValue::Null) => true,
        (PropertyKind::JoinScalar, PropertyValue::Entity(_)) => true,
        (PropertyKind::JoinList, PropertyValue::List(_)) => true,
        (PropertyKind::JoinSet, PropertyValue::Set(_) | PropertyValue::List(_)) => true,
        (PropertyKind::JoinMap, PropertyValue::Map(_)) => true,
        (kind, PropertyValue::Value(v)) if !kind.is_join() => {
            prop.codec.encode(&prop.name, v)?;
            true
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else if prop.is_join() {
        Err(shape(prop, "a joined entity value").into())
    } else {
        Err(shape(prop, "a plain value").into())
    }
}

fn target_key(registry: &EntityRegistry, join: &JoinProperties, entity: &EntityRef) -> Result<Value> {
    if entity.entity_type() != join.target {
        return Err(CodecError::ShapeMismatch {
            property: join.target.clone(),
            expected: "an entity of the join target type",
        }
        .into());
    }
    let meta = registry.get(&join.target)?;
    entity_key(&meta, &entity.unproxy())
}

/// Encode a property value for storage.
///
/// Joined entities are stored as their keys.
pub(crate) fn encode_property(
    registry: &EntityRegistry,
    prop: &PropertyMeta,
    value: &PropertyValue,
) -> Result<Value> {
    let Some(join) = prop.join.as_ref() else {
        return match value {
            PropertyValue::Null => Ok(Value::Null),
            PropertyValue::Value(v) => Ok(prop.codec.encode(&prop.name, v)?),
            _ => Err(shape(prop, "a plain value").into()),
        };
    };

    let key_or_null = |item: &Option<EntityRef>| -> Result<Value> {
        match item {
            Some(entity) => target_key(registry, join, entity),
            None => Ok(Value::Null),
        }
    };

    let stored = match (prop.kind, value) {
        (_, PropertyValue::Null) => Value::Null,
        (PropertyKind::JoinScalar, PropertyValue::Entity(entity)) => {
            target_key(registry, join, entity)?
        }
        (PropertyKind::JoinList, PropertyValue::List(items)) => Value::List(
            items
                .iter()
                .map(key_or_null)
                .collect::<Result<Vec<_>>>()?,
        ),
        (PropertyKind::JoinSet, PropertyValue::Set(items) | PropertyValue::List(items)) => {
            Value::set(
                items
                    .iter()
                    .flatten()
                    .map(|entity| target_key(registry, join, entity))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        (PropertyKind::JoinMap, PropertyValue::Map(entries)) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), key_or_null(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
        _ => return Err(shape(prop, "a joined entity value").into()),
    };
    Ok(stored)
}

/// Decode a stored plain value.
pub(crate) fn decode_value(prop: &PropertyMeta, stored: &Value) -> Result<PropertyValue> {
    Ok(PropertyValue::from(prop.codec.decode(&prop.name, stored)?))
}

/// Decode a stored join column, resolving every stored key through `resolve`.
pub(crate) fn decode_join<F>(prop: &PropertyMeta, stored: &Value, mut resolve: F) -> Result<PropertyValue>
where
    F: FnMut(&Value) -> Result<Option<EntityRef>>,
{
    let mut resolve_opt = |key: &Value| -> Result<Option<EntityRef>> {
        if key.is_null() {
            Ok(None)
        } else {
            resolve(key)
        }
    };

    let decoded = match (prop.kind, stored) {
        (_, Value::Null) => PropertyValue::Null,
        (PropertyKind::JoinScalar, key) => match resolve_opt(key)? {
            Some(entity) => PropertyValue::Entity(entity),
            None => PropertyValue::Null,
        },
        (PropertyKind::JoinList, Value::List(keys)) => PropertyValue::List(
            keys.iter()
                .map(&mut resolve_opt)
                .collect::<Result<Vec<_>>>()?,
        ),
        (PropertyKind::JoinSet, Value::Set(keys) | Value::List(keys)) => PropertyValue::Set(
            keys.iter()
                .map(&mut resolve_opt)
                .collect::<Result<Vec<_>>>()?,
        ),
        (PropertyKind::JoinMap, Value::Map(entries)) => PropertyValue::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), resolve_opt(v)?)))
                .collect::<Result<Vec<_>>>()?,
        ),
        (_, other) => {
            return Err(CodecError::Decode {
                property: prop.name.clone(),
                message: format!("unexpected stored {}", other.kind()),
            }
            .into())
        }
    };
    Ok(decoded)
}

/// Current value of a counter property. Unset counters read as zero.
pub(crate) fn counter_value(prop: &PropertyMeta, value: &PropertyValue) -> Result<i64> {
    match value {
        PropertyValue::Null => Ok(0),
        PropertyValue::Value(v) => {
            let encoded = prop.codec.encode(&prop.name, v)?;
            Ok(encoded.as_i64().unwrap_or(0))
        }
        _ => Err(shape(prop, "a counter value").into()),
    }
}
