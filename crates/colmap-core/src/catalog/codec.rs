//! Per-property value codecs.
//!
//! A codec converts between the application-level value of a property and
//! the value stored in its column. The engine calls a codec at every
//! property read/write boundary and never inspects stored values itself.

use std::fmt;

use colmap_proto::{Value, ValueKind};

use crate::error::CodecError;

/// Converts one property's values to and from storage.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Convert an application value to its stored form.
    fn encode(&self, property: &str, value: &Value) -> Result<Value, CodecError>;

    /// Convert a stored value back to its application form.
    fn decode(&self, property: &str, stored: &Value) -> Result<Value, CodecError>;
}

/// Stores values unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCodec;

impl Codec for PassthroughCodec {
    fn encode(&self, _property: &str, value: &Value) -> Result<Value, CodecError> {
        Ok(value.clone())
    }

    fn decode(&self, _property: &str, stored: &Value) -> Result<Value, CodecError> {
        Ok(stored.clone())
    }
}

/// Checks that a scalar has the mapped type, widening integers and floats.
#[derive(Debug, Clone, Copy)]
pub struct ScalarCodec {
    kind: ValueKind,
}

impl ScalarCodec {
    /// Create a codec for the given scalar kind.
    pub fn new(kind: ValueKind) -> Self {
        Self { kind }
    }

    /// The mapped kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }
}

impl Codec for ScalarCodec {
    fn encode(&self, property: &str, value: &Value) -> Result<Value, CodecError> {
        coerce(property, self.kind, value)
    }

    fn decode(&self, property: &str, stored: &Value) -> Result<Value, CodecError> {
        coerce(property, self.kind, stored)
    }
}

/// Checks a list, set or map and the kinds of its elements.
#[derive(Debug, Clone, Copy)]
pub struct CollectionCodec {
    collection: ValueKind,
    key: Option<ValueKind>,
    element: ValueKind,
}

impl CollectionCodec {
    /// A list of `element` values.
    pub fn list(element: ValueKind) -> Self {
        Self {
            collection: ValueKind::List,
            key: None,
            element,
        }
    }

    /// A set of `element` values.
    pub fn set(element: ValueKind) -> Self {
        Self {
            collection: ValueKind::Set,
            key: None,
            element,
        }
    }

    /// A map from `key` values to `element` values.
    pub fn map(key: ValueKind, element: ValueKind) -> Self {
        Self {
            collection: ValueKind::Map,
            key: Some(key),
            element,
        }
    }

    fn convert(&self, property: &str, value: &Value) -> Result<Value, CodecError> {
        match (self.collection, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ValueKind::List, Value::List(items)) => Ok(Value::List(
                items
                    .iter()
                    .map(|item| coerce(property, self.element, item))
                    .collect::<Result<Vec<_>, CodecError>>()?,
            )),
            // A list is accepted for a set property and normalized.
            (ValueKind::Set, Value::Set(items) | Value::List(items)) => Ok(Value::set(
                items
                    .iter()
                    .map(|item| coerce(property, self.element, item))
                    .collect::<Result<Vec<_>, CodecError>>()?,
            )),
            (ValueKind::Map, Value::Map(entries)) => {
                let key_kind = self.key.unwrap_or(ValueKind::String);
                Ok(Value::Map(
                    entries
                        .iter()
                        .map(|(k, v)| {
                            Ok((coerce(property, key_kind, k)?, coerce(property, self.element, v)?))
                        })
                        .collect::<Result<Vec<_>, CodecError>>()?,
                ))
            }
            (expected, other) => Err(CodecError::TypeMismatch {
                property: property.to_string(),
                expected,
                actual: other.kind(),
            }),
        }
    }
}

impl Codec for CollectionCodec {
    fn encode(&self, property: &str, value: &Value) -> Result<Value, CodecError> {
        self.convert(property, value)
    }

    fn decode(&self, property: &str, stored: &Value) -> Result<Value, CodecError> {
        self.convert(property, stored)
    }
}

/// Stores any value as JSON text.
///
/// Useful for properties whose shape the store has no native type for.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, property: &str, value: &Value) -> Result<Value, CodecError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        serde_json::to_string(value)
            .map(Value::String)
            .map_err(|e| CodecError::Decode {
                property: property.to_string(),
                message: e.to_string(),
            })
    }

    fn decode(&self, property: &str, stored: &Value) -> Result<Value, CodecError> {
        match stored {
            Value::Null => Ok(Value::Null),
            Value::String(text) => serde_json::from_str(text).map_err(|e| CodecError::Decode {
                property: property.to_string(),
                message: e.to_string(),
            }),
            other => Err(CodecError::TypeMismatch {
                property: property.to_string(),
                expected: ValueKind::String,
                actual: other.kind(),
            }),
        }
    }
}

/// Convert `value` to `kind`, allowing lossless numeric widening.
fn coerce(property: &str, kind: ValueKind, value: &Value) -> Result<Value, CodecError> {
    let converted = match (kind, value) {
        (_, Value::Null) => Some(Value::Null),
        (ValueKind::Int64, Value::Int32(i)) => Some(Value::Int64(*i as i64)),
        (ValueKind::Float64, Value::Float32(f)) => Some(Value::Float64(*f as f64)),
        (ValueKind::Timestamp, Value::Int64(t)) => Some(Value::Timestamp(*t)),
        (expected, v) if v.kind() == expected => Some(v.clone()),
        _ => None,
    };

    converted.ok_or_else(|| CodecError::TypeMismatch {
        property: property.to_string(),
        expected: kind,
        actual: value.kind(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_codec_widens() {
        let codec = ScalarCodec::new(ValueKind::Int64);
        assert_eq!(codec.encode("n", &Value::Int32(3)).unwrap(), Value::Int64(3));
        assert_eq!(codec.encode("n", &Value::Null).unwrap(), Value::Null);
        assert!(matches!(
            codec.encode("n", &Value::String("x".into())),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_set_codec_normalizes_lists() {
        let codec = CollectionCodec::set(ValueKind::String);
        let encoded = codec
            .encode(
                "tags",
                &Value::list(vec![Value::from("b"), Value::from("a"), Value::from("b")]),
            )
            .unwrap();
        assert_eq!(encoded, Value::Set(vec![Value::from("a"), Value::from("b")]));
    }

    #[test]
    fn test_map_codec_checks_entries() {
        let codec = CollectionCodec::map(ValueKind::String, ValueKind::Int32);
        let good = Value::map(vec![(Value::from("a"), Value::Int32(1))]);
        assert_eq!(codec.encode("m", &good).unwrap(), good);

        let bad = Value::map(vec![(Value::from("a"), Value::from("one"))]);
        assert!(codec.encode("m", &bad).is_err());
    }

    #[test]
    fn test_json_codec() {
        let codec = JsonCodec;
        let value = Value::list(vec![Value::Int32(1), Value::from("two")]);
        let stored = codec.encode("payload", &value).unwrap();
        assert!(matches!(stored, Value::String(_)));
        assert_eq!(codec.decode("payload", &stored).unwrap(), value);
        assert!(codec.decode("payload", &Value::Int32(1)).is_err());
    }
}
