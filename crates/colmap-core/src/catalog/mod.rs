//! Entity metadata catalog.
//!
//! The catalog describes how entity types map to tables: their primary
//! key shape, their properties and codecs, and the join properties the
//! cascade engine walks.

mod codec;
mod entity;
mod property;
mod registry;

pub use codec::{Codec, CollectionCodec, JsonCodec, PassthroughCodec, ScalarCodec};
pub use entity::{EntityMeta, KeyComponent, KeyShape, COUNTER_TABLE_SUFFIX};
pub use property::{
    column_type_of, CascadeOperation, CascadeType, JoinProperties, PropertyKind, PropertyMeta,
};
pub use registry::{EntityRegistry, RegistryBuilder};
