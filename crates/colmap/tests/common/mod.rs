//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use colmap::proto::{StatementKind, ValueKind};
use colmap::{
    CascadeType, ConsistencyPolicy, EngineConfig, EntityManagerFactory, EntityMeta,
    EntityRegistry, KeyComponent, PropertyMeta,
};
use colmap_core::RecordingExecutor;
use colmap_sled::SledStore;

pub type Recorder = Arc<RecordingExecutor<SledStore>>;

/// Order -> items (persist, merge), Order -> customer (no cascade),
/// Item -> order (all), Customer -> favorites (persist, map),
/// Customer -> wishlist (persist, set), Reading with a compound key.
pub fn registry() -> EntityRegistry {
    EntityRegistry::builder()
        .with_entity(
            EntityMeta::new("Order", "orders")
                .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
                .with_property(PropertyMeta::scalar("total", ValueKind::Float64))
                .with_property(PropertyMeta::scalar("notes", ValueKind::String).lazy())
                .with_property(PropertyMeta::set("tags", ValueKind::String))
                .with_property(PropertyMeta::counter("views"))
                .with_property(
                    PropertyMeta::join_list("items", "Item")
                        .with_cascade([CascadeType::Persist, CascadeType::Merge]),
                )
                .with_property(PropertyMeta::join("customer", "Customer")),
        )
        .with_entity(
            EntityMeta::new("Item", "items")
                .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
                .with_property(PropertyMeta::scalar("sku", ValueKind::String))
                .with_property(
                    PropertyMeta::join("order", "Order").with_cascade([CascadeType::All]),
                ),
        )
        .with_entity(
            EntityMeta::new("Customer", "customers")
                .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
                .with_property(PropertyMeta::scalar("name", ValueKind::String))
                .with_property(
                    PropertyMeta::join_map("favorites", "Item")
                        .with_cascade([CascadeType::Persist, CascadeType::Refresh]),
                )
                .with_property(
                    PropertyMeta::join_set("wishlist", "Item").with_cascade([CascadeType::Persist]),
                ),
        )
        .with_entity(
            EntityMeta::new("Reading", "readings")
                .with_compound_key(
                    "key",
                    vec![KeyComponent::new("sensor", ValueKind::String)],
                    vec![KeyComponent::new("at", ValueKind::Timestamp)],
                )
                .with_property(PropertyMeta::scalar("value", ValueKind::Float64)),
        )
        .build()
        .expect("registry is valid")
}

/// A factory over a temporary sled store wrapped in a recorder.
pub fn factory_with(config: EngineConfig, policy: Option<ConsistencyPolicy>) -> (EntityManagerFactory, Recorder) {
    let store = SledStore::temporary().expect("open temporary store");
    let recorder = Arc::new(RecordingExecutor::new(store));
    let mut builder = EntityManagerFactory::builder(registry())
        .with_config(config.with_create_missing_tables(true));
    if let Some(policy) = policy {
        builder = builder.with_policy(policy);
    }
    let factory = builder.build(recorder.clone()).expect("build factory");
    (factory, recorder)
}

pub fn factory() -> (EntityManagerFactory, Recorder) {
    factory_with(EngineConfig::default(), None)
}

/// Recorded statements of the given kind against `table`.
pub fn count(recorder: &Recorder, table: &str, kind: StatementKind) -> usize {
    recorder
        .for_table(table)
        .iter()
        .filter(|r| r.statement.kind() == kind)
        .count()
}
