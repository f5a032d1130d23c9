//! A scripted order/item session run against a store.

use std::sync::Arc;

use colmap::proto::ValueKind;
use colmap::{
    CascadeType, EngineConfig, Entity, EntityManagerFactory, EntityMeta, EntityRegistry,
    PropertyMeta,
};
use colmap_core::driver::{RecordedStatement, RecordingExecutor};
use colmap_sled::SledStore;
use tracing::info;

/// Statements issued by one step of the demo.
pub struct Step {
    pub title: &'static str,
    pub statements: Vec<RecordedStatement>,
}

/// What the demo did.
pub struct DemoReport {
    pub steps: Vec<Step>,
    pub prepared: u64,
}

fn registry() -> Result<EntityRegistry, colmap::ConfigError> {
    EntityRegistry::builder()
        .with_entity(
            EntityMeta::new("Order", "orders")
                .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
                .with_property(PropertyMeta::scalar("total", ValueKind::Float64))
                .with_property(PropertyMeta::scalar("notes", ValueKind::String).lazy())
                .with_property(PropertyMeta::counter("views"))
                .with_property(
                    PropertyMeta::join_list("items", "Item")
                        .with_cascade([CascadeType::Persist, CascadeType::Merge]),
                ),
        )
        .with_entity(
            EntityMeta::new("Item", "items")
                .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
                .with_property(PropertyMeta::scalar("sku", ValueKind::String))
                .with_property(PropertyMeta::join("order", "Order")),
        )
        .build()
}

/// Persist an order with two items in one batch, update it, then remove it.
pub fn run(store: SledStore) -> Result<DemoReport, Box<dyn std::error::Error>> {
    let recorder = Arc::new(RecordingExecutor::new(store));
    let factory = EntityManagerFactory::builder(registry()?)
        .with_config(EngineConfig::default().with_create_missing_tables(true))
        .build(recorder.clone())?;
    let report = factory.bootstrap_report();
    info!(
        existing = report.existing.len(),
        created = report.created.len(),
        "schema ready"
    );

    let mut steps = Vec::new();
    let mut step = |title: &'static str| {
        steps.push(Step {
            title,
            statements: recorder.statements(),
        });
        recorder.clear();
    };

    let order = Entity::new("Order")
        .with("id", 1i64)
        .with("total", 25.0)
        .with("notes", "ring twice")
        .with("views", 1i64);
    let items: Vec<Entity> = [(10i64, "A-1"), (11, "B-2")]
        .into_iter()
        .map(|(id, sku)| {
            Entity::new("Item")
                .with("id", id)
                .with("sku", sku)
                .with("order", order.clone())
        })
        .collect();
    order.set("items", items);

    let mut batch = factory.batching_entity_manager();
    batch.start_batch()?;
    batch.persist(order)?;
    batch.end_batch()?;
    step("persist order with items (batched)");

    let em = factory.entity_manager();
    let found = em
        .find("Order", 1i64)?
        .ok_or("order 1 was not written")?;
    found.set("total", 30.0)?;
    found.set("views", 4i64)?;
    em.merge(&found)?;
    step("merge total and views");

    let reference = em.get_reference("Item", 10i64)?;
    let sku = reference.get("sku")?;
    info!(sku = ?sku, "item loaded through reference");
    step("read item through a reference");

    em.remove(&found)?;
    step("remove order");

    let orphan = em.find("Item", 11i64)?;
    info!(present = orphan.is_some(), "items are kept after the order is removed");
    if em.find("Order", 1i64)?.is_some() {
        return Err("order 1 is still stored after remove".into());
    }

    Ok(DemoReport {
        steps,
        prepared: recorder.inner().prepared_count(),
    })
}
