//! Immediate entity manager against a sled store.

mod common;

use std::sync::Arc;

use colmap::proto::{ConsistencyLevel, StatementKind, Value};
use colmap::{
    ConfigError, EngineConfig, Entity, EntityManagerFactory, EntityRef, Options, PropertyValue,
    Proxy, StateError,
};
use colmap_sled::SledStore;
use common::{count, factory, registry};

fn order_with_items() -> (Entity, Entity, Entity) {
    let order = Entity::new("Order").with("id", 1i64).with("total", 25.0);
    let item1 = Entity::new("Item")
        .with("id", 10i64)
        .with("sku", "A-1")
        .with("order", order.clone());
    let item2 = Entity::new("Item")
        .with("id", 11i64)
        .with("sku", "B-2")
        .with("order", order.clone());
    order.set("items", vec![item1.clone(), item2.clone()]);
    (order, item1, item2)
}

fn total(proxy: &Proxy) -> f64 {
    proxy
        .get("total")
        .unwrap()
        .as_value()
        .and_then(Value::as_f64)
        .unwrap()
}

#[test]
fn test_persist_and_find() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let (order, _, _) = order_with_items();
    order.set("notes", "leave at door");
    order.set(
        "tags",
        Value::set([Value::from("gift"), Value::from("express")]),
    );

    em.persist(order).unwrap();
    assert_eq!(count(&recorder, "orders", StatementKind::Insert), 1);
    assert_eq!(count(&recorder, "items", StatementKind::Insert), 2);

    let found = em.find("Order", 1i64).unwrap().unwrap();
    assert_eq!(total(&found), 25.0);
    assert!(!found.is_loaded("notes"));
    assert_eq!(
        found.get("tags").unwrap(),
        PropertyValue::from(Value::set([Value::from("express"), Value::from("gift")]))
    );
    assert_eq!(
        found.get("notes").unwrap(),
        PropertyValue::from("leave at door")
    );

    let items = found.get("items").unwrap();
    let items = items.entities();
    assert_eq!(items.len(), 2);
    let first = Proxy::ensure_proxy(items[0]).unwrap();
    assert_eq!(first.get("sku").unwrap(), PropertyValue::from("A-1"));

    assert!(em.find("Order", 2i64).unwrap().is_none());
}

#[test]
fn test_persist_of_managed_instance_fails() {
    let (factory, _) = factory();
    let em = factory.entity_manager();
    let proxy = em
        .persist(Entity::new("Order").with("id", 1i64))
        .unwrap();

    assert!(matches!(
        em.persist(&proxy),
        Err(colmap_core::Error::State(StateError::AlreadyManaged { .. }))
    ));
}

#[test]
fn test_merge_returns_managed_proxy() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();

    // A transient instance is persisted and a new proxy returned.
    let order = Entity::new("Order").with("id", 1i64).with("total", 5.0);
    let proxy = em.merge(order.clone()).unwrap();
    assert!(proxy.instance().ptr_eq(&order));
    assert_eq!(count(&recorder, "orders", StatementKind::Insert), 1);

    proxy.set("total", 6.0).unwrap();
    let merged = em.merge(&proxy).unwrap();
    assert!(merged.ptr_eq(&proxy));
    assert!(!proxy.is_dirty());
    assert_eq!(count(&recorder, "orders", StatementKind::Update), 1);
}

#[test]
fn test_merge_writes_only_dirty_columns() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let (order, _, _) = order_with_items();
    em.persist(order).unwrap();
    recorder.clear();

    let found = em.find("Order", 1i64).unwrap().unwrap();
    found.set("total", 30.0).unwrap();
    em.merge(&found).unwrap();

    let mutations = recorder.mutations();
    assert_eq!(mutations.len(), 1);
    assert_eq!(mutations[0].statement.kind(), StatementKind::Update);
    assert_eq!(mutations[0].statement.columns(), vec!["total"]);
    assert_eq!(total(&em.find("Order", 1i64).unwrap().unwrap()), 30.0);
}

#[test]
fn test_unchanged_write_issues_nothing() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    em.persist(Entity::new("Order").with("id", 1i64).with("total", 5.0))
        .unwrap();
    recorder.clear();

    let found = em.find("Order", 1i64).unwrap().unwrap();
    found.set("total", 5.0).unwrap();
    assert!(!found.is_dirty());
    em.merge(&found).unwrap();
    assert!(recorder.mutations().is_empty());
}

#[test]
fn test_join_without_cascade_is_not_written() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let customer = Entity::new("Customer").with("id", 7i64).with("name", "Ada");
    let order = Entity::new("Order")
        .with("id", 1i64)
        .with("customer", customer);

    em.persist(order).unwrap();
    assert!(recorder.for_table("customers").is_empty());
    assert!(em.find("Customer", 7i64).unwrap().is_none());
}

#[test]
fn test_remove_leaves_joined_rows() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let (order, _, _) = order_with_items();
    let proxy = em.persist(order).unwrap();
    recorder.clear();

    em.remove(&proxy).unwrap();
    assert!(recorder.for_table("items").is_empty());
    assert!(em.find("Order", 1i64).unwrap().is_none());
    assert!(em.find("Item", 10i64).unwrap().is_some());
    assert!(em.find("Item", 11i64).unwrap().is_some());
}

#[test]
fn test_remove_of_transient_fails() {
    let (factory, _) = factory();
    let em = factory.entity_manager();
    assert!(matches!(
        em.remove(Entity::new("Order").with("id", 1i64)),
        Err(colmap_core::Error::State(StateError::NotManaged { .. }))
    ));
}

#[test]
fn test_remove_by_id() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    em.persist(Entity::new("Order").with("id", 1i64).with("views", 2i64))
        .unwrap();
    recorder.clear();

    em.remove_by_id("Order", 1i64).unwrap();
    assert_eq!(count(&recorder, "orders", StatementKind::Delete), 1);
    assert_eq!(count(&recorder, "orders_counters", StatementKind::Delete), 1);
    assert!(em.find("Order", 1i64).unwrap().is_none());
}

#[test]
fn test_get_reference_is_lazy() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    em.persist(Entity::new("Order").with("id", 1i64).with("total", 8.0))
        .unwrap();
    recorder.clear();

    let reference = em.get_reference("Order", 1i64).unwrap();
    assert!(recorder.statements().is_empty());
    assert_eq!(reference.key().unwrap(), Value::Int64(1));

    assert_eq!(total(&reference), 8.0);
    assert_eq!(count(&recorder, "orders", StatementKind::Select), 1);

    // A reference to a missing row fails only on first access.
    let missing = em.get_reference("Order", 99i64).unwrap();
    assert!(matches!(
        missing.get("total"),
        Err(colmap_core::Error::State(StateError::EntityNotFound { .. }))
    ));
}

#[test]
fn test_counter_writes_deltas() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    em.persist(Entity::new("Order").with("id", 1i64).with("views", 3i64))
        .unwrap();
    assert_eq!(
        count(&recorder, "orders_counters", StatementKind::IncrementCounter),
        1
    );

    let found = em.find("Order", 1i64).unwrap().unwrap();
    assert_eq!(found.get("views").unwrap(), PropertyValue::from(3i64));
    found.set("views", 5i64).unwrap();
    recorder.clear();
    em.merge(&found).unwrap();

    let mutations = recorder.mutations();
    assert_eq!(mutations.len(), 1);
    assert!(matches!(
        mutations[0].statement,
        colmap::proto::Statement::IncrementCounter { delta: 2, .. }
    ));

    let found = em.find("Order", 1i64).unwrap().unwrap();
    assert_eq!(found.get("views").unwrap(), PropertyValue::from(5i64));
}

#[test]
fn test_older_write_timestamp_loses() {
    let (factory, _) = factory();
    let em = factory.entity_manager();
    let proxy = em
        .persist_with(
            Entity::new("Order").with("id", 1i64).with("total", 25.0),
            Options::new().with_timestamp(2_000),
        )
        .unwrap();

    proxy.set("total", 9.0).unwrap();
    em.merge_with(&proxy, Options::new().with_timestamp(1_000))
        .unwrap();
    assert_eq!(total(&em.find("Order", 1i64).unwrap().unwrap()), 25.0);

    proxy.set("total", 12.0).unwrap();
    em.merge_with(&proxy, Options::new().with_timestamp(3_000))
        .unwrap();
    assert_eq!(total(&em.find("Order", 1i64).unwrap().unwrap()), 12.0);
}

#[test]
fn test_join_map_cascade() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let item = Entity::new("Item").with("id", 20i64).with("sku", "F-1");
    let customer = Entity::new("Customer").with("id", 7i64).with("name", "Ada");
    customer.set(
        "favorites",
        PropertyValue::Map(vec![(Value::from("first"), Some(item.into()))]),
    );

    em.persist(customer).unwrap();
    assert_eq!(count(&recorder, "items", StatementKind::Insert), 1);

    let found = em.find("Customer", 7i64).unwrap().unwrap();
    let favorites = found.get("favorites").unwrap();
    let PropertyValue::Map(entries) = &favorites else {
        panic!("expected a map, got {favorites:?}");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Value::from("first"));
    let favorite = Proxy::ensure_proxy(entries[0].1.as_ref().unwrap()).unwrap();
    assert_eq!(favorite.get("sku").unwrap(), PropertyValue::from("F-1"));
}

#[test]
fn test_null_members_are_skipped() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let item = |id: i64| Entity::new("Item").with("id", id).with("sku", format!("W-{id}"));
    let customer = Entity::new("Customer").with("id", 7i64).with("name", "Ada");
    customer.set(
        "wishlist",
        PropertyValue::Set(vec![Some(item(30).into()), None, Some(item(31).into())]),
    );
    customer.set(
        "favorites",
        PropertyValue::Map(vec![
            (Value::from("first"), Some(item(32).into())),
            (Value::from("empty"), None),
        ]),
    );

    em.persist(customer).unwrap();
    assert_eq!(count(&recorder, "customers", StatementKind::Insert), 1);
    assert_eq!(count(&recorder, "items", StatementKind::Insert), 3);
    for id in [30i64, 31, 32] {
        assert!(em.find("Item", id).unwrap().is_some(), "item {id} missing");
    }

    let found = em.find("Customer", 7i64).unwrap().unwrap();
    let wishlist = found.get("wishlist").unwrap();
    assert!(matches!(wishlist, PropertyValue::Set(_)));
    assert_eq!(wishlist.entities().len(), 2);
    assert_eq!(found.get("favorites").unwrap().entities().len(), 1);
}

#[test]
fn test_get_reference_with_read_level() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    em.persist(Entity::new("Order").with("id", 1i64).with("total", 25.0))
        .unwrap();
    recorder.clear();

    let reference = em
        .get_reference_with(
            "Order",
            1i64,
            Options::new().with_consistency(ConsistencyLevel::Quorum),
        )
        .unwrap();
    assert!(recorder.statements().is_empty());
    assert_eq!(total(&reference), 25.0);

    let reads = recorder.statements();
    assert!(!reads.is_empty());
    assert!(reads.iter().all(|r| r.level == ConsistencyLevel::Quorum));
}

#[test]
fn test_compound_key() {
    let (factory, recorder) = factory();
    let em = factory.entity_manager();
    let key = Value::Tuple(vec![Value::from("s1"), Value::Timestamp(100)]);
    em.persist(
        Entity::new("Reading")
            .with("key", key.clone())
            .with("value", 1.5),
    )
    .unwrap();

    let insert = &recorder.for_table("readings")[0].statement;
    assert_eq!(insert.columns(), vec!["sensor", "at", "value"]);

    let found = em.find("Reading", key).unwrap().unwrap();
    assert_eq!(found.get("value").unwrap(), PropertyValue::from(1.5));

    let other = Value::Tuple(vec![Value::from("s1"), Value::Timestamp(200)]);
    assert!(em.find("Reading", other).unwrap().is_none());
}

#[test]
fn test_refresh_discards_local_changes() {
    let (factory, _) = factory();
    let em = factory.entity_manager();
    let proxy = em
        .persist(Entity::new("Order").with("id", 1i64).with("total", 25.0))
        .unwrap();

    let other = em.find("Order", 1i64).unwrap().unwrap();
    other.set("total", 40.0).unwrap();
    em.merge(&other).unwrap();

    proxy.set("total", 99.0).unwrap();
    em.refresh(&proxy).unwrap();
    assert!(!proxy.is_dirty());
    assert_eq!(total(&proxy), 40.0);

    em.remove(&other).unwrap();
    assert!(matches!(
        em.refresh(&proxy),
        Err(colmap_core::Error::State(StateError::EntityNotFound { .. }))
    ));
}

#[test]
fn test_initialize_and_unwrap() {
    let (factory, _) = factory();
    let em = factory.entity_manager();
    let (order, _, _) = order_with_items();
    order.set("notes", "fragile");
    em.persist(order).unwrap();

    let found = em.find("Order", 1i64).unwrap().unwrap();
    assert!(!found.is_loaded("notes"));
    em.initialize(&found).unwrap();
    assert!(found.is_loaded("notes"));

    let plain = em.unwrap(&EntityRef::from(&found));
    assert_eq!(plain.entity_type(), "Order");
    assert_eq!(plain.get("notes"), PropertyValue::from("fragile"));
    assert!(plain
        .get("items")
        .entities()
        .iter()
        .all(|item| !item.is_proxy()));
}

#[test]
fn test_missing_table_is_reported() {
    let store = Arc::new(SledStore::temporary().unwrap());
    let result = EntityManagerFactory::builder(registry()).build(store.clone());
    assert!(matches!(
        result,
        Err(colmap::Error::Mapping(colmap_core::Error::Config(
            ConfigError::MissingTable { .. }
        )))
    ));

    let created = EntityManagerFactory::builder(registry())
        .with_config(EngineConfig::default().with_create_missing_tables(true))
        .build(store.clone())
        .unwrap();
    let report = created.bootstrap_report();
    assert!(report.existing.is_empty());
    assert!(report.created.contains(&"orders".to_string()));
    assert!(report.created.contains(&"orders_counters".to_string()));

    let reopened = EntityManagerFactory::builder(registry())
        .build(store)
        .unwrap();
    assert!(reopened.bootstrap_report().created.is_empty());
    assert_eq!(
        reopened.bootstrap_report().table_count(),
        report.table_count()
    );
}
