//! colmap - an object mapper with cascading persistence for column stores.
//!
//! Entities are declared once in an [`EntityRegistry`]; an
//! [`EntityManagerFactory`] checks the schema and hands out managers.
//! [`EntityManager`] submits every statement immediately, while
//! [`BatchingEntityManager`] buffers mutations until the batch ends.
//!
//! # Quick Start
//!
//! ```ignore
//! use colmap::{
//!     CascadeType, EngineConfig, Entity, EntityManagerFactory, EntityMeta, EntityRegistry,
//!     PropertyMeta,
//! };
//! use colmap::proto::ValueKind;
//! use colmap_sled::SledConfig;
//!
//! let registry = EntityRegistry::builder()
//!     .with_entity(
//!         EntityMeta::new("Order", "orders")
//!             .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
//!             .with_property(PropertyMeta::scalar("total", ValueKind::Float64))
//!             .with_property(
//!                 PropertyMeta::join_list("items", "Item").with_cascade([CascadeType::All]),
//!             ),
//!     )
//!     .with_entity(
//!         EntityMeta::new("Item", "items")
//!             .with_id(PropertyMeta::scalar("id", ValueKind::Int64))
//!             .with_property(PropertyMeta::scalar("sku", ValueKind::String)),
//!     )
//!     .build()?;
//!
//! let config = EngineConfig::default().with_create_missing_tables(true);
//! let factory = EntityManagerFactory::open_sled(registry, SledConfig::temporary(), config)?;
//! let em = factory.entity_manager();
//!
//! let item = Entity::new("Item").with("id", 10i64).with("sku", "A-1");
//! let order = Entity::new("Order")
//!     .with("id", 1i64)
//!     .with("total", 25.0)
//!     .with("items", vec![item]);
//! let order = em.persist(order)?;
//!
//! order.set("total", 30.0)?;
//! em.merge(order)?;
//! ```

pub mod batch;
pub mod error;
pub mod factory;
pub mod manager;

mod operations;

pub use batch::BatchingEntityManager;
pub use error::Error;
pub use factory::{EntityManagerFactory, FactoryBuilder};
pub use manager::EntityManager;

pub use colmap_core::{
    BootstrapReport, CascadeType, CodecError, ConfigError, ConsistencyPolicy, DriverError,
    EngineConfig, Entity, EntityAccess, EntityMeta, EntityRef, EntityRegistry, ErrorCategory,
    KeyShape, Options, PropertyKind, PropertyMeta, PropertyValue, Proxy, StateError,
};
pub use colmap_core::catalog::KeyComponent;

/// Re-export protocol types.
pub use colmap_proto as proto;
