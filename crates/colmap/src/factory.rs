//! Factory wiring the registry, policy, configuration and store together.

use std::sync::Arc;

use colmap_core::{
    verify_schema, BootstrapReport, ConsistencyPolicy, EngineConfig, EntityRegistry, Runtime,
    SchemaService, StatementExecutor,
};
use colmap_sled::{SledConfig, SledStore};
use tracing::info;

use crate::batch::BatchingEntityManager;
use crate::error::Error;
use crate::manager::EntityManager;

/// Builds an [`EntityManagerFactory`].
#[derive(Debug)]
pub struct FactoryBuilder {
    registry: EntityRegistry,
    policy: Option<ConsistencyPolicy>,
    config: EngineConfig,
}

impl FactoryBuilder {
    /// Use a consistency policy instead of the configured global defaults.
    pub fn with_policy(mut self, policy: ConsistencyPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Check the schema against `store` and build the factory.
    pub fn build<S>(self, store: Arc<S>) -> Result<EntityManagerFactory, Error>
    where
        S: StatementExecutor + SchemaService + 'static,
    {
        let report = verify_schema(&self.registry, store.as_ref(), &self.config)?;
        let policy = self.policy.unwrap_or_else(|| {
            ConsistencyPolicy::new(
                self.config.default_read_consistency,
                self.config.default_write_consistency,
            )
        });

        info!(
            entities = self.registry.len(),
            tables = report.table_count(),
            created = report.created.len(),
            "entity manager factory ready"
        );
        let runtime = Runtime::new(self.registry, policy, self.config, store);
        Ok(EntityManagerFactory {
            runtime: Arc::new(runtime),
            report,
        })
    }
}

/// Creates entity managers sharing one runtime.
#[derive(Debug, Clone)]
pub struct EntityManagerFactory {
    runtime: Arc<Runtime>,
    report: BootstrapReport,
}

impl EntityManagerFactory {
    /// Start building a factory for the given entities.
    pub fn builder(registry: EntityRegistry) -> FactoryBuilder {
        FactoryBuilder {
            registry,
            policy: None,
            config: EngineConfig::default(),
        }
    }

    /// Open an embedded sled store and build a factory over it.
    pub fn open_sled(
        registry: EntityRegistry,
        store: SledConfig,
        config: EngineConfig,
    ) -> Result<Self, Error> {
        let store = Arc::new(SledStore::open(store)?);
        Self::builder(registry).with_config(config).build(store)
    }

    /// A stateless entity manager.
    pub fn entity_manager(&self) -> EntityManager {
        EntityManager::new(self.runtime.clone())
    }

    /// A batching entity manager with no open batch.
    pub fn batching_entity_manager(&self) -> BatchingEntityManager {
        BatchingEntityManager::new(self.runtime.clone())
    }

    /// The shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// What the schema check found and created.
    pub fn bootstrap_report(&self) -> &BootstrapReport {
        &self.report
    }
}
