//! Shared engine state.

use std::sync::Arc;

use colmap_proto::{ConsistencyLevel, ResultSet, Statement};
use tracing::trace;

use crate::catalog::{EntityMeta, EntityRegistry};
use crate::config::EngineConfig;
use crate::consistency::ConsistencyPolicy;
use crate::driver::{StatementCache, StatementExecutor};
use crate::error::Result;

/// Everything a context needs that outlives a single call: the registry,
/// the consistency policy, the configuration, the driver and the
/// prepared-statement cache.
///
/// Built once and passed around as `Arc<Runtime>`.
pub struct Runtime {
    registry: EntityRegistry,
    policy: ConsistencyPolicy,
    config: EngineConfig,
    executor: Arc<dyn StatementExecutor>,
    statements: StatementCache,
}

impl Runtime {
    /// Create a runtime.
    pub fn new(
        registry: EntityRegistry,
        policy: ConsistencyPolicy,
        config: EngineConfig,
        executor: Arc<dyn StatementExecutor>,
    ) -> Self {
        Self {
            registry,
            policy,
            config,
            executor,
            statements: StatementCache::new(),
        }
    }

    /// The entity registry.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Metadata of an entity type.
    pub fn meta(&self, entity_type: &str) -> Result<Arc<EntityMeta>> {
        Ok(self.registry.get(entity_type)?)
    }

    /// The consistency policy.
    pub fn policy(&self) -> &ConsistencyPolicy {
        &self.policy
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The prepared-statement cache.
    pub fn statements(&self) -> &StatementCache {
        &self.statements
    }

    /// Execute one statement now.
    pub fn execute(&self, statement: Statement, level: ConsistencyLevel) -> Result<ResultSet> {
        trace!(table = statement.table(), kind = %statement.kind(), %level, "executing statement");
        let bound = self.statements.bind(self.executor.as_ref(), statement)?;
        Ok(self.executor.execute(&bound, level)?)
    }

    /// Submit the statements batched for one table.
    pub fn execute_batch(
        &self,
        table: &str,
        statements: Vec<Statement>,
        level: ConsistencyLevel,
    ) -> Result<()> {
        let bound = statements
            .into_iter()
            .map(|s| self.statements.bind(self.executor.as_ref(), s))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        trace!(table, statements = bound.len(), %level, "submitting batch");
        Ok(self.executor.execute_batch(table, &bound, level)?)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("entities", &self.registry.len())
            .field("config", &self.config)
            .field("prepared", &self.statements.len())
            .finish()
    }
}
