//! Schema checks run once before the engine is used.

use tracing::{info, warn};

use crate::catalog::EntityRegistry;
use crate::config::EngineConfig;
use crate::driver::SchemaService;
use crate::error::{ConfigError, Result};

/// Outcome of [`verify_schema`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Tables that already existed.
    pub existing: Vec<String>,
    /// Tables created because they were missing.
    pub created: Vec<String>,
}

impl BootstrapReport {
    /// Total number of tables checked.
    pub fn table_count(&self) -> usize {
        self.existing.len() + self.created.len()
    }
}

/// Check that every table the registry maps to exists.
///
/// With `create_missing_tables` a missing table is created through the
/// schema service; otherwise it is reported as [`ConfigError::MissingTable`].
pub fn verify_schema(
    registry: &EntityRegistry,
    schema: &dyn SchemaService,
    config: &EngineConfig,
) -> Result<BootstrapReport> {
    let mut report = BootstrapReport::default();

    for (entity_type, table) in registry.table_defs()? {
        table
            .validate()
            .map_err(|_| ConfigError::InvalidSchemaName(table.name.clone()))?;

        if schema.table_exists(&table.name)? {
            report.existing.push(table.name);
            continue;
        }
        if !config.create_missing_tables {
            warn!(table = %table.name, entity_type = %entity_type, "table missing");
            return Err(ConfigError::MissingTable {
                entity_type,
                table: table.name,
            }
            .into());
        }

        schema.create_table(&table)?;
        info!(table = %table.name, entity_type = %entity_type, "table created");
        report.created.push(table.name);
    }

    Ok(report)
}
