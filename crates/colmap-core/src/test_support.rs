//! In-memory store and fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use colmap_proto::{
    BoundStatement, ColumnValue, ConsistencyLevel, PreparedHandle, QueryTemplate, ResultSet, Row,
    Statement, TableDef, Value, ValueKind,
};
use parking_lot::Mutex;

use crate::catalog::{CascadeType, EntityMeta, EntityRegistry, PropertyMeta};
use crate::config::EngineConfig;
use crate::consistency::ConsistencyPolicy;
use crate::context::{BatchingFlushContext, FlushContext, ImmediateFlushContext};
use crate::driver::{RecordingExecutor, SchemaService, StatementExecutor};
use crate::error::DriverError;
use crate::runtime::Runtime;

type Cells = BTreeMap<String, Value>;

struct MemTable {
    def: TableDef,
    rows: BTreeMap<String, Cells>,
}

/// A store keeping rows in memory.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, MemTable>>,
    prepared: AtomicU64,
    failing: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared_count(&self) -> u64 {
        self.prepared.load(Ordering::SeqCst)
    }

    /// Make every statement against `table` fail.
    pub fn fail_on(&self, table: &str) {
        *self.failing.lock() = Some(table.to_string());
    }

    pub fn recover(&self) {
        *self.failing.lock() = None;
    }

    /// Look up a stored row by its key values.
    pub fn row(&self, table: &str, key: &[Value]) -> Option<Cells> {
        let tables = self.tables.lock();
        tables.get(table)?.rows.get(&row_key(key)).cloned()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    fn apply(&self, statement: &Statement) -> Result<ResultSet, DriverError> {
        if self.failing.lock().as_deref() == Some(statement.table()) {
            return Err(DriverError::Execution {
                table: statement.table().to_string(),
                message: "injected failure".into(),
            });
        }

        let mut tables = self.tables.lock();
        let table = tables
            .get_mut(statement.table())
            .ok_or_else(|| DriverError::Execution {
                table: statement.table().to_string(),
                message: "unknown table".into(),
            })?;

        match statement {
            Statement::Insert { values, .. } => {
                let key = key_of(&table.def, values)?;
                let row = table.rows.entry(key).or_default();
                write_cells(row, values);
                Ok(ResultSet::empty())
            }
            Statement::Update { key, values, .. } => {
                let key = key_of(&table.def, key)?;
                let row = table.rows.entry(key).or_default();
                write_cells(row, values);
                Ok(ResultSet::empty())
            }
            Statement::Delete { key, .. } => {
                let key = key_of(&table.def, key)?;
                table.rows.remove(&key);
                Ok(ResultSet::empty())
            }
            Statement::IncrementCounter {
                key, column, delta, ..
            } => {
                let row_key = key_of(&table.def, key)?;
                let row = table.rows.entry(row_key).or_default();
                write_cells(row, key);
                let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
                row.insert(column.clone(), Value::Int64(current + delta));
                Ok(ResultSet::empty())
            }
            Statement::Select { key, columns, .. } => {
                let row_key = key_of(&table.def, key)?;
                let Some(row) = table.rows.get(&row_key) else {
                    return Ok(ResultSet::empty());
                };
                let selected = row
                    .iter()
                    .filter(|(name, _)| columns.is_empty() || columns.contains(name))
                    .map(|(name, value)| ColumnValue::new(name.clone(), value.clone()))
                    .collect();
                Ok(ResultSet::with_rows(vec![Row::new(selected)]))
            }
        }
    }
}

fn write_cells(row: &mut Cells, values: &[ColumnValue]) {
    for cv in values {
        if cv.value.is_null() {
            row.remove(&cv.column);
        } else {
            row.insert(cv.column.clone(), cv.value.clone());
        }
    }
}

fn row_key(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn key_of(def: &TableDef, columns: &[ColumnValue]) -> Result<String, DriverError> {
    let mut key = Vec::new();
    for name in def.key_columns() {
        let value = columns
            .iter()
            .find(|cv| cv.column == name)
            .map(|cv| cv.value.clone())
            .ok_or_else(|| DriverError::Execution {
                table: def.name.clone(),
                message: format!("missing key column {name}"),
            })?;
        key.push(value);
    }
    Ok(row_key(&key))
}

impl StatementExecutor for MemoryStore {
    fn execute(
        &self,
        statement: &BoundStatement,
        _level: ConsistencyLevel,
    ) -> Result<ResultSet, DriverError> {
        self.apply(&statement.statement)
    }

    fn prepare(&self, template: &QueryTemplate) -> Result<PreparedHandle, DriverError> {
        let id = self.prepared.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PreparedHandle {
            id,
            template: template.clone(),
        })
    }
}

impl SchemaService for MemoryStore {
    fn table_exists(&self, table: &str) -> Result<bool, DriverError> {
        Ok(self.tables.lock().contains_key(table))
    }

    fn create_table(&self, table: &TableDef) -> Result<(), DriverError> {
        self.tables.lock().insert(
            table.name.clone(),
            MemTable {
                def: table.clone(),
                rows: BTreeMap::new(),
            },
        );
        Ok(())
    }
}

/// Order -> items (persist, merge), Order -> customer (no cascade),
/// Item -> order (all).
pub fn registry() -> EntityRegistry {
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
                .with_property(PropertyMeta::scalar("name", ValueKind::String)),
        )
        .build()
        .expect("fixture registry is valid")
}

pub type Recorder = Arc<RecordingExecutor<MemoryStore>>;

/// A runtime over a recording in-memory store with every table created.
pub fn runtime_with(config: EngineConfig, policy: ConsistencyPolicy) -> (Arc<Runtime>, Recorder) {
    let registry = registry();
    let store = MemoryStore::new();
    for (_, table) in registry.table_defs().expect("fixture tables") {
        store.create_table(&table).expect("create table");
    }
    let recorder = Arc::new(RecordingExecutor::new(store));
    let runtime = Runtime::new(registry, policy, config, recorder.clone());
    (Arc::new(runtime), recorder)
}

pub fn runtime() -> (Arc<Runtime>, Recorder) {
    runtime_with(EngineConfig::default(), ConsistencyPolicy::default())
}

pub fn immediate(runtime: &Arc<Runtime>) -> Arc<dyn FlushContext> {
    Arc::new(ImmediateFlushContext::new(runtime.clone()))
}

pub fn batching(runtime: &Arc<Runtime>) -> Arc<BatchingFlushContext> {
    Arc::new(BatchingFlushContext::new(runtime.clone()))
}
