//! sled-backed statement executor and schema service.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use colmap_core::{DriverError, SchemaService, StatementExecutor};
use colmap_proto::{
    BoundStatement, ColumnValue, ConsistencyLevel, PreparedHandle, QueryTemplate, ResultSet, Row,
    Statement, TableDef, Value,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use sled::{Batch, Db, Tree};
use tracing::{debug, trace};

use crate::config::SledConfig;
use crate::error::{Result, SledError};
use crate::row::{current_micros, StoredRow};

/// Tree name for table definitions.
const CATALOG_TREE: &str = "catalog:tables";

/// Prefix of the tree holding a table's rows.
const TABLE_TREE_PREFIX: &str = "table:";

/// An opened table.
struct TableHandle {
    def: TableDef,
    tree: Tree,
}

/// An embedded store that executes logical statements against sled trees.
///
/// Each table is one tree keyed by the encoded primary key. The consistency
/// level is accepted and ignored: there is a single replica.
pub struct SledStore {
    db: Db,
    catalog: Tree,
    tables: DashMap<String, Arc<TableHandle>>,
    prepared: AtomicU64,
    // Serializes read-modify-write of rows.
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create a store.
    pub fn open(config: SledConfig) -> Result<Self> {
        let db = config.to_sled_config().open()?;
        let catalog = db.open_tree(CATALOG_TREE)?;
        debug!(recovered = db.was_recovered(), "sled store opened");
        Ok(Self {
            db,
            catalog,
            tables: DashMap::new(),
            prepared: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        })
    }

    /// Open a temporary store, deleted on drop.
    pub fn temporary() -> Result<Self> {
        Self::open(SledConfig::temporary())
    }

    /// Names of every created table.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.catalog
            .iter()
            .keys()
            .map(|key| Ok(String::from_utf8_lossy(&key?).into_owned()))
            .collect()
    }

    /// Definition of a created table.
    pub fn table_def(&self, table: &str) -> Result<TableDef> {
        Ok(self.table(table)?.def.clone())
    }

    /// Every live row of a table, in key order.
    pub fn scan(&self, table: &str) -> Result<Vec<Row>> {
        let handle = self.table(table)?;
        let now = current_micros();
        let mut rows = Vec::new();
        for entry in handle.tree.iter() {
            let (_, bytes) = entry?;
            let cells = StoredRow::from_bytes(&bytes)?.select(&[], now);
            if !cells.is_empty() {
                rows.push(Row::new(cells));
            }
        }
        Ok(rows)
    }

    /// Number of prepared templates handed out.
    pub fn prepared_count(&self) -> u64 {
        self.prepared.load(Ordering::Relaxed)
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> Result<usize> {
        Ok(self.db.flush()?)
    }

    fn table(&self, name: &str) -> Result<Arc<TableHandle>> {
        if let Some(handle) = self.tables.get(name) {
            return Ok(handle.clone());
        }
        let bytes = self
            .catalog
            .get(name)?
            .ok_or_else(|| SledError::UnknownTable(name.to_string()))?;
        let def = TableDef::from_bytes(&bytes)?;
        let tree = self.db.open_tree(format!("{TABLE_TREE_PREFIX}{name}"))?;
        let handle = Arc::new(TableHandle { def, tree });
        self.tables.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    fn add_table(&self, def: &TableDef) -> Result<()> {
        def.validate()?;
        self.catalog.insert(def.name.as_str(), def.to_bytes()?)?;
        self.tables.remove(&def.name);
        self.table(&def.name)?;
        Ok(())
    }

    fn read(&self, statement: &Statement) -> Result<ResultSet> {
        let Statement::Select {
            table,
            key,
            columns,
        } = statement
        else {
            return Ok(ResultSet::empty());
        };
        let handle = self.table(table)?;
        let row_key = encode_key(&handle.def, key)?;
        let Some(bytes) = handle.tree.get(row_key)? else {
            return Ok(ResultSet::empty());
        };
        let cells = StoredRow::from_bytes(&bytes)?.select(columns, current_micros());
        if cells.is_empty() {
            return Ok(ResultSet::empty());
        }
        Ok(ResultSet::with_rows(vec![Row::new(cells)]))
    }

    /// Apply mutations against one table as a single sled batch.
    fn write(&self, table: &str, statements: &[&Statement]) -> Result<()> {
        let handle = self.table(table)?;
        let _guard = self.write_lock.lock();
        let now = current_micros();

        let mut staged: HashMap<Vec<u8>, StoredRow> = HashMap::new();
        for statement in statements {
            let key = match statement {
                Statement::Insert { values, .. } => values,
                Statement::Update { key, .. }
                | Statement::Delete { key, .. }
                | Statement::IncrementCounter { key, .. } => key,
                Statement::Select { .. } => continue,
            };
            let row = match staged.entry(encode_key(&handle.def, key)?) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let row = match handle.tree.get(entry.key())? {
                        Some(bytes) => StoredRow::from_bytes(&bytes)?,
                        None => StoredRow::default(),
                    };
                    entry.insert(row)
                }
            };
            apply_mutation(row, statement, now);
        }

        let mut batch = Batch::default();
        for (row_key, mut row) in staged {
            row.purge_expired(now);
            if row.is_empty() {
                batch.remove(row_key);
            } else {
                batch.insert(row_key, row.to_bytes()?);
            }
        }
        handle.tree.apply_batch(batch)?;
        trace!(table, statements = statements.len(), "mutations applied");
        Ok(())
    }
}

fn apply_mutation(row: &mut StoredRow, statement: &Statement, now: i64) {
    match statement {
        Statement::Insert {
            values,
            ttl,
            timestamp,
            ..
        } => row.write(values, timestamp.unwrap_or(now), *ttl),
        Statement::Update {
            key,
            values,
            ttl,
            timestamp,
            ..
        } => {
            let at = timestamp.unwrap_or(now);
            row.write(key, at, *ttl);
            row.write(values, at, *ttl);
        }
        Statement::Delete { timestamp, .. } => row.delete(timestamp.unwrap_or(now)),
        Statement::IncrementCounter {
            key, column, delta, ..
        } => {
            row.write(key, now, None);
            row.increment(column, *delta, now);
        }
        Statement::Select { .. } => {}
    }
}

/// Encode the key columns of a statement in table key order.
fn encode_key(def: &TableDef, columns: &[ColumnValue]) -> Result<Vec<u8>> {
    let mut key: Vec<&Value> = Vec::new();
    for name in def.key_columns() {
        let value = columns
            .iter()
            .find(|cv| cv.column == name)
            .map(|cv| &cv.value)
            .ok_or_else(|| SledError::MissingKeyColumn {
                table: def.name.clone(),
                column: name.to_string(),
            })?;
        key.push(value);
    }
    Ok(serde_json::to_vec(&key)?)
}

impl StatementExecutor for SledStore {
    fn execute(
        &self,
        statement: &BoundStatement,
        _level: ConsistencyLevel,
    ) -> std::result::Result<ResultSet, DriverError> {
        let statement = &statement.statement;
        let result = if statement.is_mutation() {
            self.write(statement.table(), &[statement]).map(|_| ResultSet::empty())
        } else {
            self.read(statement)
        };
        result.map_err(|e| e.into_driver(statement.table()))
    }

    fn prepare(&self, template: &QueryTemplate) -> std::result::Result<PreparedHandle, DriverError> {
        self.table(&template.table)
            .map_err(|e| DriverError::Prepare(e.to_string()))?;
        let id = self.prepared.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(id, template = %template, "statement prepared");
        Ok(PreparedHandle {
            id,
            template: template.clone(),
        })
    }

    fn execute_batch(
        &self,
        table: &str,
        statements: &[BoundStatement],
        _level: ConsistencyLevel,
    ) -> std::result::Result<(), DriverError> {
        let statements: Vec<&Statement> = statements.iter().map(|s| &s.statement).collect();
        self.write(table, &statements)
            .map_err(|e| e.into_driver(table))
    }
}

impl SchemaService for SledStore {
    fn table_exists(&self, table: &str) -> std::result::Result<bool, DriverError> {
        self.catalog
            .contains_key(table)
            .map_err(|e| DriverError::Schema(e.to_string()))
    }

    fn create_table(&self, table: &TableDef) -> std::result::Result<(), DriverError> {
        self.add_table(table)
            .map_err(|e| DriverError::Schema(e.to_string()))?;
        debug!(table = %table.name, "table created");
        Ok(())
    }
}
