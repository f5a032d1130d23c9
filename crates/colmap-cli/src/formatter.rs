//! Output formatters for store contents and recorded statements.

use clap::ValueEnum;
use colmap_core::driver::RecordedStatement;
use colmap_proto::{Row, TableDef, Value};
use comfy_table::{Cell, Table};

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format
    Table,
    /// JSON format
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format table definitions.
    fn format_tables(&self, tables: &[TableDef]) -> String;

    /// Format the rows of one table.
    fn format_rows(&self, table: &TableDef, rows: &[Row]) -> String;

    /// Format recorded statements.
    fn format_statements(&self, statements: &[RecordedStatement]) -> String;

    /// Format a simple message.
    fn format_message(&self, message: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Table => Box::new(TableFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Table formatter using comfy-table.
pub struct TableFormatter;

impl Formatter for TableFormatter {
    fn format_tables(&self, tables: &[TableDef]) -> String {
        if tables.is_empty() {
            return "No tables".to_string();
        }

        let mut table = Table::new();
        table.set_header(vec!["Table", "Partition key", "Clustering key", "Columns"]);
        for def in tables {
            table.add_row(vec![
                Cell::new(&def.name),
                Cell::new(def.partition_key.join(", ")),
                Cell::new(def.clustering_key.join(", ")),
                Cell::new(def.columns.len()),
            ]);
        }
        table.to_string()
    }

    fn format_rows(&self, def: &TableDef, rows: &[Row]) -> String {
        if rows.is_empty() {
            return "No rows".to_string();
        }

        let mut table = Table::new();
        table.set_header(def.columns.iter().map(|c| Cell::new(&c.name)));
        for row in rows {
            table.add_row(def.columns.iter().map(|c| {
                Cell::new(row.get(&c.name).map(Value::to_string).unwrap_or_default())
            }));
        }
        format!("{}\n{} row(s)", table, rows.len())
    }

    fn format_statements(&self, statements: &[RecordedStatement]) -> String {
        let mut table = Table::new();
        table.set_header(vec!["#", "Statement", "Table", "Columns", "Level", "Batched"]);
        for (i, recorded) in statements.iter().enumerate() {
            let statement = &recorded.statement;
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(statement.kind()),
                Cell::new(statement.table()),
                Cell::new(statement.columns().join(", ")),
                Cell::new(recorded.level),
                Cell::new(if recorded.batched { "yes" } else { "" }),
            ]);
        }
        table.to_string()
    }

    fn format_message(&self, message: &str) -> String {
        message.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format_tables(&self, tables: &[TableDef]) -> String {
        let tables: Vec<serde_json::Value> = tables
            .iter()
            .map(|def| {
                serde_json::json!({
                    "name": def.name,
                    "partition_key": def.partition_key,
                    "clustering_key": def.clustering_key,
                    "columns": def.columns.iter().map(|c| &c.name).collect::<Vec<_>>(),
                })
            })
            .collect();
        serde_json::to_string_pretty(&tables).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_rows(&self, _def: &TableDef, rows: &[Row]) -> String {
        let rows: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                let obj: serde_json::Map<String, serde_json::Value> = row
                    .columns
                    .iter()
                    .map(|cv| (cv.column.clone(), value_to_json(&cv.value)))
                    .collect();
                serde_json::Value::Object(obj)
            })
            .collect();
        serde_json::to_string_pretty(&rows).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_statements(&self, statements: &[RecordedStatement]) -> String {
        let statements: Vec<serde_json::Value> = statements
            .iter()
            .map(|recorded| {
                serde_json::json!({
                    "statement": recorded.statement.kind().to_string(),
                    "table": recorded.statement.table(),
                    "columns": recorded.statement.columns(),
                    "level": recorded.level.to_string(),
                    "batched": recorded.batched,
                })
            })
            .collect();
        serde_json::to_string_pretty(&statements).unwrap_or_else(|_| "[]".to_string())
    }

    fn format_message(&self, message: &str) -> String {
        serde_json::json!({ "message": message }).to_string()
    }
}

/// Convert a stored value to plain JSON.
fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int32(i) => serde_json::Value::from(*i),
        Value::Int64(i) | Value::Timestamp(i) => serde_json::Value::from(*i),
        Value::Float32(f) => serde_json::Value::from(*f),
        Value::Float64(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(_) | Value::Uuid(_) => serde_json::Value::String(value.to_string()),
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
        Value::Map(entries) => serde_json::Value::Array(
            entries
                .iter()
                .map(|(k, v)| serde_json::json!([value_to_json(k), value_to_json(v)]))
                .collect(),
        ),
    }
}
