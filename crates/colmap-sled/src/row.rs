//! Stored row layout.
//!
//! A row is a map of cells. Every cell carries the write timestamp that
//! decides conflicts (the later write wins) and an optional expiry.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use colmap_proto::{ColumnValue, Value};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Current time in microseconds since Unix epoch.
pub fn current_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// One stored column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Stored value.
    pub value: Value,
    /// Write timestamp in microseconds.
    pub written_at: i64,
    /// Expiry in microseconds, if written with a TTL.
    pub expires_at: Option<i64>,
}

impl Cell {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A stored row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub cells: BTreeMap<String, Cell>,
}

impl StoredRow {
    /// Decode a row from its stored bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode the row for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Write columns at `written_at`. A null value deletes the cell.
    ///
    /// Cells holding a later write are left alone.
    pub fn write(&mut self, values: &[ColumnValue], written_at: i64, ttl: Option<u32>) {
        let expires_at = ttl.map(|secs| written_at + i64::from(secs) * 1_000_000);
        for cv in values {
            if self
                .cells
                .get(&cv.column)
                .is_some_and(|cell| cell.written_at > written_at)
            {
                continue;
            }
            if cv.value.is_null() {
                self.cells.remove(&cv.column);
            } else {
                self.cells.insert(
                    cv.column.clone(),
                    Cell {
                        value: cv.value.clone(),
                        written_at,
                        expires_at,
                    },
                );
            }
        }
    }

    /// Delete every cell written at or before `at`.
    pub fn delete(&mut self, at: i64) {
        self.cells.retain(|_, cell| cell.written_at > at);
    }

    /// Add `delta` to a counter cell.
    pub fn increment(&mut self, column: &str, delta: i64, now: i64) {
        let current = self
            .cells
            .get(column)
            .and_then(|cell| cell.value.as_i64())
            .unwrap_or(0);
        self.cells.insert(
            column.to_string(),
            Cell {
                value: Value::Int64(current + delta),
                written_at: now,
                expires_at: None,
            },
        );
    }

    /// Drop expired cells.
    pub fn purge_expired(&mut self, now: i64) {
        self.cells.retain(|_, cell| cell.is_live(now));
    }

    /// Check if no cell is left.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Live values of the requested columns. An empty request selects every column.
    pub fn select(&self, columns: &[String], now: i64) -> Vec<ColumnValue> {
        self.cells
            .iter()
            .filter(|(_, cell)| cell.is_live(now))
            .filter(|(name, _)| columns.is_empty() || columns.contains(name))
            .map(|(name, cell)| ColumnValue::new(name.clone(), cell.value.clone()))
            .collect()
    }
}
