//! Table definitions exchanged with the schema service.

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::Error;

/// Maximum length of a table or column identifier.
pub const MAX_IDENTIFIER_LEN: usize = 48;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Int,
    BigInt,
    Float,
    Double,
    Text,
    Blob,
    Timestamp,
    Uuid,
    List,
    Set,
    Map,
    Tuple,
    Counter,
}

/// A column within a table definition.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub column_type: ColumnType,
}

impl ColumnDef {
    /// Create a column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// A table definition (name, columns and primary key layout).
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Columns, key columns first.
    pub columns: Vec<ColumnDef>,
    /// Partition key columns.
    pub partition_key: Vec<String>,
    /// Clustering key columns.
    pub clustering_key: Vec<String>,
}

impl TableDef {
    /// Create an empty table definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            partition_key: Vec::new(),
            clustering_key: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the partition key columns.
    pub fn with_partition_key(mut self, columns: Vec<String>) -> Self {
        self.partition_key = columns;
        self
    }

    /// Set the clustering key columns.
    pub fn with_clustering_key(mut self, columns: Vec<String>) -> Self {
        self.clustering_key = columns;
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// All primary key columns, partition key first.
    pub fn key_columns(&self) -> impl Iterator<Item = &str> {
        self.partition_key
            .iter()
            .chain(self.clustering_key.iter())
            .map(String::as_str)
    }

    /// Check the table and column identifiers.
    pub fn validate(&self) -> Result<(), Error> {
        validate_identifier(&self.name)?;
        for column in &self.columns {
            validate_identifier(&column.name)?;
        }
        Ok(())
    }

    /// Serialize the definition to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a definition from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// Check that a name is a legal table or column identifier.
///
/// Identifiers start with an ASCII letter, continue with ASCII letters,
/// digits or underscores, and are at most [`MAX_IDENTIFIER_LEN`] long.
pub fn validate_identifier(name: &str) -> Result<(), Error> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
                && name.len() <= MAX_IDENTIFIER_LEN
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders_table() -> TableDef {
        TableDef::new("orders")
            .with_column(ColumnDef::new("id", ColumnType::BigInt))
            .with_column(ColumnDef::new("total", ColumnType::Double))
            .with_partition_key(vec!["id".into()])
    }

    #[test]
    fn test_identifiers() {
        assert!(validate_identifier("orders").is_ok());
        assert!(validate_identifier("order_items2").is_ok());
        assert!(validate_identifier("2orders").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("bad-name").is_err());
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LEN + 1)).is_err());
    }

    #[test]
    fn test_table_builder() {
        let table = orders_table();
        assert!(table.validate().is_ok());
        assert_eq!(table.key_columns().collect::<Vec<_>>(), vec!["id"]);
        assert_eq!(
            table.get_column("total").map(|c| c.column_type),
            Some(ColumnType::Double)
        );
    }

    #[test]
    fn test_serialization_roundtrip() {
        let table = orders_table().with_clustering_key(vec!["total".into()]);
        let bytes = table.to_bytes().unwrap();
        let decoded = TableDef::from_bytes(&bytes).unwrap();
        assert_eq!(table, decoded);
    }
}
