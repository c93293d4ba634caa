//! Tabular row and sink mutation types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One sink row: column name to column value
pub type RowMap = HashMap<String, String>;

/// Row addressed to a named table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRow {
    /// Target table
    pub table: String,
    /// Column values
    pub row: RowMap,
}

impl TableRow {
    pub fn new(table: impl Into<String>, row: RowMap) -> Self {
        Self {
            table: table.into(),
            row,
        }
    }
}

/// Write semantics of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Insert a new row or overwrite the row sharing its primary key
    InsertOrUpdate,
}

/// Immutable write instruction against one named table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationDescriptor {
    table: String,
    kind: MutationKind,
    key_columns: Vec<String>,
    values: BTreeMap<String, String>,
}

impl MutationDescriptor {
    /// Build an insert-or-update mutation
    pub fn insert_or_update(
        table: impl Into<String>,
        key_columns: Vec<String>,
        values: BTreeMap<String, String>,
    ) -> Self {
        Self {
            table: table.into(),
            kind: MutationKind::InsertOrUpdate,
            key_columns,
            values,
        }
    }

    /// Target table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Write semantics
    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Primary key columns of the target table
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    /// Column values, ordered by column name
    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Column names, ordered
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Value of a single column
    pub fn value(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    /// Primary key values in key column order
    pub fn key_values(&self) -> Vec<String> {
        self.key_columns
            .iter()
            .map(|c| self.values.get(c).cloned().unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_row_serialization() {
        let mut row = RowMap::new();
        row.insert("id".to_string(), "SKU1".to_string());

        let json = serde_json::to_value(TableRow::new("Product", row)).unwrap();
        assert_eq!(json["table"], "Product");
        assert_eq!(json["row"]["id"], "SKU1");
    }

    #[test]
    fn test_mutation_accessors() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), "Widget".to_string());
        values.insert("id".to_string(), "SKU1".to_string());

        let mutation =
            MutationDescriptor::insert_or_update("Product", vec!["id".to_string()], values);

        assert_eq!(mutation.table(), "Product");
        assert_eq!(mutation.kind(), MutationKind::InsertOrUpdate);
        assert_eq!(mutation.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(mutation.value("name"), Some("Widget"));
        assert_eq!(mutation.key_values(), vec!["SKU1".to_string()]);
    }
}
