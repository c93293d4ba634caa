//! Row to sink mutation
//!
//! A [`MutationBuilder`] knows the schema of every target table. Building a
//! mutation checks that the row carries all required columns and non-empty
//! key columns; the single-row and batch variants route each row through a
//! [`FailsafeStage`] so one bad row never fails its siblings.

use catalog_etl_types::{FailsafeElement, MutationDescriptor, RowMap, TableRow};
use std::collections::{BTreeMap, HashMap};

use crate::error::MutationBuildError;
use crate::metrics::StageLabel;
use crate::pipeline::stage::{BatchOutput, FailsafeStage, StageOutput};

use super::mapping::{CatalogTables, COL_ATTR_KEY, COL_ATTR_VALUE, COL_ID, COL_NAME, COL_PRODUCT_ID};

/// Columns of one sink table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    name: String,
    key_columns: Vec<String>,
    required_columns: Vec<String>,
}

impl TableSchema {
    /// Schema whose key columns are also required
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        key_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        let key_columns: Vec<String> = key_columns.into_iter().map(Into::into).collect();
        Self {
            name: name.into(),
            required_columns: key_columns.clone(),
            key_columns,
        }
    }

    /// Add required non-key columns
    pub fn with_required<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.required_columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Product table keyed by `id`
    pub fn product(name: impl Into<String>) -> Self {
        Self::new(name, [COL_ID]).with_required([COL_NAME])
    }

    /// Attribute child table keyed by `(product_id, attr_key)`
    pub fn product_attribute(name: impl Into<String>) -> Self {
        Self::new(name, [COL_PRODUCT_ID, COL_ATTR_KEY]).with_required([COL_ATTR_VALUE])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }
}

/// Builds insert-or-update mutations for registered tables
#[derive(Debug, Clone, Default)]
pub struct MutationBuilder {
    tables: HashMap<String, TableSchema>,
}

impl MutationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder for the product table and, when configured, its attribute table
    pub fn for_tables(tables: &CatalogTables) -> Self {
        let builder = Self::new().with_table(TableSchema::product(&tables.product));
        match &tables.attribute {
            Some(attribute) => builder.with_table(TableSchema::product_attribute(attribute)),
            None => builder,
        }
    }

    /// Register a table schema
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.name.clone(), schema);
        self
    }

    pub fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Build one mutation, or report the first missing column
    pub fn build(
        &self,
        table: &str,
        row: &RowMap,
    ) -> Result<MutationDescriptor, MutationBuildError> {
        let schema = self
            .tables
            .get(table)
            .ok_or_else(|| MutationBuildError::UnknownTable {
                table: table.to_string(),
            })?;

        for column in &schema.required_columns {
            if !row.contains_key(column) {
                return Err(MutationBuildError::MissingColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }

        for column in &schema.key_columns {
            if row.get(column).map(|v| v.trim().is_empty()).unwrap_or(true) {
                return Err(MutationBuildError::EmptyKey {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }

        let values: BTreeMap<String, String> =
            row.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Ok(MutationDescriptor::insert_or_update(
            table,
            schema.key_columns.clone(),
            values,
        ))
    }

    /// Build the mutation of a row addressed to its table
    pub fn build_row(&self, row: &TableRow) -> Result<MutationDescriptor, MutationBuildError> {
        self.build(&row.table, &row.row)
    }

    /// Single-row variant: failures become envelopes instead of errors
    pub fn build_element<O>(
        &self,
        element: FailsafeElement<O, TableRow>,
    ) -> StageOutput<O, TableRow, MutationDescriptor> {
        FailsafeStage::new(StageLabel::BuildMutation, |row: &TableRow| self.build_row(row))
            .apply(element)
    }

    /// Multi-row variant: every row is built independently
    pub fn build_batch<O: Clone>(
        &self,
        original: &O,
        rows: Vec<TableRow>,
    ) -> BatchOutput<O, TableRow, MutationDescriptor> {
        FailsafeStage::new(StageLabel::BuildMutation, |row: &TableRow| self.build_row(row))
            .apply_all(rows.into_iter().map(|row| FailsafeElement::of(original.clone(), row)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> RowMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn builder() -> MutationBuilder {
        MutationBuilder::new()
            .with_table(TableSchema::product("Product"))
            .with_table(TableSchema::product_attribute("ProductAttribute"))
    }

    #[test]
    fn test_for_tables() {
        let builder = MutationBuilder::for_tables(&CatalogTables::default());
        assert!(builder.schema("Product").is_some());
        assert!(builder.schema("ProductAttribute").is_none());

        let builder = MutationBuilder::for_tables(&CatalogTables {
            product: "Item".to_string(),
            attribute: Some("ItemAttribute".to_string()),
        });
        assert_eq!(
            builder.schema("ItemAttribute").unwrap().key_columns(),
            ["product_id".to_string(), "attr_key".to_string()]
        );
    }

    #[test]
    fn test_build_single_row() {
        let mutation = builder()
            .build("Product", &row(&[("id", "SKU1"), ("name", "Widget")]))
            .unwrap();

        assert_eq!(mutation.table(), "Product");
        assert_eq!(mutation.key_columns(), ["id".to_string()]);
        assert_eq!(mutation.columns().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(mutation.value("name"), Some("Widget"));
    }

    #[test]
    fn test_build_keeps_optional_columns() {
        let mutation = builder()
            .build(
                "Product",
                &row(&[("id", "SKU1"), ("name", "Widget"), ("price", "250")]),
            )
            .unwrap();
        assert_eq!(mutation.value("price"), Some("250"));
    }

    #[test]
    fn test_build_missing_required_column() {
        let err = builder()
            .build("Product", &row(&[("id", "SKU1")]))
            .unwrap_err();
        assert_eq!(
            err,
            MutationBuildError::MissingColumn {
                table: "Product".to_string(),
                column: "name".to_string()
            }
        );
    }

    #[test]
    fn test_build_rejects_empty_key_and_unknown_table() {
        let b = builder();
        assert!(matches!(
            b.build("Product", &row(&[("id", ""), ("name", "Widget")])),
            Err(MutationBuildError::EmptyKey { .. })
        ));
        assert!(matches!(
            b.build("Inventory", &row(&[("id", "SKU1")])),
            Err(MutationBuildError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_build_element_failure_envelope() {
        let element = FailsafeElement::of(
            "raw".to_string(),
            TableRow::new("Product", row(&[("id", "SKU1")])),
        );

        let failed = builder().build_element(element).failure().unwrap();
        assert_eq!(failed.original_payload(), "raw");
        assert_eq!(failed.payload().table, "Product");
        assert!(failed.error_message().unwrap().contains("'name'"));
    }

    #[test]
    fn test_build_batch_isolates_bad_row() {
        let attribute = |key: &str, value: Option<&str>| {
            let mut pairs = vec![("product_id", "SKU1"), ("attr_key", key)];
            if let Some(value) = value {
                pairs.push(("attr_value", value));
            }
            TableRow::new("ProductAttribute", row(&pairs))
        };
        let rows = vec![
            attribute("a", Some("1")),
            attribute("b", None),
            attribute("c", Some("3")),
            attribute("d", Some("4")),
        ];

        let output = builder().build_batch(&"raw".to_string(), rows);

        assert_eq!(output.successes.len(), 3);
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].payload().row.get("attr_key").unwrap(), "b");
        assert!(output
            .successes
            .iter()
            .all(|m| m.original_payload() == "raw" && m.payload().key_columns().len() == 2));
    }
}
