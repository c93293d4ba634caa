//! Catalogue event to sink rows

use catalog_etl_config::SinkConfig;
use catalog_etl_types::{CatalogEvent, RowMap, TableRow};

use crate::error::MappingError;

pub const COL_ID: &str = "id";
pub const COL_NAME: &str = "name";
pub const COL_DESCRIPTION: &str = "description";
pub const COL_PRICE: &str = "price";

pub const COL_PRODUCT_ID: &str = "product_id";
pub const COL_ATTR_KEY: &str = "attr_key";
pub const COL_ATTR_VALUE: &str = "attr_value";

fn required_id(event: &CatalogEvent) -> Result<&str, MappingError> {
    let id = event.id.trim();
    if id.is_empty() {
        return Err(MappingError::MissingField {
            field: COL_ID.to_string(),
        });
    }
    Ok(id)
}

/// Product row: `id`, `name` and whichever optional scalars are present
pub fn map_product_row(event: &CatalogEvent) -> Result<RowMap, MappingError> {
    let id = required_id(event)?;
    let name = event.name.as_deref().ok_or_else(|| MappingError::MissingField {
        field: COL_NAME.to_string(),
    })?;

    let mut row = RowMap::new();
    row.insert(COL_ID.to_string(), id.to_string());
    row.insert(COL_NAME.to_string(), name.to_string());

    if let Some(description) = &event.description {
        row.insert(COL_DESCRIPTION.to_string(), description.clone());
    }

    if let Some(price) = event.price {
        if price < 0 {
            return Err(MappingError::InvalidField {
                field: COL_PRICE.to_string(),
                reason: format!("negative price {}", price),
            });
        }
        row.insert(COL_PRICE.to_string(), price.to_string());
    }

    Ok(row)
}

/// One child row per attribute
pub fn map_attribute_rows(event: &CatalogEvent) -> Result<Vec<RowMap>, MappingError> {
    let id = required_id(event)?;

    Ok(event
        .attributes
        .iter()
        .map(|(key, value)| {
            let mut row = RowMap::new();
            row.insert(COL_PRODUCT_ID.to_string(), id.to_string());
            row.insert(COL_ATTR_KEY.to_string(), key.clone());
            row.insert(COL_ATTR_VALUE.to_string(), value.clone());
            row
        })
        .collect())
}

/// Tables the catalogue event is mapped onto
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogTables {
    /// Product table
    pub product: String,
    /// Attribute child table, skipped when absent
    pub attribute: Option<String>,
}

impl Default for CatalogTables {
    fn default() -> Self {
        Self {
            product: "Product".to_string(),
            attribute: None,
        }
    }
}

impl From<&SinkConfig> for CatalogTables {
    fn from(config: &SinkConfig) -> Self {
        Self {
            product: config.table_name.clone(),
            attribute: config.attribute_table_name.clone(),
        }
    }
}

impl CatalogTables {
    /// All rows produced by one event
    pub fn map_rows(&self, event: &CatalogEvent) -> Result<Vec<TableRow>, MappingError> {
        let mut rows = vec![TableRow::new(&self.product, map_product_row(event)?)];

        if let Some(attribute_table) = &self.attribute {
            rows.extend(
                map_attribute_rows(event)?
                    .into_iter()
                    .map(|row| TableRow::new(attribute_table, row)),
            );
        }

        Ok(rows)
    }
}
