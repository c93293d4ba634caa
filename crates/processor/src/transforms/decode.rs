//! Raw message to catalogue event

use catalog_etl_types::{CatalogEvent, RawMessage};

use crate::error::DecodeError;

/// Decode the JSON value of a log record
pub fn decode_catalog_event(raw: &RawMessage) -> Result<CatalogEvent, DecodeError> {
    let event: CatalogEvent = serde_json::from_str(&raw.value)?;
    Ok(event)
}
