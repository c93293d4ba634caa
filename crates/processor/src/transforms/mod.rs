//! Catalogue transforms
//!
//! The three conversions plugged into the pipeline for product-catalogue
//! events: decode the raw JSON record, map the event to sink rows, build one
//! insert-or-update mutation per row.

pub mod decode;
pub mod mapping;
pub mod mutation;

pub use decode::decode_catalog_event;
pub use mapping::{map_attribute_rows, map_product_row, CatalogTables};
pub use mutation::{MutationBuilder, TableSchema};

use catalog_etl_types::{CatalogEvent, MutationDescriptor, RawMessage, TableRow};

use crate::error::{DecodeError, MappingError, MutationBuildError};
use crate::pipeline::PipelineTransforms;

pub type DecodeFn = Box<dyn Fn(&RawMessage) -> Result<CatalogEvent, DecodeError> + Send + Sync>;
pub type MapFn = Box<dyn Fn(&CatalogEvent) -> Result<Vec<TableRow>, MappingError> + Send + Sync>;
pub type BuildFn =
    Box<dyn Fn(&TableRow) -> Result<MutationDescriptor, MutationBuildError> + Send + Sync>;

/// Transform set of the product-catalogue job
pub type CatalogTransforms = PipelineTransforms<DecodeFn, MapFn, BuildFn>;

/// Transforms writing to `tables`
pub fn catalog_transforms(tables: CatalogTables) -> CatalogTransforms {
    let builder = MutationBuilder::for_tables(&tables);

    PipelineTransforms {
        decode: Box::new(decode_catalog_event),
        map: Box::new(move |event: &CatalogEvent| tables.map_rows(event)),
        build: Box::new(move |row: &TableRow| builder.build_row(row)),
    }
}
