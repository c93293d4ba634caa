//! Core types for the catalogue ETL pipeline
//!
//! This crate holds the data model shared by the configuration, processor and
//! binary crates: raw log messages, decoded catalogue events, sink rows and
//! mutations, and the dead-letter envelope.

pub mod events;
pub mod failsafe;
pub mod proto;
pub mod rows;

pub use events::{CatalogEvent, OperationType, RawMessage};
pub use failsafe::FailsafeElement;
pub use proto::{ProductCreatedEvent, ProductUpdatedEvent};
pub use rows::{MutationDescriptor, MutationKind, RowMap, TableRow};
