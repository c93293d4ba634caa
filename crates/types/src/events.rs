//! Event types for the catalogue pipeline
//!
//! `RawMessage` is what the stream reader hands to the pipeline. `CatalogEvent`
//! is the decoded, strongly typed change event that every later stage and the
//! event publisher work from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::proto::{ProductCreatedEvent, ProductUpdatedEvent};

/// Key/value pair read from the event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Message key (if present)
    pub key: Option<String>,
    /// Message value
    pub value: String,
    /// Topic the message was read from
    #[serde(default)]
    pub topic: String,
    /// Partition
    #[serde(default)]
    pub partition: i32,
    /// Offset within the partition
    #[serde(default)]
    pub offset: i64,
    /// Log timestamp (if available)
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawMessage {
    /// Create a message with only a key and value, as seen by tests and replays
    pub fn new(key: Option<impl Into<String>>, value: impl Into<String>) -> Self {
        Self {
            key: key.map(Into::into),
            value: value.into(),
            topic: String::new(),
            partition: 0,
            offset: 0,
            timestamp: None,
        }
    }

    /// Attach log coordinates
    pub fn with_position(mut self, topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        self.topic = topic.into();
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Attach the log timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Catalogue operation carried by an event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Product was created
    Create,
    /// Product was updated
    Update,
}

impl OperationType {
    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
        }
    }
}

/// Decoded product-catalogue change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogEvent {
    /// Operation discriminant
    pub op: OperationType,
    /// Product identity (SKU)
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Free-text description
    #[serde(default)]
    pub description: Option<String>,
    /// Price in minor currency units
    #[serde(default)]
    pub price: Option<i64>,
    /// Attribute set
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// When the change happened at the source
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
}

impl CatalogEvent {
    /// Create an event with only the required fields set
    pub fn new(op: OperationType, id: impl Into<String>) -> Self {
        Self {
            op,
            id: id.into(),
            name: None,
            description: None,
            price: None,
            attributes: BTreeMap::new(),
            event_time: None,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn event_time_millis(&self) -> i64 {
        self.event_time
            .map(|t| t.timestamp_millis())
            .unwrap_or_default()
    }

    /// Projection published for creation events, `None` for any other operation
    pub fn to_created_event(&self) -> Option<ProductCreatedEvent> {
        if self.op != OperationType::Create {
            return None;
        }

        Some(ProductCreatedEvent {
            product_id: self.id.clone(),
            name: self.name.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            price: self.price.unwrap_or_default(),
            attributes: self.attributes.clone().into_iter().collect(),
            event_time_millis: self.event_time_millis(),
        })
    }

    /// Projection published for update events, `None` for any other operation
    pub fn to_updated_event(&self) -> Option<ProductUpdatedEvent> {
        if self.op != OperationType::Update {
            return None;
        }

        Some(ProductUpdatedEvent {
            product_id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            price: self.price,
            attributes: self.attributes.clone().into_iter().collect(),
            event_time_millis: self.event_time_millis(),
        })
    }
}
