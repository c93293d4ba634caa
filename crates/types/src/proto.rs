//! Protobuf messages published to downstream consumers
//!
//! Field tags are part of the wire contract with subscribers; never reuse a tag.

use std::collections::HashMap;

/// Published on the create topic when a product is created
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductCreatedEvent {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub description: String,
    #[prost(int64, tag = "4")]
    pub price: i64,
    #[prost(map = "string, string", tag = "5")]
    pub attributes: HashMap<String, String>,
    #[prost(int64, tag = "6")]
    pub event_time_millis: i64,
}

/// Published on the update topic when a product changes
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProductUpdatedEvent {
    #[prost(string, tag = "1")]
    pub product_id: String,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub description: Option<String>,
    #[prost(int64, optional, tag = "4")]
    pub price: Option<i64>,
    #[prost(map = "string, string", tag = "5")]
    pub attributes: HashMap<String, String>,
    #[prost(int64, tag = "6")]
    pub event_time_millis: i64,
}
