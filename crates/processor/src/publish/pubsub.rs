//! Pub/Sub REST publisher

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use catalog_etl_config::PublishConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use super::{EventPublisher, TopicName};
use crate::error::PublishError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Debug, Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publishes through the Pub/Sub REST API
pub struct PubSubPublisher {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl PubSubPublisher {
    pub fn new(config: &PublishConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("catalog-etl/0.1")
            .build()
            .map_err(|e| {
                PublishError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        info!(endpoint = %config.endpoint, "Initialized Pub/Sub publisher");

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        })
    }

    /// Publish URL of a topic
    pub fn publish_url(&self, topic: &TopicName) -> String {
        format!("{}/v1/{}:publish", self.endpoint, topic)
    }
}

#[async_trait]
impl EventPublisher for PubSubPublisher {
    async fn publish(&self, topic: &TopicName, data: Bytes) -> Result<String, PublishError> {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(&data),
            }],
        };

        let mut request = self.client.post(self.publish_url(topic)).json(&body);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PublishError::Request {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let parsed: PublishResponse = response.json().await.map_err(|e| PublishError::Request {
            topic: topic.to_string(),
            reason: format!("invalid publish response: {}", e),
        })?;

        parsed
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PublishError::Request {
                topic: topic.to_string(),
                reason: "publish response carried no message id".to_string(),
            })
    }

    fn name(&self) -> &str {
        "pubsub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_url() {
        let config = PublishConfig {
            endpoint: "http://localhost:8085/".to_string(),
            ..Default::default()
        };
        let publisher = PubSubPublisher::new(&config).unwrap();

        assert_eq!(
            publisher.publish_url(&TopicName::new("shop", "product-created")),
            "http://localhost:8085/v1/projects/shop/topics/product-created:publish"
        );
    }

    #[test]
    fn test_request_body_is_base64() {
        let body = PublishRequest {
            messages: vec![PubsubMessage {
                data: STANDARD.encode(b"\x0a\x04SKU1"),
            }],
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["data"], "CgRTS1Ux");
    }

    #[test]
    fn test_response_parsing() {
        let parsed: PublishResponse = serde_json::from_str(r#"{"messageIds":["42"]}"#).unwrap();
        assert_eq!(parsed.message_ids, vec!["42".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_error() {
        let config = PublishConfig {
            endpoint: "http://127.0.0.1:1".to_string(),
            ..Default::default()
        };
        let publisher = PubSubPublisher::new(&config).unwrap();

        let err = publisher
            .publish(&TopicName::new("shop", "t"), Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Request { .. }));
    }
}
