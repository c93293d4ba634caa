//! Event publisher
//!
//! Each [`PublishBranch`] pairs a projection of the decoded catalogue event
//! with a destination topic. Branches run as independent tasks fed by their
//! own bounded buffer, so a slow or failing topic never holds up another.
//! Publishing is fire-and-forget per element: failures are logged and counted.

mod pubsub;

pub use pubsub::PubSubPublisher;

use async_trait::async_trait;
use bytes::Bytes;
use catalog_etl_config::PublishConfig;
use catalog_etl_types::CatalogEvent;
use parking_lot::Mutex;
use prost::Message;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::metrics::{OutcomeLabel, PipelineMetrics};

/// Fully qualified pub/sub topic
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicName {
    project: String,
    topic: String,
}

impl TopicName {
    pub fn new(project: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            topic: topic.into(),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project, self.topic)
    }
}

/// Destination of published events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one message, returning its server-assigned id
    async fn publish(&self, topic: &TopicName, data: Bytes) -> Result<String, PublishError>;

    /// Publisher name for logs
    fn name(&self) -> &str;
}

/// Projection of a catalogue event to an encoded message; `None` skips the event
pub type Projection = Arc<dyn Fn(&CatalogEvent) -> Option<Bytes> + Send + Sync>;

/// One projection and its destination topic
#[derive(Clone)]
pub struct PublishBranch {
    name: String,
    topic: TopicName,
    projection: Projection,
}

impl fmt::Debug for PublishBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishBranch")
            .field("name", &self.name)
            .field("topic", &self.topic)
            .finish()
    }
}

impl PublishBranch {
    pub fn new(name: impl Into<String>, topic: TopicName, projection: Projection) -> Self {
        Self {
            name: name.into(),
            topic,
            projection,
        }
    }

    /// Creation events, published for `CREATE` only
    pub fn created(topic: TopicName) -> Self {
        Self::new(
            "created",
            topic,
            Arc::new(|event: &CatalogEvent| {
                event
                    .to_created_event()
                    .map(|e| Bytes::from(e.encode_to_vec()))
            }),
        )
    }

    /// Update events, published for `UPDATE` only
    pub fn updated(topic: TopicName) -> Self {
        Self::new(
            "updated",
            topic,
            Arc::new(|event: &CatalogEvent| {
                event
                    .to_updated_event()
                    .map(|e| Bytes::from(e.encode_to_vec()))
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn project(&self, event: &CatalogEvent) -> Option<Bytes> {
        (self.projection)(event)
    }
}

/// The create and update branches of the catalogue job
pub fn catalog_branches(config: &PublishConfig) -> Vec<PublishBranch> {
    vec![
        PublishBranch::created(TopicName::new(&config.project, &config.create_topic)),
        PublishBranch::updated(TopicName::new(&config.project, &config.update_topic)),
    ]
}

/// Publish every projected event of a branch until its input closes
///
/// Returns the number of successful publishes.
pub async fn run_branch(
    branch: PublishBranch,
    publisher: Arc<dyn EventPublisher>,
    mut input: mpsc::Receiver<Arc<CatalogEvent>>,
    metrics: PipelineMetrics,
) -> u64 {
    let topic = branch.topic.to_string();
    let mut published = 0;

    while let Some(event) = input.recv().await {
        let Some(data) = branch.project(&event) else {
            continue;
        };

        match publisher.publish(&branch.topic, data).await {
            Ok(message_id) => {
                published += 1;
                metrics.record_publish(&topic, OutcomeLabel::Success);
                debug!(
                    branch = %branch.name,
                    topic = %topic,
                    product_id = %event.id,
                    message_id = %message_id,
                    "Event published"
                );
            }
            Err(e) => {
                metrics.record_publish(&topic, OutcomeLabel::Failure);
                warn!(
                    branch = %branch.name,
                    topic = %topic,
                    product_id = %event.id,
                    error = %e,
                    "Publish failed, event dropped"
                );
            }
        }
    }

    debug!(branch = %branch.name, published, "Publish branch input closed");
    published
}

/// Publisher kept in memory
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    messages: Arc<Mutex<Vec<(String, Bytes)>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make publishes to `topic` fail
    pub fn set_failing(&self, topic: &TopicName, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(topic.to_string());
        } else {
            set.remove(&topic.to_string());
        }
    }

    /// Messages published to a topic, in order
    pub fn messages_for(&self, topic: &TopicName) -> Vec<Bytes> {
        let topic = topic.to_string();
        self.messages
            .lock()
            .iter()
            .filter(|(t, _)| *t == topic)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn total(&self) -> usize {
        self.messages.lock().len()
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, topic: &TopicName, data: Bytes) -> Result<String, PublishError> {
        let topic = topic.to_string();
        if self.failing.lock().contains(&topic) {
            return Err(PublishError::Request {
                topic,
                reason: "simulated failure".to_string(),
            });
        }

        let mut messages = self.messages.lock();
        messages.push((topic, data));
        Ok(messages.len().to_string())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
