//! Label sets for pipeline metrics

use prometheus_client::encoding::EncodeLabelSet;
use std::fmt;

/// Failable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageLabel {
    Decode,
    Map,
    BuildMutation,
}

impl StageLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageLabel::Decode => "decode",
            StageLabel::Map => "map",
            StageLabel::BuildMutation => "build_mutation",
        }
    }
}

impl fmt::Display for StageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeLabel {
    Success,
    Failure,
    /// Discarded before an attempt, e.g. a full publish buffer
    Dropped,
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeLabel::Success => write!(f, "success"),
            OutcomeLabel::Failure => write!(f, "failure"),
            OutcomeLabel::Dropped => write!(f, "dropped"),
        }
    }
}

/// Labels of the per-stage element counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct StageLabels {
    pub stage: String,
    pub outcome: String,
}

impl StageLabels {
    pub fn new(stage: StageLabel, outcome: OutcomeLabel) -> Self {
        Self {
            stage: stage.to_string(),
            outcome: outcome.to_string(),
        }
    }
}

/// Labels of the per-topic publish counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, EncodeLabelSet)]
pub struct TopicLabels {
    pub topic: String,
    pub outcome: String,
}

impl TopicLabels {
    pub fn new(topic: impl Into<String>, outcome: OutcomeLabel) -> Self {
        Self {
            topic: topic.into(),
            outcome: outcome.to_string(),
        }
    }
}
