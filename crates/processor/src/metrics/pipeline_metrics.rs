//! Counters exported by the running pipeline

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use super::labels::{OutcomeLabel, StageLabel, StageLabels, TopicLabels};

/// Pipeline counters; cloning shares the underlying values
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    records_read: Counter,
    stage_elements: Family<StageLabels, Counter>,
    dead_letters: Counter,
    dead_letter_write_failures: Counter,
    mutations_written: Counter,
    sink_write_failures: Counter,
    events_published: Family<TopicLabels, Counter>,
}

impl PipelineMetrics {
    /// Register the counters; done once per registry by
    /// [`crate::metrics::MetricsRegistry::pipeline_metrics`]
    pub(super) fn register(&self, registry: &mut Registry) {
        registry.register(
            "records_read",
            "Records handed to the pipeline by the reader",
            self.records_read.clone(),
        );
        registry.register(
            "stage_elements",
            "Elements leaving each failable stage by outcome",
            self.stage_elements.clone(),
        );
        registry.register(
            "dead_letters",
            "Failure envelopes written to the dead-letter queue",
            self.dead_letters.clone(),
        );
        registry.register(
            "dead_letter_write_failures",
            "Failure envelopes that could not be written",
            self.dead_letter_write_failures.clone(),
        );
        registry.register(
            "mutations_written",
            "Mutations committed to the sink",
            self.mutations_written.clone(),
        );
        registry.register(
            "sink_write_failures",
            "Mutations lost to sink write failures",
            self.sink_write_failures.clone(),
        );
        registry.register(
            "events_published",
            "Events published per topic by outcome",
            self.events_published.clone(),
        );
    }

    pub fn record_read(&self) {
        self.records_read.inc();
    }

    pub fn record_stage(&self, stage: StageLabel, outcome: OutcomeLabel) {
        self.stage_elements
            .get_or_create(&StageLabels::new(stage, outcome))
            .inc();
    }

    pub fn record_dead_letter(&self) {
        self.dead_letters.inc();
    }

    pub fn record_dead_letter_failure(&self) {
        self.dead_letter_write_failures.inc();
    }

    pub fn record_mutations_written(&self, count: usize) {
        self.mutations_written.inc_by(count as u64);
    }

    pub fn record_sink_failure(&self, count: usize) {
        self.sink_write_failures.inc_by(count as u64);
    }

    pub fn record_publish(&self, topic: &str, outcome: OutcomeLabel) {
        self.events_published
            .get_or_create(&TopicLabels::new(topic, outcome))
            .inc();
    }

    pub fn records_read(&self) -> u64 {
        self.records_read.get()
    }

    pub fn stage_count(&self, stage: StageLabel, outcome: OutcomeLabel) -> u64 {
        self.stage_elements
            .get_or_create(&StageLabels::new(stage, outcome))
            .get()
    }

    pub fn dead_letters(&self) -> u64 {
        self.dead_letters.get()
    }

    pub fn mutations_written(&self) -> u64 {
        self.mutations_written.get()
    }

    pub fn sink_write_failures(&self) -> u64 {
        self.sink_write_failures.get()
    }

    pub fn published(&self, topic: &str, outcome: OutcomeLabel) -> u64 {
        self.events_published
            .get_or_create(&TopicLabels::new(topic, outcome))
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsRegistry;

    #[test]
    fn test_counters_shared_between_clones() {
        let metrics = PipelineMetrics::default();
        let clone = metrics.clone();

        clone.record_read();
        clone.record_stage(StageLabel::Decode, OutcomeLabel::Failure);
        clone.record_mutations_written(3);

        assert_eq!(metrics.records_read(), 1);
        assert_eq!(metrics.stage_count(StageLabel::Decode, OutcomeLabel::Failure), 1);
        assert_eq!(metrics.stage_count(StageLabel::Decode, OutcomeLabel::Success), 0);
        assert_eq!(metrics.mutations_written(), 3);
    }

    #[test]
    fn test_registered_metrics_are_encoded() {
        let registry = MetricsRegistry::new();
        let metrics = registry.pipeline_metrics();
        metrics.record_publish("projects/p/topics/created", OutcomeLabel::Success);

        let text = registry.encode().unwrap();
        assert!(text.contains("catalog_etl_events_published_total"));
        assert!(text.contains("topic=\"projects/p/topics/created\""));
    }
}
