//! Integration tests for Prometheus metrics

mod common;

use common::record;
use processor::metrics::{MetricsRegistry, OutcomeLabel, StageLabel};

#[test]
fn test_counters_are_encoded_with_prefix() {
    let registry = MetricsRegistry::new();
    let metrics = registry.pipeline_metrics();

    metrics.record_read();
    metrics.record_read();
    metrics.record_stage(StageLabel::Decode, OutcomeLabel::Success);
    metrics.record_stage(StageLabel::Decode, OutcomeLabel::Failure);
    metrics.record_sink_failure(3);
    metrics.record_publish("projects/shop/topics/product-created", OutcomeLabel::Success);

    let text = registry.encode().unwrap();

    assert!(text.contains("catalog_etl_records_read_total 2"));
    assert!(text.contains("catalog_etl_sink_write_failures_total 3"));
    assert!(text.contains(r#"stage="decode""#));
    assert!(text.contains(r#"outcome="failure""#));
    assert!(text.contains(r#"topic="projects/shop/topics/product-created""#));
}

#[tokio::test]
async fn test_pipeline_run_updates_registered_counters() {
    let registry = MetricsRegistry::new();
    let mut harness = common::TestHarness::new();
    harness.metrics = registry.pipeline_metrics();

    harness
        .run(vec![
            record("a", r#"{"op":"CREATE","id":"SKU1","name":"A"}"#),
            record("b", "garbage"),
        ])
        .await
        .unwrap();

    assert_eq!(harness.metrics.records_read(), 2);
    assert_eq!(harness.metrics.dead_letters(), 1);
    assert_eq!(harness.metrics.mutations_written(), 1);

    let text = registry.encode().unwrap();
    assert!(text.contains("catalog_etl_dead_letters_total 1"));
    assert!(text.contains("catalog_etl_mutations_written_total 1"));
}
