//! Signal E2E tests: folding into stored documents, per-key serialization
//! and replication to aggregates.

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use e2e_tests::{doc, TestHarness};
use indexer_core::{AddRequest, SignalRequest};
use indexer_types::{Document, Signal, StatsEntry, TimeUnit, DAILY_STATS_FIELD, OVERALL_STATS_FIELD};

fn stats(doc: &Document, field: &str, name: &str) -> Value {
    doc.get(field)
        .and_then(Value::as_array)
        .and_then(|items| items.iter().find(|i| i.get("name") == Some(&json!(name))))
        .cloned()
        .unwrap_or(Value::Null)
}

fn daily(doc: &Document, name: &str) -> StatsEntry {
    serde_json::from_value(stats(doc, DAILY_STATS_FIELD, name)).unwrap()
}

fn overall_value(doc: &Document, name: &str) -> f64 {
    stats(doc, OVERALL_STATS_FIELD, name)
        .get("value")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

async fn harness_with_product() -> TestHarness {
    let harness = TestHarness::new().await;
    harness
        .indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x"], "views": 1})),
        ))
        .await
        .unwrap();
    harness
}

/// Concurrent signals on one document are serialized; none is lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_signals_are_serialized() {
    let harness = harness_with_product().await;
    let count = 20;

    let tasks: Vec<_> = (0..count)
        .map(|_| {
            let indexer = harness.indexer.clone();
            tokio::spawn(async move {
                indexer
                    .add_signal(SignalRequest::new(
                        "product",
                        "p1",
                        vec![Signal::in_period("view", TimeUnit::Day, 20160310)],
                    ))
                    .await
            })
        })
        .collect();
    for result in futures::future::join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let product = harness.stored("product", "p1").unwrap();
    assert_eq!(overall_value(&product, "view"), count as f64);
    assert_eq!(daily(&product, "view").value, count as f64);
}

/// Signals replicate to the document's aggregates.
#[tokio::test]
async fn test_signals_replicate_to_aggregates() {
    let harness = harness_with_product().await;
    harness
        .indexer
        .add_signal(SignalRequest::new(
            "product",
            "p1",
            vec![Signal::in_period("view", TimeUnit::Day, 20160310).with_value(2.0)],
        ))
        .await
        .unwrap();
    harness.indexer.flush().await.unwrap();

    let tag = harness.stored("tag", "x").unwrap();
    assert_eq!(overall_value(&tag, "view"), 2.0);
    assert_eq!(daily(&tag, "view").time_in_unit, 20160310);
    assert_eq!(tag.get("count"), Some(&json!(1)));
}

/// A gap of five days rolls the bucket into the window and zero-fills.
#[tokio::test]
async fn test_rollover_zero_fills() {
    let harness = harness_with_product().await;
    for (day, value) in [(20160301, 3.0), (20160306, 1.0)] {
        harness
            .indexer
            .add_signal(SignalRequest::new(
                "product",
                "p1",
                vec![Signal::in_period("view", TimeUnit::Day, day).with_value(value)],
            ))
            .await
            .unwrap();
    }

    let entry = daily(&harness.stored("product", "p1").unwrap(), "view");
    assert_eq!(entry.time_in_unit, 20160306);
    assert_eq!(entry.value, 1.0);
    let values = entry.last_n_values.unwrap();
    assert_eq!(values.len(), 30);
    assert_eq!(values[25], 3.0);
    assert_eq!(&values[26..], &[0.0, 0.0, 0.0, 0.0]);
}

/// Signals older than the current bucket only count towards the total.
#[tokio::test]
async fn test_late_signal_only_counts_overall() {
    let harness = harness_with_product().await;
    for day in [20160310, 20160305] {
        harness
            .indexer
            .add_signal(SignalRequest::new(
                "product",
                "p1",
                vec![Signal::in_period("view", TimeUnit::Day, day)],
            ))
            .await
            .unwrap();
    }

    let product = harness.stored("product", "p1").unwrap();
    let entry = daily(&product, "view");
    assert_eq!(entry.time_in_unit, 20160310);
    assert_eq!(entry.value, 1.0);
    assert_eq!(overall_value(&product, "view"), 2.0);
}

/// Timestamp signals without a time land in the clock's day.
#[tokio::test]
async fn test_signal_without_time_uses_clock() {
    let harness = harness_with_product().await;
    let signal = Signal {
        name: "view".to_string(),
        time_unit: TimeUnit::Timestamp,
        time_in_unit: None,
        value: 1.0,
    };
    harness
        .indexer
        .add_signal(SignalRequest::new("product", "p1", vec![signal]))
        .await
        .unwrap();

    let entry = daily(&harness.stored("product", "p1").unwrap(), "view");
    assert_eq!(entry.time_in_unit, 20160310);
}
