//! Aggregation E2E tests.
//!
//! Source documents are written through the indexer; aggregates are checked
//! in the store after an explicit flush.

use pretty_assertions::assert_eq;
use serde_json::json;

use e2e_tests::{doc, TestHarness};
use indexer_core::{AddRequest, RemoveRequest, UpdateRequest};
use indexer_types::{OpType, Status};

/// Tags x,y -> y,z: x loses a member, y is updated, z gains one.
#[tokio::test]
async fn test_membership_change_moves_measures() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x", "y"], "views": 2})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(1.0));
    assert_eq!(harness.stored_number("tag", "y", "views"), Some(2.0));

    indexer
        .update(UpdateRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["y", "z"], "views": 5})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();

    assert_eq!(harness.stored_number("tag", "x", "count"), Some(0.0));
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(0.0));
    assert_eq!(harness.stored_number("tag", "y", "count"), Some(1.0));
    assert_eq!(harness.stored_number("tag", "y", "views"), Some(5.0));
    assert_eq!(harness.stored_number("tag", "z", "count"), Some(1.0));
    assert_eq!(harness.stored_number("tag", "z", "views"), Some(5.0));
}

/// Sum over two members: 3 + 2 = 5, then one member goes 2 -> 5, giving 8.
#[tokio::test]
async fn test_sum_follows_member_updates() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    for (id, views) in [("p1", 3), ("p2", 2)] {
        indexer
            .add(AddRequest::new(
                "product",
                doc(json!({"id": id, "tags": ["x"], "views": views})),
            ))
            .await
            .unwrap();
    }
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(5.0));
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(2.0));

    indexer
        .update(UpdateRequest::new(
            "product",
            doc(json!({"id": "p2", "tags": ["x"], "views": 5})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(8.0));
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(2.0));
}

/// Weighted average (10,1) and (20,1) is 15; removing the first leaves 20.
#[tokio::test]
async fn test_weighted_average_add_and_remove() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    for (id, score) in [("r1", 10), ("r2", 20)] {
        indexer
            .add(AddRequest::new(
                "review",
                doc(json!({"id": id, "movie": "m1", "score": score, "count": 1})),
            ))
            .await
            .unwrap();
    }
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("movie", "m1", "score"), Some(15.0));
    assert_eq!(harness.stored_number("movie", "m1", "count"), Some(2.0));

    let result = indexer
        .remove(RemoveRequest::new("review", "r1"))
        .await
        .unwrap();
    assert_eq!(result.status, Status::Success);
    indexer.flush().await.unwrap();

    assert_eq!(harness.stored_number("movie", "m1", "score"), Some(20.0));
    assert_eq!(harness.stored_number("movie", "m1", "count"), Some(1.0));
}

/// With the cache empty, an aggregate is seeded from its stored measures and
/// keeps the fields the cache never saw.
#[tokio::test]
async fn test_cold_cache_seeds_from_store() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x"], "views": 3})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();
    assert!(indexer.cache().keys().await.unwrap().is_empty());

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p2", "tags": ["x"], "views": 2})),
        ))
        .await
        .unwrap();
    let entry = indexer.cache().retrieve("tag:x").await.unwrap().unwrap();
    assert_eq!(entry.op_type, OpType::Update);
    assert_eq!(entry.existing_doc.get("count"), Some(&json!(1)));

    indexer.flush().await.unwrap();
    let tag = harness.stored("tag", "x").unwrap();
    assert_eq!(tag.get("count"), Some(&json!(2)));
    assert_eq!(tag.get("views"), Some(&json!(5)));
    assert_eq!(tag.get("name"), Some(&json!("x")));
}

/// A partial update that omits the aggregated field keeps membership, and
/// measures over fields it omits are left alone.
#[tokio::test]
async fn test_partial_update_without_field_keeps_aggregates() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x"], "views": 3, "title": "Lamp"})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();

    indexer
        .partial_update(UpdateRequest::new("product", doc(json!({"title": "Desk lamp"}))).with_id("p1"))
        .await
        .unwrap();
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(1.0));
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(3.0));

    indexer
        .partial_update(UpdateRequest::new("product", doc(json!({"views": 10}))).with_id("p1"))
        .await
        .unwrap();
    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(1.0));
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(10.0));

    let product = harness.stored("product", "p1").unwrap();
    assert_eq!(product.get("tags"), Some(&json!(["x"])));
}

/// Documents the aggregator filter rejects leave their aggregates.
#[tokio::test]
async fn test_aggregator_filter_removes_membership() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x"], "views": 4})),
        ))
        .await
        .unwrap();
    indexer.flush().await.unwrap();

    indexer
        .partial_update(UpdateRequest::new("product", doc(json!({"draft": true}))).with_id("p1"))
        .await
        .unwrap();
    indexer.flush().await.unwrap();

    assert_eq!(harness.stored_number("tag", "x", "count"), Some(0.0));
    assert_eq!(harness.stored_number("tag", "x", "views"), Some(0.0));
    assert!(harness.stored("product", "p1").is_some());
}

/// Removing the last member of an aggregate that was never flushed keeps
/// the pending ADD and zeroes its measures.
#[tokio::test]
async fn test_remove_before_flush() {
    let harness = TestHarness::new().await;
    let indexer = &harness.indexer;

    indexer
        .add(AddRequest::new(
            "product",
            doc(json!({"id": "p1", "tags": ["x"], "views": 4})),
        ))
        .await
        .unwrap();
    indexer
        .remove(RemoveRequest::new("product", "p1"))
        .await
        .unwrap();

    let entry = indexer.cache().retrieve("tag:x").await.unwrap().unwrap();
    assert_eq!(entry.op_type, OpType::Add);
    assert_eq!(entry.doc.get("count"), Some(&json!(0)));

    indexer.flush().await.unwrap();
    assert_eq!(harness.stored_number("tag", "x", "count"), Some(0.0));
    assert!(harness.stored("product", "p1").is_none());
}
