//! End-to-end test infrastructure for the aggregate indexer.
//!
//! Provides a shared TestHarness wiring an [`Indexer`] to an in-memory
//! document store, plus the type registry the scenarios run against:
//!
//! - `product`: tagged, branded documents. Aggregated into `tag` (count and
//!   sum of views). Drafts are not aggregated.
//! - `review`: aggregated into `movie` with a weighted average score.
//! - `visit`: lazy aggregate type summing hits per page.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use indexer_core::Indexer;
use indexer_kv::MemoryKv;
use indexer_store::{DocRef, MemoryDocumentStore};
use indexer_types::{
    AggregateConfig, AggregatorsConfig, BackendKind, Document, MeasureSpec, Settings, TypeConfig,
    TypeRegistry,
};

/// Instance name shared by the registry and settings.
pub const INSTANCE: &str = "shop";

/// Store index every test type lives in.
pub const STORE_INDEX: &str = "shop_store";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    pub indexer: Indexer,
    pub store: Arc<MemoryDocumentStore>,
    /// Set when the harness runs on distributed backends
    pub kv: Option<Arc<MemoryKv>>,
}

impl TestHarness {
    /// Local backends; flushes only happen when a test asks for one.
    pub async fn new() -> Self {
        Self::with_flush_timeout(Duration::from_secs(600)).await
    }

    /// Local backends with the given flush delay.
    pub async fn with_flush_timeout(flush_timeout: Duration) -> Self {
        let mut settings = test_settings();
        settings.cache.flush_timeout_ms = flush_timeout.as_millis() as u64;
        Self::build(settings, Arc::new(MemoryDocumentStore::new()), None).await
    }

    /// Distributed locks and cache over `kv`, sharing `store`.
    ///
    /// Two harnesses built from the same `kv` and `store` behave like two
    /// processes of one deployment.
    pub async fn distributed(kv: Arc<MemoryKv>, store: Arc<MemoryDocumentStore>) -> Self {
        let mut settings = test_settings();
        settings.locks.backend = BackendKind::Distributed;
        settings.cache.backend = BackendKind::Distributed;
        settings.cache.key_prefix = Some("e2e".to_string());
        Self::build(settings, store, Some(kv)).await
    }

    async fn build(
        settings: Settings,
        store: Arc<MemoryDocumentStore>,
        kv: Option<Arc<MemoryKv>>,
    ) -> Self {
        init_tracing();
        let mut builder = Indexer::builder(test_registry())
            .settings(settings)
            .store(store.clone())
            .clock(fixed_now);
        if let Some(kv) = &kv {
            builder = builder.kv(kv.clone());
        }
        let indexer = builder.build().await.expect("Failed to build indexer");
        Self { indexer, store, kv }
    }

    /// Stored document, bypassing the indexer.
    pub fn stored(&self, type_name: &str, id: &str) -> Option<Document> {
        self.store.snapshot(DocRef::new(STORE_INDEX, type_name, id))
    }

    /// Numeric field of a stored document.
    pub fn stored_number(&self, type_name: &str, id: &str, field: &str) -> Option<f64> {
        self.stored(type_name, id)
            .and_then(|doc| doc.get(field).and_then(Value::as_f64))
    }
}

/// Settings for tests: local backends, manual flushing.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.instance_name = INSTANCE.to_string();
    settings.cache.flush_timeout_ms = 600_000;
    settings.locks.timeout_ms = 2_000;
    settings.locks.retries = 50;
    settings.locks.delay_ms = 10;
    settings
}

/// Registry of the test types.
pub fn test_registry() -> TypeRegistry {
    TypeRegistry::builder(INSTANCE)
        .with_default_types()
        .register(TypeConfig::new("product"))
        .register(TypeConfig::new("tag"))
        .register(TypeConfig::new("review"))
        .register(TypeConfig::new("movie"))
        .register(
            TypeConfig::new("visit")
                .with_id_field("page")
                .aggregate_mode(vec![MeasureSpec::sum("hits")], |_existing, doc| {
                    let mut aggregate = Document::new();
                    if let Some(page) = doc.get("page") {
                        aggregate.insert("page".to_string(), page.clone());
                    }
                    aggregate
                }),
        )
        .aggregators(
            "product",
            AggregatorsConfig::new(vec![MeasureSpec::count("count"), MeasureSpec::sum("views")])
                .with_filter(|doc, _, _| doc.get("draft") != Some(&Value::Bool(true)))
                .with_aggregate(AggregateConfig::new("tags", "tags", "tag", |_, tag| {
                    named(tag)
                })),
        )
        .aggregators(
            "review",
            AggregatorsConfig::new(vec![MeasureSpec::weighted_average("score", "count")])
                .with_aggregate(AggregateConfig::new("movie", "movie", "movie", |_, movie| {
                    named(movie)
                })),
        )
        .build()
        .expect("Failed to build test registry")
}

fn named(value: &Value) -> Document {
    let mut doc = Document::new();
    doc.insert("id".to_string(), value.clone());
    doc.insert("name".to_string(), value.clone());
    doc
}

/// Time source of every harness: 2016-03-10 12:00 UTC.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 3, 10, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Build a document from a JSON object literal.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
