//! The indexer façade.
//!
//! Every write to a document runs under the lock `{type}:{id}`. Nested
//! operations (an update that turns into a removal, an upsert that turns into
//! an add, a flush that replays an aggregate) pass the held handle down
//! instead of acquiring the lock again.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexer_cache::{
    AggregateFlusher, AggregatorCache, CacheBackend, DistributedCache, FlushReport, LocalCache,
};
use indexer_kv::KvClient;
use indexer_lock::LockService;
use indexer_store::{DocRef, DocumentStore, HttpDocumentStore, WriteAck};
use indexer_types::{
    merge_over, round_to, BackendKind, Document, FailCode, OpType, Operation, OperationResult,
    Settings, Signal, Status, TypeConfig, TypeRegistry, STATS_FIELDS,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{IndexerError, ValidationCode};
use crate::request::{
    AddCommand, AddRequest, Prefetched, RemoveCommand, RemoveRequest, SignalRequest,
    UpdateCommand, UpdateRequest, UpsertRequest,
};
use crate::stats::aggregate_signals;

pub(crate) type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub(crate) struct IndexerInner {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) lock: LockService,
    pub(crate) cache: AggregatorCache,
    pub(crate) clock: Clock,
}

/// Write-side entry point: document CRUD, signals and aggregate flushing.
///
/// Cheap to clone; clones share the store, locks and aggregator cache.
#[derive(Clone)]
pub struct Indexer {
    inner: Arc<IndexerInner>,
}

/// Assembles an [`Indexer`] from a registry, settings and backends.
pub struct IndexerBuilder {
    registry: TypeRegistry,
    settings: Settings,
    store: Option<Arc<dyn DocumentStore>>,
    kv: Option<Arc<dyn KvClient>>,
    clock: Option<Clock>,
}

impl IndexerBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use this store instead of an HTTP store at `settings.store.url`.
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Key-value service for distributed locks and cache.
    pub fn kv(mut self, kv: Arc<dyn KvClient>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Time source for signal statistics.
    pub fn clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Build the indexer and schedule an initial flush, so entries left in a
    /// shared cache by a previous process get persisted.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<Indexer, IndexerError> {
        let IndexerBuilder {
            registry,
            settings,
            store,
            kv,
            clock,
        } = self;
        settings.validate()?;

        if registry.instance_name() != settings.instance_name {
            warn!(
                registry = registry.instance_name(),
                settings = %settings.instance_name,
                "Registry and settings disagree on instance name"
            );
        }

        let store: Arc<dyn DocumentStore> = match store {
            Some(store) => store,
            None => Arc::new(
                HttpDocumentStore::new(&settings.store)
                    .map_err(|e| IndexerError::Config(e.to_string()))?,
            ),
        };

        let lock = match settings.locks.backend {
            BackendKind::Local => LockService::local(),
            BackendKind::Distributed => {
                let kv = kv.clone().ok_or_else(|| {
                    IndexerError::Config("distributed locks need a key-value client".to_string())
                })?;
                LockService::distributed(kv, &settings.locks)
            }
        };

        let backend: Arc<dyn CacheBackend> = match settings.cache.backend {
            BackendKind::Local => Arc::new(LocalCache::new()),
            BackendKind::Distributed => {
                let kv = kv.ok_or_else(|| {
                    IndexerError::Config("distributed cache needs a key-value client".to_string())
                })?;
                Arc::new(DistributedCache::new(kv, settings.cache_namespace()))
            }
        };

        let clock: Clock = match clock {
            Some(clock) => clock,
            None => Arc::new(Utc::now),
        };
        let inner = Arc::new_cyclic(|weak: &Weak<IndexerInner>| {
            let flusher: Weak<dyn AggregateFlusher> = weak.clone();
            let cache = AggregatorCache::new(backend, lock.clone(), &settings.cache, flusher);
            IndexerInner {
                registry: Arc::new(registry),
                store,
                lock,
                cache,
                clock,
            }
        });

        inner.cache.schedule_flush().await?;
        info!(
            instance = %settings.instance_name,
            locks = inner.lock.backend_name(),
            cache = inner.cache.backend_name(),
            "Indexer started"
        );
        Ok(Indexer { inner })
    }
}

impl Indexer {
    pub fn builder(registry: TypeRegistry) -> IndexerBuilder {
        IndexerBuilder {
            registry,
            settings: Settings::default(),
            store: None,
            kv: None,
            clock: None,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &AggregatorCache {
        &self.inner.cache
    }

    /// Create a document. Reports `EXISTS_ALREADY` when the id is taken.
    pub async fn add(&self, request: AddRequest) -> Result<OperationResult, IndexerError> {
        let config = self.inner.resolve_type(&request.type_name)?;
        self.inner
            .add_doc(AddCommand {
                config,
                doc: request.doc,
                id: request.id,
                filter: request.filter,
                existing: Prefetched::Fetch,
                lock: None,
            })
            .await
    }

    /// Replace a document. Fields of the stored document missing from the
    /// request are cleared.
    pub async fn update(&self, request: UpdateRequest) -> Result<OperationResult, IndexerError> {
        self.run_update(request, false).await
    }

    /// Merge the request's fields into a stored document.
    pub async fn partial_update(
        &self,
        request: UpdateRequest,
    ) -> Result<OperationResult, IndexerError> {
        self.run_update(request, true).await
    }

    async fn run_update(
        &self,
        request: UpdateRequest,
        partial: bool,
    ) -> Result<OperationResult, IndexerError> {
        let config = self.inner.resolve_type(&request.type_name)?;
        self.inner
            .update_doc(UpdateCommand {
                config,
                doc: request.doc,
                id: request.id,
                filter: request.filter,
                partial,
                signals: request.signals,
                existing: Prefetched::Fetch,
                lock: None,
            })
            .await
    }

    pub async fn remove(&self, request: RemoveRequest) -> Result<OperationResult, IndexerError> {
        let config = self.inner.resolve_type(&request.type_name)?;
        self.inner
            .remove_doc(RemoveCommand {
                config,
                id: request.id,
                existing: Prefetched::Fetch,
                lock: None,
            })
            .await
    }

    /// Add or update by the id the type computes. Lazy aggregate types merge
    /// into the aggregator cache instead of writing through.
    pub async fn upsert(&self, request: UpsertRequest) -> Result<OperationResult, IndexerError> {
        self.inner.upsert(request).await
    }

    /// Fold signals into a stored document and replicate them to its
    /// aggregates.
    pub async fn add_signal(&self, request: SignalRequest) -> Result<OperationResult, IndexerError> {
        self.inner.add_signal(request).await
    }

    /// Persist one cached aggregate and drop it from the cache.
    pub async fn flush_aggregate(&self, key: &str) -> Result<(), IndexerError> {
        self.inner.flush_key(key).await
    }

    /// Flush every pending aggregate now.
    pub async fn flush(&self) -> Result<FlushReport, IndexerError> {
        Ok(self.inner.cache.flush(false).await?)
    }

    pub async fn get(&self, type_name: &str, id: &str) -> Result<Option<Document>, IndexerError> {
        let config = self.inner.resolve_type(type_name)?;
        let id = require_id(Some(id))?;
        Ok(self.inner.store.get(doc_ref(&config, &id)).await?)
    }

    pub async fn get_fields(
        &self,
        type_name: &str,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<Document>, IndexerError> {
        let config = self.inner.resolve_type(type_name)?;
        let id = require_id(Some(id))?;
        Ok(self
            .inner
            .store
            .get_fields(doc_ref(&config, &id), fields)
            .await?)
    }

    /// Drain the aggregator cache, then release the lock backend.
    pub async fn shutdown(&self) -> Result<FlushReport, IndexerError> {
        let report = self.inner.cache.shutdown().await?;
        self.inner.lock.shutdown().await?;
        info!(flushed = report.flushed, failed = report.failed, "Indexer shut down");
        Ok(report)
    }
}

fn doc_ref<'a>(config: &'a TypeConfig, id: &'a str) -> DocRef<'a> {
    DocRef::new(&config.store_index, &config.name, id)
}

fn require_id(id: Option<&str>) -> Result<String, IndexerError> {
    id.filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            IndexerError::validation(
                ValidationCode::UndefinedId,
                "No ID has been specified or can be calculated",
            )
        })
}

/// Set `_weight` and `_lang` on `doc` from `source`.
fn decorate(config: &TypeConfig, doc: &mut Document, source: &Document) {
    let weight = round_to((config.weight_fn)(source).ln_1p(), 3);
    doc.insert("_weight".to_string(), Value::from(weight));
    doc.insert("_lang".to_string(), Value::from((config.lang_fn)(source)));
}

fn soft_failure(
    config: &TypeConfig,
    id: &str,
    operation: Operation,
    fail_code: FailCode,
) -> OperationResult {
    OperationResult::soft_failure(
        config.name.clone(),
        config.store_index.clone(),
        Some(id.to_string()),
        operation,
        fail_code,
    )
}

fn acknowledged(config: &TypeConfig, id: &str, ack: &WriteAck, operation: Operation) -> OperationResult {
    OperationResult {
        id: Some(id.to_string()),
        type_name: config.name.clone(),
        index: config.store_index.clone(),
        version: ack.version,
        status_code: ack.status_code,
        status: if ack.is_success() {
            Status::Success
        } else {
            Status::Fail
        },
        fail_code: (!ack.is_success()).then_some(FailCode::NotFound),
        operation,
    }
}

impl IndexerInner {
    pub(crate) fn resolve_type(&self, type_name: &str) -> Result<Arc<TypeConfig>, IndexerError> {
        if type_name.is_empty() {
            return Err(IndexerError::validation(
                ValidationCode::UndefinedType,
                "No type has been specified",
            ));
        }
        self.registry.get(type_name).ok_or_else(|| {
            IndexerError::validation(
                ValidationCode::UnrecognizedType,
                format!("Unrecognized type: {type_name}"),
            )
        })
    }

    pub(crate) async fn add_doc(&self, command: AddCommand) -> Result<OperationResult, IndexerError> {
        let AddCommand {
            config,
            doc,
            id,
            filter,
            existing,
            lock,
        } = command;

        let mut doc = match &config.transform {
            Some(transform) => transform(doc),
            None => doc,
        };
        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => require_id((config.id_fn)(&doc).as_deref())?,
        };

        let request_rejects = filter.as_ref().is_some_and(|f| !f(&doc, None, false));
        if request_rejects || !config.accepts(&doc, None, false) {
            debug!(doc_type = %config.name, id = %id, "Add skipped by filter");
            return Ok(soft_failure(&config, &id, Operation::Add, FailCode::Skip));
        }

        let source = doc.clone();
        decorate(&config, &mut doc, &source);

        let key = config.key(&id);
        let config_ref = config.as_ref();
        let id_ref = id.as_str();

        self.lock
            .using_lock_with(
                &key,
                lock.as_ref(),
                |_| async move {
                    let existing = match existing {
                        Prefetched::Known(existing) => existing,
                        Prefetched::Fetch => self.store.get(doc_ref(config_ref, id_ref)).await?,
                    };
                    if existing.is_some() {
                        return Ok(soft_failure(
                            config_ref,
                            id_ref,
                            Operation::Add,
                            FailCode::ExistsAlready,
                        ));
                    }

                    let ack = self.store.put(doc_ref(config_ref, id_ref), &doc).await?;
                    if ack.is_success() {
                        self.build_aggregates(config_ref, Some(&doc), None, false, None)
                            .await?;
                    }
                    Ok::<_, IndexerError>(acknowledged(config_ref, id_ref, &ack, Operation::Add))
                },
                |elapsed| {
                    info!(
                        doc_type = %config_ref.name,
                        id = %id_ref,
                        elapsed_ms = elapsed.as_millis(),
                        "Added document"
                    )
                },
            )
            .await
    }

    pub(crate) async fn update_doc(
        &self,
        command: UpdateCommand,
    ) -> Result<OperationResult, IndexerError> {
        let UpdateCommand {
            config,
            doc,
            id,
            filter,
            partial,
            signals,
            existing,
            lock,
        } = command;

        let operation = if partial {
            Operation::PartialUpdate
        } else {
            Operation::Update
        };
        let mut new_doc = match (&config.transform, partial) {
            (Some(transform), false) => transform(doc),
            _ => doc,
        };
        let id = match id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => require_id((config.id_fn)(&new_doc).as_deref())?,
        };

        let key = config.key(&id);
        let config_ref = &config;
        let id_ref = id.as_str();

        self.lock
            .using_lock_with(
                &key,
                lock.as_ref(),
                |handle| async move {
                    let existing = match existing {
                        Prefetched::Known(existing) => existing,
                        Prefetched::Fetch => self.store.get(doc_ref(config_ref, id_ref)).await?,
                    };
                    let Some(existing) = existing else {
                        return Ok(soft_failure(
                            config_ref,
                            id_ref,
                            operation,
                            FailCode::NotFound,
                        ));
                    };

                    if !partial {
                        for field in existing.keys() {
                            if !new_doc.contains_key(field) {
                                new_doc.insert(field.clone(), Value::Null);
                            }
                        }
                    }
                    let merged = merge_over(&existing, &new_doc);
                    decorate(config_ref, &mut new_doc, &merged);

                    let type_keeps = config_ref.accepts(&merged, Some(&existing), partial);
                    let request_keeps = filter
                        .as_ref()
                        .map_or(true, |f| f(&merged, Some(&existing), partial));
                    if !type_keeps {
                        debug!(doc_type = %config_ref.name, id = %id_ref, "Update rejected by type filter, removing");
                        return self
                            .remove_doc(RemoveCommand {
                                config: Arc::clone(config_ref),
                                id: id_ref.to_string(),
                                existing: Prefetched::Known(Some(existing)),
                                lock: Some(handle),
                            })
                            .await;
                    }
                    if !request_keeps {
                        return Ok(soft_failure(config_ref, id_ref, operation, FailCode::Skip));
                    }

                    let ack = self.store.update(doc_ref(config_ref, id_ref), &new_doc).await?;
                    if ack.is_success() {
                        self.build_aggregates(
                            config_ref,
                            Some(&new_doc),
                            Some(&existing),
                            partial,
                            signals.as_deref(),
                        )
                        .await?;
                    }
                    Ok::<_, IndexerError>(acknowledged(config_ref, id_ref, &ack, operation))
                },
                |elapsed| {
                    info!(
                        doc_type = %config_ref.name,
                        id = %id_ref,
                        partial,
                        elapsed_ms = elapsed.as_millis(),
                        "Updated document"
                    )
                },
            )
            .await
    }

    pub(crate) async fn remove_doc(
        &self,
        command: RemoveCommand,
    ) -> Result<OperationResult, IndexerError> {
        let RemoveCommand {
            config,
            id,
            existing,
            lock,
        } = command;
        let id = require_id(Some(id.as_str()))?;

        let key = config.key(&id);
        let config_ref = config.as_ref();
        let id_ref = id.as_str();

        self.lock
            .using_lock_with(
                &key,
                lock.as_ref(),
                |_| async move {
                    let existing = match existing {
                        Prefetched::Known(existing) => existing,
                        Prefetched::Fetch => self.store.get(doc_ref(config_ref, id_ref)).await?,
                    };
                    let Some(existing) = existing else {
                        return Ok(soft_failure(
                            config_ref,
                            id_ref,
                            Operation::Remove,
                            FailCode::NotFound,
                        ));
                    };

                    let ack = self.store.delete(doc_ref(config_ref, id_ref)).await?;
                    if ack.is_success() {
                        self.build_aggregates(config_ref, None, Some(&existing), false, None)
                            .await?;
                    }
                    Ok::<_, IndexerError>(acknowledged(config_ref, id_ref, &ack, Operation::Remove))
                },
                |elapsed| {
                    info!(
                        doc_type = %config_ref.name,
                        id = %id_ref,
                        elapsed_ms = elapsed.as_millis(),
                        "Removed document"
                    )
                },
            )
            .await
    }

    async fn upsert(&self, request: UpsertRequest) -> Result<OperationResult, IndexerError> {
        let config = self.resolve_type(&request.type_name)?;
        let UpsertRequest { doc, signals, .. } = request;
        let id = require_id((config.id_fn)(&doc).as_deref())?;

        if config.is_aggregate_mode() {
            return self.lazy_upsert(config, doc, id, signals).await;
        }

        let key = config.key(&id);
        let config_ref = &config;
        let id_ref = id.as_str();

        self.lock
            .using_lock(&key, None, |handle| async move {
                let existing = self.store.get(doc_ref(config_ref, id_ref)).await?;
                match existing {
                    Some(existing) => {
                        let mut doc = doc;
                        if let Some(signals) = &signals {
                            for field in STATS_FIELDS {
                                if let (false, Some(stats)) =
                                    (doc.contains_key(field), existing.get(field))
                                {
                                    doc.insert(field.to_string(), stats.clone());
                                }
                            }
                            aggregate_signals(&mut doc, signals, (self.clock)());
                        }
                        self.update_doc(UpdateCommand {
                            config: Arc::clone(config_ref),
                            doc,
                            id: Some(id_ref.to_string()),
                            filter: None,
                            partial: false,
                            signals,
                            existing: Prefetched::Known(Some(existing)),
                            lock: Some(handle),
                        })
                        .await
                    }
                    None => {
                        let mut doc = doc;
                        if let Some(signals) = &signals {
                            aggregate_signals(&mut doc, signals, (self.clock)());
                        }
                        self.add_doc(AddCommand {
                            config: Arc::clone(config_ref),
                            doc,
                            id: Some(id_ref.to_string()),
                            filter: None,
                            existing: Prefetched::Known(None),
                            lock: Some(handle),
                        })
                        .await
                    }
                }
            })
            .await
    }

    async fn add_signal(&self, request: SignalRequest) -> Result<OperationResult, IndexerError> {
        let config = self.resolve_type(&request.type_name)?;
        let id = require_id(Some(request.id.as_str()))?;
        if request.signals.is_empty() {
            return Err(IndexerError::validation(
                ValidationCode::UndefinedSignal,
                "No signal has been specified",
            ));
        }
        let signals: Vec<Signal> = request.signals;

        let key = config.key(&id);
        let config_ref = &config;
        let id_ref = id.as_str();

        self.lock
            .using_lock(&key, None, |handle| async move {
                let Some(existing) = self.store.get(doc_ref(config_ref, id_ref)).await? else {
                    return Err(IndexerError::validation(
                        ValidationCode::NotExists,
                        format!("{} does not exist", config_ref.key(id_ref)),
                    ));
                };

                let mut doc = existing.clone();
                aggregate_signals(&mut doc, &signals, (self.clock)());
                self.update_doc(UpdateCommand {
                    config: Arc::clone(config_ref),
                    doc,
                    id: Some(id_ref.to_string()),
                    filter: None,
                    partial: true,
                    signals: Some(signals),
                    existing: Prefetched::Known(Some(existing)),
                    lock: Some(handle),
                })
                .await
            })
            .await
    }

    /// Replay one cache entry against the store, then drop it from the
    /// cache. On failure the entry stays for the next flush.
    pub(crate) async fn flush_key(&self, key: &str) -> Result<(), IndexerError> {
        self.lock
            .using_lock_with(
                key,
                None,
                |handle| async move {
                    let Some(entry) = self.cache.retrieve(key).await? else {
                        self.cache.remove(key).await?;
                        return Ok(());
                    };
                    let config = self.resolve_type(&entry.type_name)?;

                    let result = if entry.op_type == OpType::Add {
                        self.add_doc(AddCommand {
                            config,
                            doc: entry.doc,
                            id: Some(entry.id),
                            filter: None,
                            existing: Prefetched::Fetch,
                            lock: Some(handle),
                        })
                        .await?
                    } else {
                        // The cached projection is the only baseline: fields
                        // outside it must not be nulled by the replay.
                        self.update_doc(UpdateCommand {
                            config,
                            doc: entry.doc,
                            id: Some(entry.id),
                            filter: None,
                            partial: false,
                            signals: None,
                            existing: Prefetched::Known(Some(entry.existing_doc)),
                            lock: Some(handle),
                        })
                        .await?
                    };
                    if !result.is_success() {
                        warn!(
                            key = %key,
                            status_code = result.status_code,
                            fail_code = ?result.fail_code,
                            "Aggregate replay was not applied"
                        );
                    }

                    self.cache.remove(key).await?;
                    Ok::<_, IndexerError>(())
                },
                |elapsed| {
                    debug!(
                        key = %key,
                        elapsed_ms = elapsed.as_millis(),
                        "Flushed aggregate"
                    )
                },
            )
            .await
    }
}

#[async_trait]
impl AggregateFlusher for IndexerInner {
    async fn flush_aggregate(&self, key: &str) -> anyhow::Result<()> {
        self.flush_key(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_store::MemoryDocumentStore;
    use indexer_types::{AggregateConfig, AggregatorsConfig, MeasureSpec, TimeUnit};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::builder("shop")
            .register(
                TypeConfig::new("product")
                    .with_filter(|doc, _, _| doc.get("hidden") != Some(&json!(true))),
            )
            .register(TypeConfig::new("tag"))
            .register(
                TypeConfig::new("visit")
                    .with_id_field("page")
                    .aggregate_mode(vec![MeasureSpec::sum("hits")], |_, visit| {
                        doc(json!({ "page": visit.get("page") }))
                    }),
            )
            .aggregators(
                "product",
                AggregatorsConfig::new(vec![MeasureSpec::count("count"), MeasureSpec::sum("views")])
                    .with_aggregate(AggregateConfig::new("tags", "tags", "tag", |_, tag| {
                        doc(json!({ "id": tag, "name": tag }))
                    })),
            )
            .build()
            .unwrap()
    }

    async fn indexer() -> (Indexer, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut settings = Settings::default();
        settings.instance_name = "shop".to_string();
        settings.cache.flush_timeout_ms = 60_000;
        let indexer = Indexer::builder(registry())
            .settings(settings)
            .store(store.clone())
            .build()
            .await
            .unwrap();
        (indexer, store)
    }

    fn tag(store: &MemoryDocumentStore, id: &str) -> Option<Document> {
        store.snapshot(DocRef::new("shop_store", "tag", id))
    }

    fn product(store: &MemoryDocumentStore, id: &str) -> Option<Document> {
        store.snapshot(DocRef::new("shop_store", "product", id))
    }

    #[tokio::test]
    async fn test_add_stores_decorated_document() {
        let (indexer, store) = indexer().await;
        let result = indexer
            .add(AddRequest::new("product", doc(json!({"id": "1", "title": "Lamp"}))))
            .await
            .unwrap();

        assert_eq!(result.status, Status::Success);
        assert_eq!(result.status_code, 201);
        assert_eq!(result.index, "shop_store");
        let stored = product(&store, "1").unwrap();
        assert_eq!(stored.get("_weight"), Some(&json!(0.693)));
        assert_eq!(stored.get("_lang"), Some(&json!("en")));
    }

    #[tokio::test]
    async fn test_add_existing_reports_exists_already() {
        let (indexer, _) = indexer().await;
        let request = AddRequest::new("product", doc(json!({"id": "1"})));
        indexer.add(request.clone()).await.unwrap();

        let result = indexer.add(request).await.unwrap();
        assert_eq!(result.status, Status::Fail);
        assert_eq!(result.status_code, 404);
        assert_eq!(result.fail_code, Some(FailCode::ExistsAlready));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (indexer, _) = indexer().await;

        let err = indexer
            .add(AddRequest::new("product", doc(json!({"title": "no id"}))))
            .await
            .unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::UndefinedId));

        let err = indexer
            .add(AddRequest::new("", doc(json!({"id": "1"}))))
            .await
            .unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::UndefinedType));

        let err = indexer
            .remove(RemoveRequest::new("widget", "1"))
            .await
            .unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::UnrecognizedType));

        let err = indexer
            .add_signal(SignalRequest::new("product", "1", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::UndefinedSignal));

        let err = indexer
            .add_signal(SignalRequest::new(
                "product",
                "missing",
                vec![Signal::in_period("view", TimeUnit::Day, 20160310)],
            ))
            .await
            .unwrap_err();
        assert_eq!(err.validation_code(), Some(ValidationCode::NotExists));
    }

    #[tokio::test]
    async fn test_filters_skip_add() {
        let (indexer, store) = indexer().await;

        let result = indexer
            .add(AddRequest::new("product", doc(json!({"id": "1", "hidden": true}))))
            .await
            .unwrap();
        assert_eq!(result.fail_code, Some(FailCode::Skip));

        let result = indexer
            .add(
                AddRequest::new("product", doc(json!({"id": "2"})))
                    .with_filter(|_, _, _| false),
            )
            .await
            .unwrap();
        assert_eq!(result.fail_code, Some(FailCode::Skip));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_full_update_clears_missing_fields() {
        let (indexer, store) = indexer().await;
        indexer
            .add(AddRequest::new("product", doc(json!({"id": "1", "title": "Lamp", "color": "red"}))))
            .await
            .unwrap();

        let result = indexer
            .update(UpdateRequest::new("product", doc(json!({"id": "1", "title": "Desk lamp"}))))
            .await
            .unwrap();
        assert_eq!(result.operation, Operation::Update);

        let stored = product(&store, "1").unwrap();
        assert_eq!(stored.get("title"), Some(&json!("Desk lamp")));
        assert_eq!(stored.get("color"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_fields() {
        let (indexer, store) = indexer().await;
        indexer
            .add(AddRequest::new("product", doc(json!({"id": "1", "title": "Lamp", "color": "red"}))))
            .await
            .unwrap();

        let result = indexer
            .partial_update(UpdateRequest::new("product", doc(json!({"color": "blue"}))).with_id("1"))
            .await
            .unwrap();
        assert_eq!(result.operation, Operation::PartialUpdate);

        let stored = product(&store, "1").unwrap();
        assert_eq!(stored.get("title"), Some(&json!("Lamp")));
        assert_eq!(stored.get("color"), Some(&json!("blue")));
    }

    #[tokio::test]
    async fn test_update_rejected_by_type_filter_removes() {
        let (indexer, store) = indexer().await;
        indexer
            .add(AddRequest::new("product", doc(json!({"id": "1"}))))
            .await
            .unwrap();

        let result = indexer
            .partial_update(UpdateRequest::new("product", doc(json!({"hidden": true}))).with_id("1"))
            .await
            .unwrap();
        assert_eq!(result.operation, Operation::Remove);
        assert_eq!(product(&store, "1"), None);
    }

    #[tokio::test]
    async fn test_update_and_remove_missing_report_not_found() {
        let (indexer, _) = indexer().await;

        let result = indexer
            .update(UpdateRequest::new("product", doc(json!({"id": "9"}))))
            .await
            .unwrap();
        assert_eq!(result.fail_code, Some(FailCode::NotFound));

        let result = indexer.remove(RemoveRequest::new("product", "9")).await.unwrap();
        assert_eq!(result.fail_code, Some(FailCode::NotFound));
        assert_eq!(result.operation, Operation::Remove);
    }

    #[tokio::test]
    async fn test_aggregates_cached_until_flush() {
        let (indexer, store) = indexer().await;
        indexer
            .add(AddRequest::new("product", doc(json!({"id": "1", "tags": ["x", "y"], "views": 2}))))
            .await
            .unwrap();

        assert_eq!(tag(&store, "x"), None);
        let entry = indexer.cache().retrieve("tag:x").await.unwrap().unwrap();
        assert_eq!(entry.op_type, OpType::Add);
        assert_eq!(entry.doc.get("count"), Some(&json!(1)));

        let report = indexer.flush().await.unwrap();
        assert_eq!(report.flushed, 2);
        assert!(indexer.cache().keys().await.unwrap().is_empty());

        let x = tag(&store, "x").unwrap();
        assert_eq!(x.get("count"), Some(&json!(1)));
        assert_eq!(x.get("views"), Some(&json!(2)));
        assert_eq!(x.get("name"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_flush_aggregate_missing_key_is_noop() {
        let (indexer, store) = indexer().await;
        indexer.flush_aggregate("tag:nothing").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_flush_aggregate_persists_lazy_entry() {
        let (indexer, store) = indexer().await;
        for hits in [1, 2] {
            indexer
                .upsert(UpsertRequest::new("visit", doc(json!({"page": "home", "hits": hits}))))
                .await
                .unwrap();
        }
        assert!(indexer.cache().retrieve("visit:home").await.unwrap().is_some());

        indexer.flush_aggregate("visit:home").await.unwrap();
        assert_eq!(indexer.cache().retrieve("visit:home").await.unwrap(), None);
        let visit = store
            .snapshot(DocRef::new("shop_store", "visit", "home"))
            .unwrap();
        assert_eq!(visit.get("hits"), Some(&json!(3)));
        assert_eq!(visit.get("page"), Some(&json!("home")));
    }

    #[tokio::test]
    async fn test_upsert_adds_then_updates() {
        let (indexer, store) = indexer().await;
        let first = indexer
            .upsert(UpsertRequest::new("product", doc(json!({"id": "1", "title": "Lamp"}))))
            .await
            .unwrap();
        assert_eq!(first.operation, Operation::Add);

        let second = indexer
            .upsert(UpsertRequest::new("product", doc(json!({"id": "1", "title": "Desk lamp"}))))
            .await
            .unwrap();
        assert_eq!(second.operation, Operation::Update);
        assert_eq!(
            product(&store, "1").unwrap().get("title"),
            Some(&json!("Desk lamp"))
        );
    }

    #[tokio::test]
    async fn test_distributed_backend_needs_kv() {
        let mut settings = Settings::default();
        settings.locks.backend = BackendKind::Distributed;
        let result = Indexer::builder(registry())
            .settings(settings)
            .store(Arc::new(MemoryDocumentStore::new()))
            .build()
            .await;
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }
}
