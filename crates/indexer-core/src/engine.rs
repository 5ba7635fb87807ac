//! Aggregate maintenance: membership deltas, signal replication and lazy
//! aggregate upserts. Results land in the aggregator cache and reach the
//! store when the cache flushes.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use indexer_store::DocRef;
use indexer_types::{
    merge_over, CachedAggregateEntry, Document, MeasureSpec, OpType, Operation, OperationResult,
    Signal, Status, TypeConfig, STATS_FIELDS,
};
use tracing::{debug, error, trace};

use crate::error::IndexerError;
use crate::indexer::IndexerInner;
use crate::measures::{apply_measures, projection, MemberChange};
use crate::membership::{derive_aggregates, diff_memberships, AggregateRef};
use crate::stats::aggregate_signals;

impl IndexerInner {
    /// Propagate a source document change to every aggregate it touches.
    ///
    /// `new_doc` is `None` for removals, `old_doc` is `None` for additions.
    /// Aggregates are updated concurrently; the first failure is returned
    /// after all of them have finished.
    pub(crate) async fn build_aggregates(
        &self,
        source: &TypeConfig,
        new_doc: Option<&Document>,
        old_doc: Option<&Document>,
        partial: bool,
        signals: Option<&[Signal]>,
    ) -> Result<(), IndexerError> {
        let Some(aggregators) = self.registry.aggregators(&source.name) else {
            return Ok(());
        };
        let new_doc = new_doc.filter(|doc| aggregators.accepts(doc, old_doc, partial));
        if new_doc.is_none() && old_doc.is_none() {
            return Ok(());
        }
        let partial = partial && new_doc.is_some();

        let mut tasks: Vec<BoxFuture<'_, Result<(), IndexerError>>> = Vec::new();
        for aggregate in &aggregators.aggregates {
            let aggregate_type = self.resolve_type(&aggregate.index_type)?;
            let measures = aggregators.measures_for(aggregate);

            let new_refs = derive_aggregates(aggregate, &aggregate_type, new_doc);
            let old_refs = derive_aggregates(aggregate, &aggregate_type, old_doc);
            let diff = diff_memberships(&new_refs, &old_refs, partial);
            trace!(
                source = %source.name,
                aggregate = %aggregate.name,
                added = diff.added.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "Membership diff"
            );

            let deltas = [
                (OpType::Add, diff.added),
                (OpType::Remove, diff.removed),
                (OpType::Update, diff.updated),
            ];
            for (op, refs) in deltas {
                for aggregate_ref in refs {
                    let change = MemberChange::new(op, new_doc, old_doc).partial(partial);
                    tasks.push(
                        self.apply_member_change(
                            Arc::clone(&aggregate_type),
                            measures,
                            aggregate_ref,
                            change,
                        )
                        .boxed(),
                    );
                }
            }

            if let Some(signals) = signals {
                for aggregate_ref in new_refs {
                    tasks.push(
                        self.replicate_signals(Arc::clone(&aggregate_type), aggregate_ref, signals)
                            .boxed(),
                    );
                }
            }
        }

        join_all(tasks).await.into_iter().collect::<Result<Vec<()>, _>>()?;
        Ok(())
    }

    /// Fold one member change into the cached state of one aggregate.
    async fn apply_member_change(
        &self,
        aggregate_type: Arc<TypeConfig>,
        measures: &[MeasureSpec],
        aggregate: AggregateRef,
        change: MemberChange<'_>,
    ) -> Result<(), IndexerError> {
        let key = aggregate_type.key(&aggregate.id);
        let key_ref = key.as_str();
        let aggregate_type = aggregate_type.as_ref();

        self.lock
            .using_lock(key_ref, None, |_| async move {
                let fields = projection(measures);
                let current = self
                    .current_aggregate(aggregate_type, &aggregate.id, &fields)
                    .await?;

                let (existing, replay_op, change) = match current {
                    Some((doc, replay_op)) => (doc, replay_op, change),
                    None if change.op == OpType::Remove => {
                        trace!(key = %key_ref, "Aggregate already gone, nothing to remove");
                        return Ok(());
                    }
                    None => (
                        Document::new(),
                        OpType::Add,
                        MemberChange {
                            op: OpType::Add,
                            ..change
                        },
                    ),
                };

                let mut target = merge_over(&existing, &aggregate.doc);
                apply_measures(measures, &existing, &mut target, &change, change.op);

                let entry = CachedAggregateEntry::new(
                    aggregate_type.name.clone(),
                    aggregate.id.clone(),
                    replay_op,
                    target,
                    existing,
                );
                self.cache.store(key_ref, &entry).await?;
                Ok::<_, IndexerError>(())
            })
            .await
    }

    /// Fold signals into the stats of an aggregate the source belongs to.
    async fn replicate_signals(
        &self,
        aggregate_type: Arc<TypeConfig>,
        aggregate: AggregateRef,
        signals: &[Signal],
    ) -> Result<(), IndexerError> {
        let key = aggregate_type.key(&aggregate.id);
        let key_ref = key.as_str();
        let aggregate_type = aggregate_type.as_ref();

        self.lock
            .using_lock(key_ref, None, |_| async move {
                let current = self
                    .current_aggregate(aggregate_type, &aggregate.id, &STATS_FIELDS)
                    .await?;
                let Some((existing, replay_op)) = current else {
                    error!(key = %key_ref, "No aggregate to replicate signals to");
                    return Ok(());
                };

                let mut target = merge_over(&existing, &aggregate.doc);
                aggregate_signals(&mut target, signals, (self.clock)());

                let entry = CachedAggregateEntry::new(
                    aggregate_type.name.clone(),
                    aggregate.id.clone(),
                    replay_op,
                    target,
                    existing,
                );
                self.cache.store(key_ref, &entry).await?;
                Ok::<_, IndexerError>(())
            })
            .await
    }

    /// Cached state of an aggregate, or the projection of `fields` from the
    /// store. Stored aggregates replay as updates.
    async fn current_aggregate(
        &self,
        aggregate_type: &TypeConfig,
        id: &str,
        fields: &[&str],
    ) -> Result<Option<(Document, OpType)>, IndexerError> {
        let key = aggregate_type.key(id);
        if let Some(entry) = self.cache.retrieve(&key).await? {
            return Ok(Some((entry.doc, entry.op_type)));
        }
        let doc_ref = DocRef::new(&aggregate_type.store_index, &aggregate_type.name, id);
        let stored = self.store.get_fields(doc_ref, fields).await?;
        if stored.is_some() {
            debug!(key = %key, "Seeded aggregate from store");
        }
        Ok(stored.map(|doc| (doc, OpType::Update)))
    }

    /// Merge a document into a lazily aggregated type through the cache.
    pub(crate) async fn lazy_upsert(
        &self,
        config: Arc<TypeConfig>,
        doc: Document,
        id: String,
        signals: Option<Vec<Signal>>,
    ) -> Result<OperationResult, IndexerError> {
        self.cache.ensure_flush_complete().await;

        let key = config.key(&id);
        let key_ref = key.as_str();
        let config_ref = config.as_ref();
        let id_ref = id.as_str();

        self.lock
            .using_lock(key_ref, None, |_| async move {
                let mut fields = projection(&config_ref.measures);
                if signals.is_some() {
                    fields.extend(STATS_FIELDS);
                }
                let current = self.current_aggregate(config_ref, id_ref, &fields).await?;
                let (existing, replay_op) = match current {
                    Some((existing, replay_op)) => (Some(existing), replay_op),
                    None => (None, OpType::Add),
                };

                let built = match &config_ref.aggregate_builder {
                    Some(builder) => builder(existing.as_ref(), &doc),
                    None => doc.clone(),
                };
                let existing = existing.unwrap_or_default();
                let mut target = merge_over(&existing, &built);
                if let Some(signals) = &signals {
                    aggregate_signals(&mut target, signals, (self.clock)());
                }
                let change = MemberChange::new(OpType::Add, Some(&doc), None);
                apply_measures(&config_ref.measures, &existing, &mut target, &change, replay_op);

                let entry = CachedAggregateEntry::new(
                    config_ref.name.clone(),
                    id_ref.to_string(),
                    replay_op,
                    target,
                    existing,
                );
                self.cache.store(key_ref, &entry).await?;

                Ok::<_, IndexerError>(OperationResult {
                    id: Some(id_ref.to_string()),
                    type_name: config_ref.name.clone(),
                    index: config_ref.store_index.clone(),
                    version: None,
                    status_code: 200,
                    status: Status::Success,
                    fail_code: None,
                    operation: Operation::LazyAggregate,
                })
            })
            .await
    }
}
