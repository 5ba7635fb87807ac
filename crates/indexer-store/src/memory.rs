//! In-process document store.
//!
//! Mirrors the HTTP store's observable behaviour: versions start at 1 and
//! increase on every write, partial updates merge objects recursively, and
//! writes against missing documents are acknowledged with 404.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use indexer_types::Document;
use serde_json::Value;
use tracing::trace;

use crate::{DocRef, DocumentStore, StoreError, WriteAck};

struct Stored {
    source: Document,
    version: i64,
}

/// [`DocumentStore`] kept in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    docs: DashMap<String, Stored>,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read without touching the read counter.
    pub fn snapshot(&self, doc: DocRef<'_>) -> Option<Document> {
        self.docs.get(&doc.path()).map(|s| s.source.clone())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Number of put/update/delete calls served.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of get/get_fields calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn ack(status_code: u16, version: Option<i64>, started: Instant) -> WriteAck {
        WriteAck {
            status_code,
            version,
            elapsed: started.elapsed(),
        }
    }
}

fn merge_into(target: &mut Document, partial: &Document) {
    for (key, value) in partial {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, doc: DocRef<'_>) -> Result<Option<Document>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot(doc))
    }

    async fn get_fields(
        &self,
        doc: DocRef<'_>,
        fields: &[&str],
    ) -> Result<Option<Document>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.get(&doc.path()).map(|stored| {
            fields
                .iter()
                .filter_map(|f| stored.source.get(*f).map(|v| (f.to_string(), v.clone())))
                .collect()
        }))
    }

    async fn put(&self, doc: DocRef<'_>, body: &Document) -> Result<WriteAck, StoreError> {
        let started = Instant::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut entry = self.docs.entry(doc.path()).or_insert_with(|| Stored {
            source: Document::new(),
            version: 0,
        });
        let status_code = if entry.version == 0 { 201 } else { 200 };
        entry.source = body.clone();
        entry.version += 1;
        let version = entry.version;
        drop(entry);

        trace!(path = %doc.path(), version, "PUT");
        Ok(Self::ack(status_code, Some(version), started))
    }

    async fn update(&self, doc: DocRef<'_>, partial: &Document) -> Result<WriteAck, StoreError> {
        let started = Instant::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.docs.get_mut(&doc.path()) {
            Some(mut stored) => {
                merge_into(&mut stored.source, partial);
                stored.version += 1;
                let version = stored.version;
                drop(stored);
                trace!(path = %doc.path(), version, "UPDATE");
                Ok(Self::ack(200, Some(version), started))
            }
            None => Ok(Self::ack(404, None, started)),
        }
    }

    async fn delete(&self, doc: DocRef<'_>) -> Result<WriteAck, StoreError> {
        let started = Instant::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        match self.docs.remove(&doc.path()) {
            Some((_, stored)) => Ok(Self::ack(200, Some(stored.version + 1), started)),
            None => Ok(Self::ack(404, None, started)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    const REF: DocRef<'static> = DocRef {
        index: "shop_store",
        type_name: "product",
        id: "1",
    };

    #[tokio::test]
    async fn test_put_get_versions() {
        let store = MemoryDocumentStore::new();
        let first = store.put(REF, &doc(json!({"a": 1}))).await.unwrap();
        assert_eq!((first.status_code, first.version), (201, Some(1)));

        let second = store.put(REF, &doc(json!({"a": 2}))).await.unwrap();
        assert_eq!((second.status_code, second.version), (200, Some(2)));
        assert_eq!(store.get(REF).await.unwrap(), Some(doc(json!({"a": 2}))));
    }

    #[tokio::test]
    async fn test_update_merges_recursively_and_nulls_overwrite() {
        let store = MemoryDocumentStore::new();
        store
            .put(REF, &doc(json!({"a": 1, "b": 2, "meta": {"x": 1, "y": 2}})))
            .await
            .unwrap();
        store
            .update(REF, &doc(json!({"b": null, "meta": {"y": 3}})))
            .await
            .unwrap();

        assert_eq!(
            store.get(REF).await.unwrap(),
            Some(doc(json!({"a": 1, "b": null, "meta": {"x": 1, "y": 3}})))
        );
    }

    #[tokio::test]
    async fn test_writes_to_missing_doc_are_404() {
        let store = MemoryDocumentStore::new();
        let ack = store.update(REF, &Document::new()).await.unwrap();
        assert_eq!(ack.status_code, 404);
        let ack = store.delete(REF).await.unwrap();
        assert_eq!(ack.status_code, 404);
    }

    #[tokio::test]
    async fn test_get_fields_projects_present_fields() {
        let store = MemoryDocumentStore::new();
        store
            .put(REF, &doc(json!({"count": 2, "views": 7, "title": "lamp"})))
            .await
            .unwrap();
        let projected = store
            .get_fields(REF, &["count", "views", "missing"])
            .await
            .unwrap();
        assert_eq!(projected, Some(doc(json!({"count": 2, "views": 7}))));
        assert_eq!(store.read_count(), 1);
    }
}
