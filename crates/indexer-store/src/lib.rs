//! # indexer-store
//!
//! Client side of the external document store.
//!
//! The engine talks to the store through [`DocumentStore`]: fetch by id,
//! fetch a field projection, create, partially update and delete. Documents
//! are addressed as `{index}/{type}/{id}`.
//!
//! Implementations:
//! - [`HttpDocumentStore`]: JSON over HTTP (`GET`, `PUT`, `POST .../_update`, `DELETE`)
//! - [`MemoryDocumentStore`]: in-process, for tests and embedding

pub mod error;
pub mod http;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use indexer_types::Document;

pub use error::StoreError;
pub use http::HttpDocumentStore;
pub use memory::MemoryDocumentStore;

/// Address of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocRef<'a> {
    pub index: &'a str,
    pub type_name: &'a str,
    pub id: &'a str,
}

impl<'a> DocRef<'a> {
    pub fn new(index: &'a str, type_name: &'a str, id: &'a str) -> Self {
        Self {
            index,
            type_name,
            id,
        }
    }

    /// `{index}/{type}/{id}`
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.index, self.type_name, self.id)
    }
}

/// Store acknowledgement of a write.
///
/// Status 404 is acknowledged rather than raised so callers can report it as
/// a soft failure.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    pub status_code: u16,
    pub version: Option<i64>,
    pub elapsed: Duration,
}

impl WriteAck {
    pub fn is_success(&self) -> bool {
        self.status_code < 400
    }
}

/// Operations the indexer needs from a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document's source, or `None` when it does not exist.
    async fn get(&self, doc: DocRef<'_>) -> Result<Option<Document>, StoreError>;

    /// Fetch only `fields` of a document, or `None` when it does not exist.
    async fn get_fields(
        &self,
        doc: DocRef<'_>,
        fields: &[&str],
    ) -> Result<Option<Document>, StoreError>;

    /// Create or replace a document.
    async fn put(&self, doc: DocRef<'_>, body: &Document) -> Result<WriteAck, StoreError>;

    /// Merge `partial` into an existing document. Null values overwrite.
    async fn update(&self, doc: DocRef<'_>, partial: &Document) -> Result<WriteAck, StoreError>;

    async fn delete(&self, doc: DocRef<'_>) -> Result<WriteAck, StoreError>;
}
