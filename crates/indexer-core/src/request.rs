//! Requests accepted by the [`Indexer`](crate::Indexer) façade.

use std::fmt;
use std::sync::Arc;

use indexer_lock::LockHandle;
use indexer_types::{DocFilter, Document, Signal, TypeConfig};

/// Create a document that must not exist yet.
#[derive(Clone)]
pub struct AddRequest {
    pub type_name: String,
    pub doc: Document,
    /// Overrides the id computed by the type.
    pub id: Option<String>,
    /// Per-request filter, checked before the type filter.
    pub filter: Option<DocFilter>,
}

impl AddRequest {
    pub fn new(type_name: impl Into<String>, doc: Document) -> Self {
        Self {
            type_name: type_name.into(),
            doc,
            id: None,
            filter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_filter(
        mut self,
        f: impl Fn(&Document, Option<&Document>, bool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for AddRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddRequest")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

/// Replace (full) or merge into (partial) an existing document.
#[derive(Clone)]
pub struct UpdateRequest {
    pub type_name: String,
    pub doc: Document,
    pub id: Option<String>,
    pub filter: Option<DocFilter>,
    /// Signals replicated onto the document's aggregates.
    pub signals: Option<Vec<Signal>>,
}

impl UpdateRequest {
    pub fn new(type_name: impl Into<String>, doc: Document) -> Self {
        Self {
            type_name: type_name.into(),
            doc,
            id: None,
            filter: None,
            signals: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_filter(
        mut self,
        f: impl Fn(&Document, Option<&Document>, bool) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(f));
        self
    }

    pub fn with_signals(mut self, signals: Vec<Signal>) -> Self {
        self.signals = Some(signals);
        self
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .field("filter", &self.filter.is_some())
            .field("signals", &self.signals)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RemoveRequest {
    pub type_name: String,
    pub id: String,
}

impl RemoveRequest {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

/// Add or update by computed id. Lazy aggregate types go through the cache.
#[derive(Debug, Clone)]
pub struct UpsertRequest {
    pub type_name: String,
    pub doc: Document,
    pub signals: Option<Vec<Signal>>,
}

impl UpsertRequest {
    pub fn new(type_name: impl Into<String>, doc: Document) -> Self {
        Self {
            type_name: type_name.into(),
            doc,
            signals: None,
        }
    }

    pub fn with_signals(mut self, signals: Vec<Signal>) -> Self {
        self.signals = Some(signals);
        self
    }
}

/// Fold signals into a stored document and replicate them to its aggregates.
#[derive(Debug, Clone)]
pub struct SignalRequest {
    pub type_name: String,
    pub id: String,
    pub signals: Vec<Signal>,
}

impl SignalRequest {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>, signals: Vec<Signal>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            signals,
        }
    }
}

/// What the caller already knows about the stored document.
#[derive(Debug, Clone, Default)]
pub(crate) enum Prefetched {
    /// Read it from the store.
    #[default]
    Fetch,
    /// Already read; `None` means it does not exist.
    Known(Option<Document>),
}

pub(crate) struct AddCommand {
    pub config: Arc<TypeConfig>,
    pub doc: Document,
    pub id: Option<String>,
    pub filter: Option<DocFilter>,
    pub existing: Prefetched,
    pub lock: Option<LockHandle>,
}

pub(crate) struct UpdateCommand {
    pub config: Arc<TypeConfig>,
    pub doc: Document,
    pub id: Option<String>,
    pub filter: Option<DocFilter>,
    pub partial: bool,
    pub signals: Option<Vec<Signal>>,
    pub existing: Prefetched,
    pub lock: Option<LockHandle>,
}

pub(crate) struct RemoveCommand {
    pub config: Arc<TypeConfig>,
    pub id: String,
    pub existing: Prefetched,
    pub lock: Option<LockHandle>,
}
