//! Pending aggregate state held by the aggregator cache.

use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::op::OpType;

/// A dirty aggregate awaiting flush to the document store.
///
/// `op_type` is the operation that will replay the entry: `Add` when the
/// aggregate did not exist in the store when first touched, `Update`
/// otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedAggregateEntry {
    /// Merged aggregate as it should be persisted.
    pub doc: Document,

    /// State the last merge started from.
    #[serde(default)]
    pub existing_doc: Document,

    pub op_type: OpType,

    pub id: String,

    /// Registered type name of the aggregate.
    #[serde(rename = "type")]
    pub type_name: String,
}

impl CachedAggregateEntry {
    pub fn new(
        type_name: impl Into<String>,
        id: impl Into<String>,
        op_type: OpType,
        doc: Document,
        existing_doc: Document,
    ) -> Self {
        Self {
            doc,
            existing_doc,
            op_type,
            id: id.into(),
            type_name: type_name.into(),
        }
    }

    /// Cache key under which this entry is stored.
    pub fn key(&self) -> String {
        format!("{}:{}", self.type_name, self.id)
    }
}
