//! Operation kinds, statuses and soft-failure codes.

use serde::{Deserialize, Serialize};

/// Direction of a change to a source document or an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpType {
    Add,
    Update,
    Remove,
}

impl OpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpType::Add => "ADD",
            OpType::Update => "UPDATE",
            OpType::Remove => "REMOVE",
        }
    }
}

impl std::fmt::Display for OpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The façade operation that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Add,
    Update,
    PartialUpdate,
    Remove,
    Get,
    /// Deferred write accepted into the aggregator cache.
    LazyAggregate,
}

/// Outcome of a façade operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Fail,
}

/// Reason for a soft failure. Soft failures are results, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailCode {
    /// `add` found a document already stored under the id
    ExistsAlready,
    /// `update`/`remove` found no document under the id
    NotFound,
    /// A filter rejected the document
    Skip,
}
