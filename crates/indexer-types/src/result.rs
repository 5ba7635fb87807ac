//! Result of a façade operation.

use serde::{Deserialize, Serialize};

use crate::op::{FailCode, Operation, Status};

/// What `add`/`update`/`remove`/`upsert` report back.
///
/// Soft failures (`EXISTS_ALREADY`, `NOT_FOUND`, `SKIP`) are returned here
/// with `status == Fail` and status code 404 rather than as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    pub index: String,
    #[serde(default)]
    pub version: Option<i64>,
    pub status_code: u16,
    pub status: Status,
    #[serde(default)]
    pub fail_code: Option<FailCode>,
    pub operation: Operation,
}

impl OperationResult {
    /// A soft failure for the given operation.
    pub fn soft_failure(
        type_name: impl Into<String>,
        index: impl Into<String>,
        id: Option<String>,
        operation: Operation,
        fail_code: FailCode,
    ) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            index: index.into(),
            version: None,
            status_code: 404,
            status: Status::Fail,
            fail_code: Some(fail_code),
            operation,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
