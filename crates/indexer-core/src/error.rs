//! Error types for indexer operations.
//!
//! Soft failures (document exists, not found, filtered out) are reported in
//! [`OperationResult`](indexer_types::OperationResult), not here.

use std::fmt;

use indexer_cache::CacheError;
use indexer_lock::LockError;
use indexer_store::StoreError;
use indexer_types::TypesError;
use thiserror::Error;

/// Machine-readable reason of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    UndefinedId,
    UndefinedType,
    UnrecognizedType,
    UndefinedSignal,
    NotExists,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::UndefinedId => "UNDEFINED_ID",
            ValidationCode::UndefinedType => "UNDEFINED_TYPE",
            ValidationCode::UnrecognizedType => "UNRECOGNIZED_TYPE",
            ValidationCode::UndefinedSignal => "UNDEFINED_SIGNAL",
            ValidationCode::NotExists => "NOT_EXISTS",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in indexer operations
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Request is malformed or refers to something that does not exist
    #[error("Validation error ({code}): {message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },

    /// Store, cache or other collaborator failed
    #[error("Internal service error: {message}")]
    InternalService {
        message: String,
        status_code: Option<u16>,
        details: Option<String>,
    },

    /// A per-key lock could not be obtained
    #[error("Lock acquisition error: {0}")]
    LockAcquisition(#[from] LockError),

    /// Invalid settings or type registry
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexerError {
    pub fn validation(code: ValidationCode, message: impl Into<String>) -> Self {
        IndexerError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        IndexerError::InternalService {
            message: message.into(),
            status_code: None,
            details: None,
        }
    }

    pub fn validation_code(&self) -> Option<ValidationCode> {
        match self {
            IndexerError::Validation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<StoreError> for IndexerError {
    fn from(err: StoreError) -> Self {
        IndexerError::InternalService {
            message: "Internal Service Error".to_string(),
            status_code: err.status_code(),
            details: Some(err.to_string()),
        }
    }
}

impl From<CacheError> for IndexerError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Lock(lock) => IndexerError::LockAcquisition(lock),
            other => IndexerError::InternalService {
                message: "Aggregator cache error".to_string(),
                status_code: None,
                details: Some(other.to_string()),
            },
        }
    }
}

impl From<TypesError> for IndexerError {
    fn from(err: TypesError) -> Self {
        IndexerError::Config(err.to_string())
    }
}
