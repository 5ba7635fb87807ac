//! Error types for document store operations.

use thiserror::Error;

/// Errors returned by a [`DocumentStore`](crate::DocumentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not build the client
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure before a response arrived
    #[error("Request error: {0}")]
    Request(String),

    /// The store answered with a non-OK status
    #[error("Store returned status {status_code}: {details}")]
    Status { status_code: u16, details: String },

    /// Response body could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            StoreError::Status { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Request(err.to_string())
    }
}
