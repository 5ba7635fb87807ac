//! Error types for configuration and type registration.

use thiserror::Error;

/// Errors raised while loading settings or building the type registry.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A type was registered twice
    #[error("Duplicate type: {0}")]
    DuplicateType(String),

    /// A referenced type is not registered
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
