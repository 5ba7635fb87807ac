//! Error types for lock acquisition and release.

use thiserror::Error;

/// Lock failures. Every variant carries the key it concerns.
#[derive(Debug, Error)]
pub enum LockError {
    /// Retries exhausted while another owner held the key
    #[error("Timed out acquiring lock '{key}' after {attempts} attempts")]
    Timeout { key: String, attempts: u32 },

    /// The lock backend failed
    #[error("Lock backend error for '{key}': {message}")]
    Backend { key: String, message: String },
}

impl LockError {
    pub fn key(&self) -> &str {
        match self {
            LockError::Timeout { key, .. } | LockError::Backend { key, .. } => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LockError::Timeout {
            key: "tag:x".to_string(),
            attempts: 4,
        };
        assert_eq!(err.to_string(), "Timed out acquiring lock 'tag:x' after 4 attempts");
        assert_eq!(err.key(), "tag:x");
        assert!(matches!(err, LockError::Timeout { attempts: 4, .. }));
    }
}
