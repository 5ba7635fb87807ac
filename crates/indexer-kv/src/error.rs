//! Error types for key-value operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvError {
    /// Connection or transport failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The service rejected the command
    #[error("Command error: {0}")]
    Command(String),

    /// The client was shut down
    #[error("Client is shut down")]
    Closed,
}
