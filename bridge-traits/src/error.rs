//! Error type shared by every host capability

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// The host cannot provide this capability at all
    #[error("Host capability unavailable: {0}")]
    NotAvailable(String),

    /// The capability exists but this call failed
    #[error("Host operation failed: {0}")]
    OperationFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    /// The settings database rejected a statement
    #[error("Settings database: {0}")]
    DatabaseError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the same call may succeed if simply repeated
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Timeout(_) | BridgeError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
