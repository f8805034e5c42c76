use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

/// Outcome classes of a failed remote fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Source reported errors: {0}")]
    SourceReported(String),

    #[error("Source returned an empty result set")]
    Empty,

    #[error("Undecodable response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Whether repeating the same request may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_) | FetchError::Empty)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Preflight failed: {0}")]
    Preflight(String),

    #[error("Missing parameter '{parameter}' for action {action}")]
    MissingParameter { action: String, parameter: String },

    #[error("Invalid parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Invalid run status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SyncError {
    /// Message placed in the `{status: "error", message}` object
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the caller may simply invoke the same phase again later
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Preflight(_) => true,
            SyncError::Fetch(e) => e.is_retryable(),
            SyncError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SyncError::Preflight("busy".into()).is_retryable());
        assert!(SyncError::Fetch(FetchError::Transport("reset".into())).is_retryable());
        assert!(!SyncError::Fetch(FetchError::SourceReported("bad login".into())).is_retryable());
        assert!(!SyncError::UnknownAction("explode".into()).is_retryable());
    }

    #[test]
    fn test_message_includes_parameter() {
        let err = SyncError::MissingParameter {
            action: "import_single".into(),
            parameter: "listing_id".into(),
        };
        assert_eq!(
            err.message(),
            "Missing parameter 'listing_id' for action import_single"
        );
    }
}
