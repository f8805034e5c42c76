use thiserror::Error;

/// Failures surfaced by [`CoreService`](crate::CoreService)
#[derive(Error, Debug)]
pub enum CoreError {
    /// The engine could not be assembled from the given configuration
    #[error("Listing sync could not start: {0}")]
    InitializationFailed(String),

    #[error(transparent)]
    Sync(#[from] core_sync::SyncError),

    #[error("Listing store: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Runtime: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl CoreError {
    /// Text for the `message` field of an error status object
    pub fn message(&self) -> String {
        match self {
            CoreError::Sync(e) => e.message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
