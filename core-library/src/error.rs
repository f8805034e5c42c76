use thiserror::Error;

/// Failures of the local listing store
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Listing store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    /// Looked-up row does not exist
    #[error("No {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// A value was rejected before reaching the database
    #[error("Invalid {field}: {message}")]
    InvalidInput { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, LibraryError>;
