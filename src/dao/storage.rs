use std::error::Error;
use thiserror::Error;

/// Result alias for collaborator operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by external collaborators regardless of the backend behind them.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed while serving the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable context.
        message: String,
        /// Underlying backend failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend answered with data the coordinator cannot use.
    #[error("invalid data from storage: {0}")]
    InvalidData(String),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
