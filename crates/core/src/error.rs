//! Adapter error taxonomy and integer code mapping

use thiserror::Error;
use vecbridge_engine::ErrorType;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// A required handle, buffer or argument was missing or empty
    #[error("Null argument: {0}")]
    NullArgument(&'static str),

    #[error("Unsupported index kind: {0}")]
    UnsupportedIndexKind(String),

    #[error("Engine error: {0}")]
    Engine(#[from] vecbridge_engine::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    /// Integer code reported across the C boundary; never 0.
    ///
    /// Engine errors forward the engine's own code unchanged. `NullArgument`
    /// shares the engine's unknown-error code so existing callers see the same
    /// value as before.
    pub fn code(&self) -> i32 {
        match self {
            AdapterError::NullArgument(_) => ErrorType::UnknownError.code(),
            AdapterError::UnsupportedIndexKind(_) => ErrorType::UnsupportedIndex.code(),
            AdapterError::Engine(e) => e.code(),
            AdapterError::Io(_) => ErrorType::ReadError.code(),
        }
    }

    /// Engine error category, when the failure came from the engine
    pub fn engine_kind(&self) -> Option<ErrorType> {
        match self {
            AdapterError::Engine(e) => Some(e.kind),
            _ => None,
        }
    }
}
