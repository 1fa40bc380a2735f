use thiserror::Error;

/// Errors surfaced by a shared store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("wrong value type at key {key}")]
    TypeMismatch { key: String },

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Shorthand result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
