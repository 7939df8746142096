//! Storage-local error type, converted into `mi_core::Error::Storage` /
//! `Error::Crypto` at the `LocalStore` boundary with a short context string.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("envelope error: {0}")]
    Envelope(#[from] mi_crypto::EnvelopeError),

    #[error("record not found")]
    NotFound,

    #[error("corrupt log entry: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
