//! Centralized error taxonomy for the mi-e2ee-core client.
//!
//! Low-level errors from `mi-crypto`, `mi-transport`, and `mi-store` are
//! wrapped at the component boundary with a short context string; the
//! `Facade` surfaces only this taxonomy to the host.

/// Which identity a pending-trust error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustTarget {
    Server,
    Peer,
}

impl std::fmt::Display for TrustTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustTarget::Server => write!(f, "server"),
            TrustTarget::Peer => write!(f, "peer"),
        }
    }
}

/// Core error type used across all `mi-e2ee-core` crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("client not initialized")]
    NotInitialized,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("{0} trust must be resolved first")]
    TrustRequired(TrustTarget),

    #[error("SAS input does not match pending trust")]
    SasMismatch,

    #[error("invalid argument: {field}")]
    InvalidArgument { field: String },

    #[error("busy: {0}")]
    Busy(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("crypto error")]
    Crypto,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("client is shutting down")]
    Shutdown,
}

impl Error {
    pub fn invalid_argument(field: impl Into<String>) -> Self {
        Error::InvalidArgument {
            field: field.into(),
        }
    }

    /// Non-retryable classification per §4.3: these protocol errors must not
    /// be enqueued into `PendingOutgoing` and instead fail the send
    /// immediately with `Failed` status.
    pub fn is_non_retryable_protocol(message: &str) -> bool {
        const NON_RETRYABLE: &[&str] = &[
            "not friends",
            "recipient not found",
            "invalid recipient",
            "recipient empty",
            "payload too large",
            "payload empty",
            "peer empty",
            "not in group",
        ];
        NON_RETRYABLE.iter().any(|needle| message.contains(needle))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
