/// Errors from object store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The named object does not exist.
    #[error("object not found: {name}")]
    NotFound { name: String },

    /// An object with this name already exists.
    #[error("object already exists: {name}")]
    AlreadyExists { name: String },

    /// An optimistic-concurrency guard failed (stale resource version or a
    /// failed patch `test` operation).
    #[error("conflict on {name}: {reason}")]
    Conflict { name: String, reason: String },

    /// The store does not offer this operation.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The request was rejected as malformed.
    #[error("invalid request for {name}: {reason}")]
    Invalid { name: String, reason: String },

    /// The requested watch position is no longer available; relist.
    #[error("watch expired: {0}")]
    Expired(String),

    /// The caller's context was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The caller's context deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Network or client failure talking to the store.
    #[error("transport error: {0}")]
    Transport(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }

    /// `true` when the caller gave up, as opposed to the store failing.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
