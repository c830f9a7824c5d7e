use ida_store::StoreError;
use ida_types::{IdentityId, TypeError};
use thiserror::Error;

/// Errors produced by the identity backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("identity does not exist: {key}")]
    NotFound { key: String },

    #[error("identity {name} already exists")]
    AlreadyExists { name: String },

    #[error("write conflict on {name}: {reason}")]
    Conflict { name: String, reason: String },

    #[error("store does not support {0}")]
    Unsupported(String),

    #[error("store is not available yet")]
    StoreUnavailable,

    #[error("invalid object {name:?}: {reason}")]
    InvalidObject { name: String, reason: String },

    #[error("unable to release identity {key}: identity is unused")]
    IdentityUnused { key: String },

    #[error("unable to recreate missing identity {key} -> {id}: {source}")]
    RecreateFailed {
        key: String,
        id: IdentityId,
        #[source]
        source: Box<BackendError>,
    },

    #[error("unable to parse identity name {name:?}: {reason}")]
    InvalidId { name: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<StoreError> for BackendError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { name } => Self::NotFound { key: name },
            StoreError::AlreadyExists { name } => Self::AlreadyExists { name },
            StoreError::Conflict { name, reason } => Self::Conflict { name, reason },
            StoreError::Unsupported(what) => Self::Unsupported(what),
            StoreError::Invalid { name, reason } => Self::InvalidObject { name, reason },
            StoreError::Cancelled => Self::Cancelled,
            StoreError::DeadlineExceeded => Self::DeadlineExceeded,
            StoreError::Expired(msg) | StoreError::Transport(msg) | StoreError::Serialization(msg) => {
                Self::Transport(msg)
            }
        }
    }
}

impl From<TypeError> for BackendError {
    fn from(err: TypeError) -> Self {
        match err {
            TypeError::InvalidId { value, reason } => Self::InvalidId {
                name: value,
                reason,
            },
            TypeError::Decode { name, reason } => Self::InvalidObject { name, reason },
            TypeError::Serialization(reason) => Self::InvalidObject {
                name: String::new(),
                reason,
            },
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_backend_taxonomy() {
        let err: BackendError = StoreError::Conflict {
            name: "5".into(),
            reason: "stale".into(),
        }
        .into();
        assert!(err.is_conflict());

        let err: BackendError = StoreError::Expired("gone".into()).into();
        assert!(matches!(err, BackendError::Transport(_)));

        let err: BackendError = StoreError::Cancelled.into();
        assert!(matches!(err, BackendError::Cancelled));
    }

    #[test]
    fn recreate_failure_keeps_source() {
        let err = BackendError::RecreateFailed {
            key: "app=web;".into(),
            id: IdentityId::new(7),
            source: Box::new(BackendError::AlreadyExists { name: "7".into() }),
        };
        let msg = err.to_string();
        assert!(msg.contains("app=web;"));
        assert!(msg.contains("7 already exists"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn unused_message() {
        let err = BackendError::IdentityUnused { key: "a=b;".into() };
        assert!(err.to_string().ends_with("identity is unused"));
    }
}
