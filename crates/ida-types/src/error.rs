use thiserror::Error;

/// Errors produced by type operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid identity id {value:?}: {reason}")]
    InvalidId { value: String, reason: String },

    #[error("cannot decode identity object {name:?}: {reason}")]
    Decode { name: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}
