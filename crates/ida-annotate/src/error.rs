use ida_store::StoreError;
use thiserror::Error;

/// Errors produced while annotating nodes or managing controllers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnnotateError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("node {name:?} is malformed: {reason}")]
    InvalidNode { name: String, reason: String },

    #[error("controller {name:?} not found")]
    ControllerNotFound { name: String },

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type AnnotateResult<T> = Result<T, AnnotateError>;
