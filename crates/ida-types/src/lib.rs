//! Foundation types for the identity allocation backend (IDA).
//!
//! This crate provides the numeric identity, label key, and persisted object
//! types shared by every other IDA crate.
//!
//! # Key Types
//!
//! - [`IdentityId`] -- Small numeric identity, rendered as the object name
//! - [`LabelKey`] -- Order-insensitive label set used as the allocation key
//! - [`AllocatorKey`] -- Trait the backend uses to move keys in and out of label maps
//! - [`IdentityObject`] -- The persisted identity: labels, security labels, node refs
//! - [`PartitionedLabels`] -- Selected / skipped split of a label set for one source

pub mod error;
pub mod id;
pub mod identity;
pub mod labels;

pub use error::TypeError;
pub use id::IdentityId;
pub use identity::{IdentityObject, IdentityStatus, ObjectMeta};
pub use labels::{
    restore_labels, sanitize_labels, AllocatorKey, LabelKey, LabelMap, PartitionedLabels,
    LABEL_SOURCE_K8S, LABEL_SOURCE_RESERVED, SOURCE_SEPARATOR,
};
