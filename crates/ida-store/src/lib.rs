//! Object store contract for the identity allocation backend.
//!
//! The backend treats the object store as a black box offering single-object
//! atomic operations on named JSON documents, stamped with a store-wide
//! generation counter (the resource version), plus a watch stream of every
//! mutation in resource-version order.
//!
//! # Operations
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - create / get / list / delete
//! - patch (JSON patch or merge patch, main object or status subresource)
//! - update / update-status with optimistic concurrency on the resource version
//! - watch from a resource version
//!
//! Stores advertise optional features through [`Capabilities`]; callers are
//! expected to degrade gracefully when a capability is missing.
//!
//! # Backends
//!
//! - [`InMemoryObjectStore`] -- `BTreeMap`-based store with bounded watch
//!   history, capability toggles, and fault injection for tests
//!
//! Every call takes a [`Context`]; cancelling it or passing its deadline
//! aborts the call with [`StoreError::Cancelled`] or
//! [`StoreError::DeadlineExceeded`].

pub mod context;
pub mod error;
pub mod memory;
pub mod object;
pub mod patch;
pub mod traits;
pub mod watch;

pub use context::Context;
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryObjectStore, StoreConfig, StoreOp};
pub use object::{Capabilities, ObjectList, StoredObject, Subresource};
pub use patch::{
    apply_json_patch, apply_merge_patch, escape_segment, JsonPatch, PatchBody, PatchError,
    PatchOp,
};
pub use traits::ObjectStore;
pub use watch::{WatchEvent, WatchEventKind, WatchStream};
