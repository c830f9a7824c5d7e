//! Identity allocation backend.
//!
//! Maps label sets ([`AllocatorKey`](ida_types::AllocatorKey)) to numeric
//! identities stored as named objects in an [`ObjectStore`](ida_store::ObjectStore),
//! and records which nodes reference each identity in the object's status.
//!
//! # Components
//!
//! - [`IdentityBackend`] -- the [`Backend`] implementation
//! - [`WritePlan`] -- ordered optimistic write tiers (guarded patch, replace
//!   or remove patch, status update, full update); first success wins
//! - [`IdentityDispatcher`] -- turns cache events into [`CacheMutations`]
//!   callbacks, dropping objects that do not decode
//!
//! Reads go to a local mirror cache that only the watch loop started by
//! [`Backend::list_and_watch`] writes to, so they may lag the store.

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod lock;
pub mod traits;
pub mod write;

pub use backend::IdentityBackend;
pub use config::BackendConfig;
pub use dispatch::{decode_identity, Decoded, IdentityDispatcher};
pub use error::{BackendError, BackendResult};
pub use lock::NoopLock;
pub use traits::{Backend, CacheMutations, KvLocker};
pub use write::{TierAttempt, TierOutcome, WritePlan, WriteReport, WriteStrategy, WriteTarget, WriteTier};
