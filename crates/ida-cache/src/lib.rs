//! Local mirror of an object store kept current by a list/watch loop.
//!
//! - [`MirrorCache`] -- keyed snapshot with an optional secondary index
//! - [`Informer`] -- lists, marks the cache synced, then watches from the
//!   list version; relists on expiry or a closed stream
//! - [`EventHandler`] -- add / update / delete callbacks, with tombstones for
//!   deletions whose final state was never observed
//!
//! The cache is written only by the informer. Readers must tolerate it being
//! behind the store.

pub mod cache;
pub mod handler;
pub mod informer;

pub use cache::{Delta, Indexer, MirrorCache};
pub use handler::{DeleteEvent, EventHandler};
pub use informer::{wait_for_cache_sync, Informer, InformerConfig};
