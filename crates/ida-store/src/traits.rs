use async_trait::async_trait;

use crate::context::Context;
use crate::error::StoreResult;
use crate::object::{Capabilities, ObjectList, StoredObject, Subresource};
use crate::patch::PatchBody;
use crate::watch::WatchStream;

/// A strongly consistent store of named JSON documents.
///
/// All implementations must satisfy these invariants:
/// - Every mutation is atomic for a single object.
/// - Every mutation is stamped with a resource version drawn from one
///   store-wide, strictly increasing counter.
/// - A watch opened from version `v` delivers every mutation with a version
///   greater than `v`, in version order, exactly once, or fails with
///   [`StoreError::Expired`](crate::StoreError::Expired) so the caller can relist.
/// - `update` and `update_status` with a non-zero resource version fail with
///   [`StoreError::Conflict`](crate::StoreError::Conflict) if the stored
///   version differs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Resource name used in logs (e.g. "identities").
    fn kind(&self) -> &str;

    /// Optional features this store offers.
    fn capabilities(&self) -> Capabilities;

    /// Create a new object. Fails with `AlreadyExists` on a name clash.
    async fn create(&self, ctx: &Context, object: StoredObject) -> StoreResult<StoredObject>;

    /// Read an object. Fails with `NotFound` if absent.
    async fn get(&self, ctx: &Context, name: &str) -> StoreResult<StoredObject>;

    /// Snapshot of every object plus the version it was taken at.
    async fn list(&self, ctx: &Context) -> StoreResult<ObjectList>;

    /// Apply a patch to the object or its status subresource.
    ///
    /// Fails with `Unsupported` when the store lacks the patch capability,
    /// and with `Conflict` when a JSON patch `test` operation fails.
    async fn patch(
        &self,
        ctx: &Context,
        name: &str,
        patch: &PatchBody,
        subresource: Subresource,
    ) -> StoreResult<StoredObject>;

    /// Replace the whole document, status included.
    async fn update(&self, ctx: &Context, object: StoredObject) -> StoreResult<StoredObject>;

    /// Replace only the `status` member. Fails with `Unsupported` when the
    /// store has no status subresource.
    async fn update_status(&self, ctx: &Context, object: StoredObject)
        -> StoreResult<StoredObject>;

    /// Delete an object. Fails with `NotFound` if absent.
    async fn delete(&self, ctx: &Context, name: &str) -> StoreResult<()>;

    /// Watch every mutation after `from_version`.
    async fn watch(&self, ctx: &Context, from_version: u64) -> StoreResult<WatchStream>;
}
