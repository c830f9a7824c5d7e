use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ida_store::Context;
use ida_types::{AllocatorKey, IdentityId};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::BackendResult;

/// A lock handed out by [`Backend::lock`].
#[async_trait]
pub trait KvLocker: Send + Sync {
    async fn unlock(&self, ctx: &Context) -> BackendResult<()>;

    /// Store-specific value identifying the lock, if any.
    fn comparator(&self) -> Option<Value>;
}

/// Callbacks fired as the backend's cache learns about identities.
pub trait CacheMutations<K>: Send + Sync {
    /// The initial listing is complete. Fires at most once per
    /// [`Backend::list_and_watch`] call.
    fn on_list_done(&self);

    fn on_add(&self, id: IdentityId, key: K);

    fn on_modify(&self, id: IdentityId, key: K);

    fn on_delete(&self, id: IdentityId, key: K);
}

/// Storage contract the generic allocator layer drives.
#[async_trait]
pub trait Backend: Send + Sync {
    type Key: AllocatorKey;

    /// Remove every key. Backends that never delete treat this as a no-op.
    async fn delete_all_keys(&self);

    /// Create the `id -> key` mapping and a reference for this node.
    async fn allocate_id(&self, ctx: &Context, id: IdentityId, key: &Self::Key)
        -> BackendResult<()>;

    async fn allocate_id_if_locked(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &Self::Key,
        lock: &dyn KvLocker,
    ) -> BackendResult<()>;

    /// Record that this node uses the identity allocated for `key`.
    async fn acquire_reference(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &Self::Key,
        lock: Option<&dyn KvLocker>,
    ) -> BackendResult<()>;

    /// Drop this node's reference to the identity allocated for `key`.
    async fn release(&self, ctx: &Context, key: &Self::Key) -> BackendResult<()>;

    /// Refresh this node's reference, recreating the mapping when the caller
    /// knows it is missing from the store.
    async fn update_key(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &Self::Key,
        reliably_missing: bool,
    ) -> BackendResult<()>;

    async fn update_key_if_locked(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &Self::Key,
        reliably_missing: bool,
        lock: &dyn KvLocker,
    ) -> BackendResult<()>;

    /// ID allocated for `key`, or [`IdentityId::NONE`].
    async fn get(&self, ctx: &Context, key: &Self::Key) -> BackendResult<IdentityId>;

    async fn get_if_locked(
        &self,
        ctx: &Context,
        key: &Self::Key,
        lock: &dyn KvLocker,
    ) -> BackendResult<IdentityId>;

    /// Key allocated for `id`, or `None` if there is no such identity.
    async fn get_by_id(&self, ctx: &Context, id: IdentityId) -> BackendResult<Option<Self::Key>>;

    async fn lock(&self, ctx: &Context, key: &Self::Key) -> BackendResult<Box<dyn KvLocker>>;

    /// One garbage collection round. Returns the keys considered stale in
    /// this round, to be passed into the next.
    async fn run_gc(
        &self,
        ctx: &Context,
        stale_keys_prev_round: &HashMap<String, u64>,
    ) -> BackendResult<HashMap<String, u64>>;

    /// Sync the cache and feed `handler` until `stop` is cancelled.
    async fn list_and_watch(
        &self,
        handler: Arc<dyn CacheMutations<Self::Key>>,
        stop: CancellationToken,
    );

    fn status(&self) -> BackendResult<String>;

    fn encode(&self, value: &str) -> String;
}
