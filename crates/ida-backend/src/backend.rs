use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::Utc;
use ida_cache::{wait_for_cache_sync, Informer, MirrorCache};
use ida_store::{Context, ObjectStore, StoredObject};
use ida_types::{sanitize_labels, AllocatorKey, IdentityId, IdentityObject, LabelMap};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::dispatch::IdentityDispatcher;
use crate::error::{BackendError, BackendResult};
use crate::lock::NoopLock;
use crate::traits::{Backend, CacheMutations, KvLocker};
use crate::write::{WritePlan, WriteTarget};

/// Canonical form of a label map, used as the cache index value.
fn label_index_key(labels: &LabelMap) -> String {
    serde_json::to_string(labels).unwrap_or_default()
}

fn security_label_index(object: &StoredObject) -> Option<String> {
    let labels = object.data.get("securityLabels")?;
    let labels: LabelMap = serde_json::from_value(labels.clone()).ok()?;
    Some(label_index_key(&labels))
}

/// [`Backend`] storing one object per identity in an [`ObjectStore`].
///
/// The object is named by the decimal ID, carries the full label map in
/// `securityLabels`, and lists referencing nodes in `status.nodes`. Lookups
/// by key or ID read the mirror cache built by the last
/// [`Backend::list_and_watch`] call; before that, lookups by key find
/// nothing and lookups by ID fail with [`BackendError::StoreUnavailable`].
///
/// No in-process locking is taken around writes. Concurrent writers,
/// including other nodes, are serialized by the store's per-object
/// atomicity and the [`WritePlan`] tiers.
pub struct IdentityBackend<K> {
    config: BackendConfig,
    store: Arc<dyn ObjectStore>,
    cache: ArcSwapOption<MirrorCache>,
    _key: PhantomData<fn() -> K>,
}

impl<K: AllocatorKey> IdentityBackend<K> {
    pub fn new(config: BackendConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            cache: ArcSwapOption::empty(),
            _key: PhantomData,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// The cache built by the last `list_and_watch` call, if any.
    pub fn cache(&self) -> Option<Arc<MirrorCache>> {
        self.cache.load_full()
    }

    /// Cached identity whose full label map equals `key`'s.
    fn find_by_key(&self, key: &K) -> Option<(StoredObject, IdentityObject)> {
        let cache = self.cache.load_full()?;
        let wanted = key.to_label_map();
        for object in cache.by_index(&label_index_key(&wanted)) {
            match IdentityObject::from_value(&object.name, &object.data) {
                Ok(identity) if identity.security_labels == wanted => {
                    return Some((object, identity))
                }
                Ok(_) => {}
                Err(err) => debug!(object = %object.name, error = %err, "skipping undecodable cache entry"),
            }
        }
        None
    }

    /// Write `identity` (already carrying this node's change) through `plan`.
    async fn write_reference(
        &self,
        ctx: &Context,
        plan: WritePlan,
        cached: &StoredObject,
        identity: &IdentityObject,
    ) -> BackendResult<()> {
        let timestamp = identity
            .node_ref(&self.config.node_name)
            .copied()
            .unwrap_or_else(Utc::now);
        let target = WriteTarget {
            name: cached.name.clone(),
            node: self.config.node_name.clone(),
            timestamp,
            desired: StoredObject::new(&cached.name, identity.to_value()?)
                .with_resource_version(cached.resource_version),
        };

        let report = plan.execute(self.store.as_ref(), ctx, &target).await;
        debug!(
            object = %cached.name,
            node = %self.config.node_name,
            tiers = ?report.tiers(),
            applied_by = ?report.applied_by(),
            elapsed_us = report.elapsed.as_micros() as u64,
            "reference write finished"
        );
        report.into_result()?;
        Ok(())
    }
}

impl<K> std::fmt::Debug for IdentityBackend<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityBackend")
            .field("node_name", &self.config.node_name)
            .field("store", &self.store.kind())
            .field("cache", &self.cache.load().is_some())
            .finish()
    }
}

#[async_trait]
impl<K: AllocatorKey> Backend for IdentityBackend<K> {
    type Key = K;

    async fn delete_all_keys(&self) {}

    async fn allocate_id(&self, ctx: &Context, id: IdentityId, key: &K) -> BackendResult<()> {
        let labels = key.to_label_map();
        let partitioned = sanitize_labels(&labels, &self.config.label_source);
        if !partitioned.skipped.is_empty() {
            info!(
                identity = %id,
                skipped = ?partitioned.skipped,
                source = %self.config.label_source,
                "skipped labels from other sources when labelling identity; all labels still determine the identity"
            );
        }

        let mut identity = IdentityObject::new(id, labels, partitioned.selected);
        identity.set_node_ref(&self.config.node_name, Utc::now());
        self.store
            .create(ctx, StoredObject::new(id.to_string(), identity.to_value()?))
            .await?;
        debug!(identity = %id, %key, node = %self.config.node_name, "allocated identity");
        Ok(())
    }

    async fn allocate_id_if_locked(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &K,
        _lock: &dyn KvLocker,
    ) -> BackendResult<()> {
        self.allocate_id(ctx, id, key).await
    }

    async fn acquire_reference(
        &self,
        ctx: &Context,
        _id: IdentityId,
        key: &K,
        _lock: Option<&dyn KvLocker>,
    ) -> BackendResult<()> {
        let (cached, mut identity) = self.find_by_key(key).ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;
        identity.set_node_ref(&self.config.node_name, Utc::now());
        self.write_reference(ctx, WritePlan::for_acquire(), &cached, &identity)
            .await
    }

    async fn release(&self, ctx: &Context, key: &K) -> BackendResult<()> {
        let (cached, mut identity) = self.find_by_key(key).ok_or_else(|| BackendError::NotFound {
            key: key.to_string(),
        })?;
        if !identity.remove_node_ref(&self.config.node_name) {
            return Err(BackendError::IdentityUnused {
                key: key.to_string(),
            });
        }
        self.write_reference(ctx, WritePlan::for_release(), &cached, &identity)
            .await
    }

    async fn update_key(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &K,
        reliably_missing: bool,
    ) -> BackendResult<()> {
        match self.acquire_reference(ctx, id, key, None).await {
            Ok(()) => {
                debug!(identity = %id, %key, "acquired reference for identity");
                return Ok(());
            }
            Err(err) => warn!(
                identity = %id,
                %key,
                error = %err,
                reliably_missing,
                "unable to record this node's reference on identity"
            ),
        }

        if reliably_missing {
            self.allocate_id(ctx, id, key)
                .await
                .map_err(|source| BackendError::RecreateFailed {
                    key: key.to_string(),
                    id,
                    source: Box::new(source),
                })?;
        }
        Ok(())
    }

    async fn update_key_if_locked(
        &self,
        ctx: &Context,
        id: IdentityId,
        key: &K,
        reliably_missing: bool,
        _lock: &dyn KvLocker,
    ) -> BackendResult<()> {
        self.update_key(ctx, id, key, reliably_missing).await
    }

    async fn get(&self, _ctx: &Context, key: &K) -> BackendResult<IdentityId> {
        match self.find_by_key(key) {
            Some((_, identity)) => Ok(identity.id()?),
            None => Ok(IdentityId::NONE),
        }
    }

    async fn get_if_locked(
        &self,
        ctx: &Context,
        key: &K,
        _lock: &dyn KvLocker,
    ) -> BackendResult<IdentityId> {
        self.get(ctx, key).await
    }

    async fn get_by_id(&self, _ctx: &Context, id: IdentityId) -> BackendResult<Option<K>> {
        let cache = self.cache.load_full().ok_or(BackendError::StoreUnavailable)?;
        if !cache.has_synced() {
            return Err(BackendError::StoreUnavailable);
        }
        let Some(object) = cache.get(&id.to_string()) else {
            return Ok(None);
        };
        let identity = IdentityObject::from_value(&object.name, &object.data).map_err(|err| {
            BackendError::InvalidObject {
                name: object.name.clone(),
                reason: err.to_string(),
            }
        })?;
        Ok(Some(K::from_label_map(identity.security_labels)))
    }

    async fn lock(&self, _ctx: &Context, _key: &K) -> BackendResult<Box<dyn KvLocker>> {
        Ok(Box::new(NoopLock))
    }

    async fn run_gc(
        &self,
        _ctx: &Context,
        _stale_keys_prev_round: &HashMap<String, u64>,
    ) -> BackendResult<HashMap<String, u64>> {
        Ok(HashMap::new())
    }

    async fn list_and_watch(&self, handler: Arc<dyn CacheMutations<K>>, stop: CancellationToken) {
        let cache = Arc::new(MirrorCache::with_indexer(Box::new(security_label_index)));
        self.cache.store(Some(cache.clone()));

        let notifier = tokio::spawn({
            let stop = stop.clone();
            let synced = cache.subscribe_synced();
            let handler = handler.clone();
            async move {
                if wait_for_cache_sync(&stop, synced).await {
                    handler.on_list_done();
                }
            }
        });

        let informer = Informer::new(
            self.store.clone(),
            cache,
            Arc::new(IdentityDispatcher::new(handler)),
            self.config.informer.clone(),
        );
        info!(node = %self.config.node_name, "watching identities");
        informer.run(stop).await;

        if let Err(err) = notifier.await {
            warn!(error = %err, "list-done notifier failed");
        }
    }

    fn status(&self) -> BackendResult<String> {
        Ok("OK".into())
    }

    fn encode(&self, value: &str) -> String {
        value.to_string()
    }
}
