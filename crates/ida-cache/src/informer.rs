use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use ida_store::{Context, ObjectStore, StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MirrorCache;
use crate::handler::EventHandler;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InformerConfig {
    /// Pause before the first relist after a watch ends or fails.
    pub relist_backoff_ms: u64,
    /// Upper bound for the pause while the store keeps failing.
    pub max_relist_backoff_ms: u64,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            relist_backoff_ms: 1000,
            max_relist_backoff_ms: 30_000,
        }
    }
}

impl InformerConfig {
    pub fn relist_backoff(&self) -> Duration {
        Duration::from_millis(self.relist_backoff_ms)
    }

    /// Relist delays: doubling from `relist_backoff_ms`, capped at
    /// `max_relist_backoff_ms`, never exhausted.
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.relist_backoff())
            .with_max_delay(Duration::from_millis(
                self.max_relist_backoff_ms.max(self.relist_backoff_ms),
            ))
            .with_factor(2.0)
            .without_max_times()
    }
}

/// Keeps a [`MirrorCache`] in step with an [`ObjectStore`].
///
/// Each cycle lists the store, replaces the cache contents, marks the cache
/// synced, and watches from the list's resource version. When the watch
/// expires, fails, or the store closes it, the informer backs off and starts
/// a new cycle. The delay doubles while listing keeps failing and resets
/// once a list succeeds.
pub struct Informer {
    store: Arc<dyn ObjectStore>,
    cache: Arc<MirrorCache>,
    handler: Arc<dyn EventHandler>,
    config: InformerConfig,
}

impl Informer {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<MirrorCache>,
        handler: Arc<dyn EventHandler>,
        config: InformerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            handler,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<MirrorCache> {
        &self.cache
    }

    /// Run until `stop` is cancelled.
    pub async fn run(&self, stop: CancellationToken) {
        let ctx = Context::with_cancellation(stop.child_token());
        let kind = self.store.kind().to_string();
        info!(%kind, "informer started");

        let mut delays = self.config.backoff().build();
        loop {
            let outcome = match self.relist(&ctx).await {
                Ok(list_version) => {
                    delays = self.config.backoff().build();
                    self.watch_from(&ctx, list_version).await
                }
                Err(err) => Err(err),
            };
            match outcome {
                Ok(()) => debug!(%kind, "watch closed by store, relisting"),
                Err(err) if err.is_cancellation() => break,
                Err(StoreError::Expired(reason)) => {
                    debug!(%kind, %reason, "watch expired, relisting")
                }
                Err(err) => warn!(%kind, error = %err, "list/watch failed, relisting"),
            }

            let delay = delays
                .next()
                .unwrap_or_else(|| Duration::from_millis(self.config.max_relist_backoff_ms));
            debug!(%kind, delay_ms = delay.as_millis() as u64, "waiting before relist");
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!(%kind, "informer stopped");
    }

    /// List the store into the cache and mark it synced. Returns the list's
    /// resource version.
    async fn relist(&self, ctx: &Context) -> StoreResult<u64> {
        let listing = self.store.list(ctx).await?;
        let list_version = listing.resource_version;
        let deltas = self.cache.replace(listing.items);
        debug!(
            kind = %self.store.kind(),
            resource_version = list_version,
            changes = deltas.len(),
            "cache replaced from list"
        );
        for delta in &deltas {
            delta.dispatch(self.handler.as_ref());
        }
        self.cache.mark_synced();
        Ok(list_version)
    }

    async fn watch_from(&self, ctx: &Context, list_version: u64) -> StoreResult<()> {
        let mut stream = self.store.watch(ctx, list_version).await?;
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.token().cancelled() => return Err(StoreError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                None => return Ok(()),
                Some(Err(err)) => return Err(err),
                Some(Ok(event)) => {
                    if let Some(delta) = self.cache.apply(event) {
                        delta.dispatch(self.handler.as_ref());
                    }
                }
            }
        }
    }
}

/// Wait until the cache behind `synced` completes its first sync.
///
/// Returns `false` if `stop` fires first or the cache is dropped.
pub async fn wait_for_cache_sync(
    stop: &CancellationToken,
    mut synced: watch::Receiver<bool>,
) -> bool {
    if *synced.borrow() {
        return true;
    }
    tokio::select! {
        biased;
        _ = stop.cancelled() => false,
        ok = async { synced.wait_for(|s| *s).await.is_ok() } => ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::DeleteEvent;
    use ida_store::{InMemoryObjectStore, StoreOp, StoredObject};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventHandler for Recorder {
        fn on_add(&self, object: &StoredObject) {
            self.events.lock().unwrap().push(format!("add {}", object.name));
        }

        fn on_update(&self, _old: &StoredObject, new: &StoredObject) {
            self.events.lock().unwrap().push(format!("update {}", new.name));
        }

        fn on_delete(&self, event: &DeleteEvent) {
            let tag = if event.is_tombstone() { "tombstone" } else { "delete" };
            self.events
                .lock()
                .unwrap()
                .push(format!("{tag} {}", event.key()));
        }
    }

    fn doc(name: &str) -> StoredObject {
        StoredObject::new(name, json!({ "securityLabels": {} }))
    }

    fn fast() -> InformerConfig {
        InformerConfig {
            relist_backoff_ms: 10,
            max_relist_backoff_ms: 100,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn syncs_then_streams() {
        let store = Arc::new(InMemoryObjectStore::default());
        let ctx = Context::background();
        store.create(&ctx, doc("1")).await.unwrap();

        let cache = Arc::new(MirrorCache::new());
        let recorder = Arc::new(Recorder::default());
        let informer = Informer::new(store.clone(), cache.clone(), recorder.clone(), fast());
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });

        assert!(wait_for_cache_sync(&stop, cache.subscribe_synced()).await);
        store.create(&ctx, doc("2")).await.unwrap();
        store.delete(&ctx, "1").await.unwrap();

        eventually(|| recorder.events().len() == 3).await;
        assert_eq!(recorder.events(), vec!["add 1", "add 2", "delete 1"]);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn relist_does_not_duplicate_unchanged_objects() {
        let store = Arc::new(InMemoryObjectStore::default());
        let ctx = Context::background();
        store.create(&ctx, doc("1")).await.unwrap();
        store.create(&ctx, doc("2")).await.unwrap();

        let cache = Arc::new(MirrorCache::new());
        let recorder = Arc::new(Recorder::default());
        let informer = Informer::new(store.clone(), cache.clone(), recorder.clone(), fast());
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });
        assert!(wait_for_cache_sync(&stop, cache.subscribe_synced()).await);

        // Mutations made while no watch is open surface through the relist.
        store.restart_watches();
        store.delete(&ctx, "2").await.unwrap();
        store.create(&ctx, doc("3")).await.unwrap();

        eventually(|| recorder.events().len() == 4).await;
        assert_eq!(
            recorder.events(),
            vec!["add 1", "add 2", "add 3", "tombstone 2"]
        );
        assert!(store.op_count(StoreOp::List) >= 2);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn expired_watch_triggers_relist() {
        let store = Arc::new(InMemoryObjectStore::default());
        let ctx = Context::background();
        store.create(&ctx, doc("1")).await.unwrap();
        store.inject_fault(StoreOp::Watch, StoreError::Expired("compacted".into()), 1);

        let cache = Arc::new(MirrorCache::new());
        let recorder = Arc::new(Recorder::default());
        let informer = Informer::new(store.clone(), cache.clone(), recorder.clone(), fast());
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });

        eventually(|| store.op_count(StoreOp::Watch) >= 2).await;
        store.create(&ctx, doc("2")).await.unwrap();
        eventually(|| recorder.events().len() == 2).await;
        assert_eq!(recorder.events(), vec!["add 1", "add 2"]);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn list_failure_retries_until_success() {
        let store = Arc::new(InMemoryObjectStore::default());
        store.inject_fault(StoreOp::List, StoreError::Transport("refused".into()), 3);

        let cache = Arc::new(MirrorCache::new());
        let informer = Informer::new(
            store.clone(),
            cache.clone(),
            Arc::new(Recorder::default()),
            fast(),
        );
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });

        assert!(wait_for_cache_sync(&stop, cache.subscribe_synced()).await);
        assert_eq!(store.op_count(StoreOp::List), 4);

        stop.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_before_sync() {
        let store = Arc::new(InMemoryObjectStore::default());
        store.inject_persistent_fault(StoreOp::List, StoreError::Transport("down".into()));

        let cache = Arc::new(MirrorCache::new());
        let informer = Informer::new(
            store.clone(),
            cache.clone(),
            Arc::new(Recorder::default()),
            fast(),
        );
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });

        let waiter = tokio::spawn({
            let stop = stop.clone();
            let synced = cache.subscribe_synced();
            async move { wait_for_cache_sync(&stop, synced).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop.cancel();

        assert!(!waiter.await.unwrap());
        task.await.unwrap();
        assert!(!cache.has_synced());
    }

    #[tokio::test]
    async fn already_synced_returns_immediately() {
        let cache = MirrorCache::new();
        cache.mark_synced();
        let stop = CancellationToken::new();
        stop.cancel();
        assert!(wait_for_cache_sync(&stop, cache.subscribe_synced()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn relist_backoff_grows_while_store_is_down() {
        let store = Arc::new(InMemoryObjectStore::default());
        store.inject_persistent_fault(StoreOp::List, StoreError::Transport("down".into()));

        let cache = Arc::new(MirrorCache::new());
        let informer = Informer::new(
            store.clone(),
            cache.clone(),
            Arc::new(Recorder::default()),
            InformerConfig {
                relist_backoff_ms: 100,
                max_relist_backoff_ms: 1_000,
            },
        );
        let stop = CancellationToken::new();
        let task = tokio::spawn({
            let stop = stop.clone();
            async move { informer.run(stop).await }
        });

        // Lists at 0, 100, 300 and 700 ms; the next one is due at 1500 ms.
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(store.op_count(StoreOp::List), 4);

        store.clear_faults();
        assert!(wait_for_cache_sync(&stop, cache.subscribe_synced()).await);
        assert_eq!(store.op_count(StoreOp::List), 5);

        stop.cancel();
        task.await.unwrap();
    }

    #[test]
    fn default_config() {
        let config = InformerConfig::default();
        assert_eq!(config.relist_backoff(), Duration::from_secs(1));
        assert_eq!(config.max_relist_backoff_ms, 30_000);
    }

    #[test]
    fn relist_delays_double_up_to_the_cap() {
        let config = InformerConfig {
            relist_backoff_ms: 100,
            max_relist_backoff_ms: 350,
        };
        let delays: Vec<u64> = config
            .backoff()
            .build()
            .take(5)
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 350, 350, 350]);
    }
}
