//! Multi-node run against one in-memory store.
//!
//! Stands in for the allocator layer: the first node allocates each key with
//! the next sequential ID, then every node acquires a reference to it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, ensure};
use ida_backend::{Backend, CacheMutations, IdentityBackend};
use ida_store::{Capabilities, Context, InMemoryObjectStore, ObjectStore};
use ida_types::{IdentityId, IdentityObject, LabelKey, LabelMap};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::IdaConfig;

const CATCH_UP_POLL: Duration = Duration::from_millis(5);
const CATCH_UP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SimulationPlan {
    pub nodes: usize,
    pub keys: Vec<LabelKey>,
    pub first_id: u64,
    pub release: bool,
    pub minimal_store: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub adds: usize,
    pub modifies: usize,
    pub deletes: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct IdentityReport {
    pub id: u64,
    pub security_labels: LabelMap,
    pub discoverable_labels: LabelMap,
    pub nodes: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub resource_version: u64,
    pub nodes: Vec<NodeReport>,
    pub identities: Vec<IdentityReport>,
}

struct EventCounter {
    listed: watch::Sender<bool>,
    adds: AtomicUsize,
    modifies: AtomicUsize,
    deletes: AtomicUsize,
}

impl EventCounter {
    fn new() -> Self {
        Self {
            listed: watch::Sender::new(false),
            adds: AtomicUsize::new(0),
            modifies: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }
}

impl CacheMutations<LabelKey> for EventCounter {
    fn on_list_done(&self) {
        self.listed.send_replace(true);
    }

    fn on_add(&self, id: IdentityId, key: LabelKey) {
        debug!(%id, %key, "identity added");
        self.adds.fetch_add(1, Ordering::Relaxed);
    }

    fn on_modify(&self, id: IdentityId, _key: LabelKey) {
        debug!(%id, "identity modified");
        self.modifies.fetch_add(1, Ordering::Relaxed);
    }

    fn on_delete(&self, id: IdentityId, _key: LabelKey) {
        debug!(%id, "identity deleted");
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }
}

struct SimNode {
    backend: Arc<IdentityBackend<LabelKey>>,
    events: Arc<EventCounter>,
    task: JoinHandle<()>,
}

impl SimNode {
    fn start(
        config: &IdaConfig,
        store: Arc<InMemoryObjectStore>,
        name: String,
        stop: CancellationToken,
    ) -> Self {
        let mut backend_config = config.backend.clone();
        backend_config.node_name = name;
        let backend = Arc::new(IdentityBackend::<LabelKey>::new(backend_config, store));
        let events = Arc::new(EventCounter::new());
        let task = tokio::spawn({
            let backend = backend.clone();
            let handler: Arc<dyn CacheMutations<LabelKey>> = events.clone();
            async move { backend.list_and_watch(handler, stop).await }
        });
        Self {
            backend,
            events,
            task,
        }
    }

    fn name(&self) -> &str {
        self.backend.node_name()
    }

    async fn wait_listed(&self) -> anyhow::Result<()> {
        let mut listed = self.events.listed.subscribe();
        let done = matches!(
            tokio::time::timeout(CATCH_UP_TIMEOUT, listed.wait_for(|done| *done)).await,
            Ok(Ok(_))
        );
        ensure!(done, "node {} never finished its initial listing", self.name());
        Ok(())
    }

    /// Wait until this node's cache holds the store's current copy of `id`.
    async fn catch_up(&self, store: &dyn ObjectStore, ctx: &Context, id: IdentityId) -> anyhow::Result<()> {
        let name = id.to_string();
        let deadline = tokio::time::Instant::now() + CATCH_UP_TIMEOUT;
        loop {
            let latest = store.get(ctx, &name).await?.resource_version;
            let cached = self
                .backend
                .cache()
                .and_then(|cache| cache.get(&name))
                .map(|object| object.resource_version);
            if cached == Some(latest) {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("node {} never observed identity {id} at version {latest}", self.name());
            }
            tokio::time::sleep(CATCH_UP_POLL).await;
        }
    }

    fn report(&self) -> NodeReport {
        NodeReport {
            name: self.name().to_string(),
            adds: self.events.adds.load(Ordering::Relaxed),
            modifies: self.events.modifies.load(Ordering::Relaxed),
            deletes: self.events.deletes.load(Ordering::Relaxed),
        }
    }
}

pub async fn run_simulation(config: &IdaConfig, plan: &SimulationPlan) -> anyhow::Result<SimulationReport> {
    ensure!(plan.nodes > 0, "at least one node is required");
    ensure!(plan.first_id > 0, "ID 0 is reserved");

    let mut store_config = config.store.clone();
    if plan.minimal_store {
        store_config.capabilities = Capabilities::minimal();
    }
    let store = Arc::new(InMemoryObjectStore::new(store_config));
    let stop = CancellationToken::new();
    let ctx = Context::background();

    let nodes: Vec<SimNode> = (0..plan.nodes)
        .map(|i| SimNode::start(config, store.clone(), format!("node-{i}"), stop.clone()))
        .collect();

    let outcome = drive(&ctx, store.as_ref(), &nodes, plan).await;

    let report = match outcome {
        Ok(()) => build_report(&ctx, store.as_ref(), &nodes).await,
        Err(err) => Err(err),
    };
    stop.cancel();
    for node in nodes {
        if let Err(err) = node.task.await {
            debug!(error = %err, "simulated node task failed");
        }
    }
    report
}

async fn drive(
    ctx: &Context,
    store: &InMemoryObjectStore,
    nodes: &[SimNode],
    plan: &SimulationPlan,
) -> anyhow::Result<()> {
    for node in nodes {
        node.wait_listed().await?;
    }

    let mut keys: Vec<&LabelKey> = Vec::new();
    for key in &plan.keys {
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    let (first, rest) = match nodes.split_first() {
        Some(split) => split,
        None => return Ok(()),
    };
    let mut next_id = plan.first_id;
    let mut allocated = Vec::with_capacity(keys.len());
    for key in keys {
        let id = IdentityId::new(next_id);
        next_id += 1;
        first.backend.allocate_id(ctx, id, key).await?;
        info!(%id, %key, node = first.name(), "allocated identity");

        for node in rest {
            node.catch_up(store, ctx, id).await?;
            node.backend.acquire_reference(ctx, id, key, None).await?;
            info!(%id, node = node.name(), "acquired reference");
        }
        allocated.push((id, key));
    }

    if plan.release {
        for (id, key) in allocated {
            for node in nodes {
                node.catch_up(store, ctx, id).await?;
                node.backend.release(ctx, key).await?;
                info!(%id, node = node.name(), "released reference");
            }
        }
    }
    Ok(())
}

async fn build_report(
    ctx: &Context,
    store: &InMemoryObjectStore,
    nodes: &[SimNode],
) -> anyhow::Result<SimulationReport> {
    let list = store.list(ctx).await?;
    let mut identities = Vec::with_capacity(list.items.len());
    for object in &list.items {
        let identity = IdentityObject::from_value(&object.name, &object.data)?;
        identities.push(IdentityReport {
            id: identity.id()?.get(),
            nodes: identity.node_refs().map(|(node, _)| node.clone()).collect(),
            security_labels: identity.security_labels,
            discoverable_labels: identity.metadata.labels,
        });
    }
    identities.sort_by_key(|identity| identity.id);

    Ok(SimulationReport {
        resource_version: list.resource_version,
        nodes: nodes.iter().map(SimNode::report).collect(),
        identities,
    })
}
