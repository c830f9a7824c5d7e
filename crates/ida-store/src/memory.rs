use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::Context;
use crate::error::{StoreError, StoreResult};
use crate::object::{Capabilities, ObjectList, StoredObject, Subresource};
use crate::patch::{apply_json_patch, apply_merge_patch, PatchBody, PatchError};
use crate::traits::ObjectStore;
use crate::watch::{WatchEvent, WatchEventKind, WatchStream};

/// Configuration for an [`InMemoryObjectStore`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Resource name used in logs.
    pub kind: String,
    /// Features the store advertises.
    pub capabilities: Capabilities,
    /// Number of past events kept for watches opened from an older version.
    pub history_limit: usize,
    /// Per-watcher buffer; a watcher further behind than this expires.
    pub watch_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: "objects".into(),
            capabilities: Capabilities::full(),
            history_limit: 1024,
            watch_capacity: 1024,
        }
    }
}

/// Store operations, for fault injection and call accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Create,
    Get,
    List,
    Patch,
    Update,
    UpdateStatus,
    Delete,
    Watch,
}

struct Fault {
    error: StoreError,
    /// `None` fails every call until cleared.
    remaining: Option<usize>,
}

struct State {
    objects: BTreeMap<String, StoredObject>,
    resource_version: u64,
    history: VecDeque<WatchEvent>,
    /// Highest version no longer replayable from `history`.
    compacted_through: u64,
}

/// In-memory, `BTreeMap`-based object store.
///
/// Intended for tests, simulations, and embedding. State lives behind a
/// `RwLock`; every mutation bumps one store-wide resource version, is
/// appended to a bounded history, and is broadcast to live watchers while
/// the write lock is held, so watches opened under the read lock never see
/// a gap or a duplicate.
///
/// Test hooks: [`Self::set_capabilities`], [`Self::inject_fault`],
/// [`Self::op_count`], [`Self::compact_history`], [`Self::restart_watches`].
pub struct InMemoryObjectStore {
    config: StoreConfig,
    capabilities: RwLock<Capabilities>,
    state: RwLock<State>,
    events: RwLock<broadcast::Sender<WatchEvent>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<Fault>>>,
    op_counts: Mutex<HashMap<StoreOp, usize>>,
}

impl InMemoryObjectStore {
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(config.watch_capacity.max(1));
        Self {
            capabilities: RwLock::new(config.capabilities),
            state: RwLock::new(State {
                objects: BTreeMap::new(),
                resource_version: 0,
                history: VecDeque::new(),
                compacted_through: 0,
            }),
            events: RwLock::new(events),
            faults: Mutex::new(HashMap::new()),
            op_counts: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// A store with default settings and the given resource name.
    pub fn with_kind(kind: impl Into<String>) -> Self {
        Self::new(StoreConfig {
            kind: kind.into(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Change the advertised capabilities at runtime.
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.write().expect("lock poisoned") = capabilities;
    }

    /// Fail the next `times` calls of `op` with `error`.
    ///
    /// Faults queue up: a second injection for the same op takes effect
    /// after the first is used up.
    pub fn inject_fault(&self, op: StoreOp, error: StoreError, times: usize) {
        if times == 0 {
            return;
        }
        self.faults
            .lock()
            .expect("lock poisoned")
            .entry(op)
            .or_default()
            .push_back(Fault {
                error,
                remaining: Some(times),
            });
    }

    /// Fail every call of `op` with `error` until [`Self::clear_faults`].
    pub fn inject_persistent_fault(&self, op: StoreOp, error: StoreError) {
        self.faults
            .lock()
            .expect("lock poisoned")
            .entry(op)
            .or_default()
            .push_back(Fault {
                error,
                remaining: None,
            });
    }

    pub fn clear_faults(&self) {
        self.faults.lock().expect("lock poisoned").clear();
    }

    /// Number of calls made to `op`, including failed ones.
    pub fn op_count(&self, op: StoreOp) -> usize {
        self.op_counts
            .lock()
            .expect("lock poisoned")
            .get(&op)
            .copied()
            .unwrap_or(0)
    }

    pub fn reset_op_counts(&self) {
        self.op_counts.lock().expect("lock poisoned").clear();
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current store-wide resource version.
    pub fn resource_version(&self) -> u64 {
        self.state.read().expect("lock poisoned").resource_version
    }

    /// Sorted names of all stored objects.
    pub fn names(&self) -> Vec<String> {
        self.state
            .read()
            .expect("lock poisoned")
            .objects
            .keys()
            .cloned()
            .collect()
    }

    /// Drop the event history. Watches from any earlier version expire.
    pub fn compact_history(&self) {
        let mut state = self.state.write().expect("lock poisoned");
        state.compacted_through = state.resource_version;
        state.history.clear();
    }

    /// Close every open watch stream, as a store restart would.
    pub fn restart_watches(&self) {
        let (events, _) = broadcast::channel(self.config.watch_capacity.max(1));
        *self.events.write().expect("lock poisoned") = events;
        debug!(kind = %self.config.kind, "watch streams closed");
    }

    /// Count the call and pop an injected fault, if any.
    fn begin(&self, op: StoreOp) -> StoreResult<()> {
        *self
            .op_counts
            .lock()
            .expect("lock poisoned")
            .entry(op)
            .or_insert(0) += 1;

        let mut faults = self.faults.lock().expect("lock poisoned");
        let Some(queue) = faults.get_mut(&op) else {
            return Ok(());
        };
        let Some(fault) = queue.front_mut() else {
            return Ok(());
        };
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                queue.pop_front();
            }
        }
        debug!(kind = %self.config.kind, ?op, %error, "injected fault");
        Err(error)
    }

    /// Stamp a new version on `object`, apply it, record and broadcast it.
    fn commit(
        &self,
        state: &mut State,
        kind: WatchEventKind,
        mut object: StoredObject,
    ) -> StoredObject {
        state.resource_version += 1;
        object.resource_version = state.resource_version;

        let event = match kind {
            WatchEventKind::Added => {
                state.objects.insert(object.name.clone(), object.clone());
                WatchEvent::Added(object.clone())
            }
            WatchEventKind::Modified => {
                state.objects.insert(object.name.clone(), object.clone());
                WatchEvent::Modified(object.clone())
            }
            WatchEventKind::Deleted => {
                state.objects.remove(&object.name);
                WatchEvent::Deleted(object.clone())
            }
        };

        state.history.push_back(event.clone());
        while state.history.len() > self.config.history_limit {
            if let Some(evicted) = state.history.pop_front() {
                state.compacted_through = evicted.resource_version();
            }
        }

        // No live watchers is not an error.
        let _ = self.events.read().expect("lock poisoned").send(event);

        debug!(
            kind = %self.config.kind,
            name = %object.name,
            resource_version = object.resource_version,
            event = %kind,
            "object committed"
        );
        object
    }

    fn current(state: &State, name: &str) -> StoreResult<StoredObject> {
        state
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }

    fn check_version(current: &StoredObject, requested: u64) -> StoreResult<()> {
        if requested != 0 && requested != current.resource_version {
            return Err(StoreError::Conflict {
                name: current.name.clone(),
                reason: format!(
                    "object has been modified: have version {requested}, store has {}",
                    current.resource_version
                ),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("kind", &self.config.kind)
            .field("object_count", &self.len())
            .field("resource_version", &self.resource_version())
            .finish()
    }
}

/// Reject documents the store's naming rules do not allow.
fn validate(name: &str, data: &Value) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::Invalid {
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("object name must not be empty".into()));
    }
    if !data.is_object() {
        return Err(invalid("document must be a JSON object".into()));
    }
    if let Some(meta_name) = data.pointer("/metadata/name").and_then(Value::as_str) {
        if meta_name != name {
            return Err(invalid(format!("metadata.name {meta_name:?} does not match")));
        }
    }
    if let Some(labels) = data.pointer("/metadata/labels").and_then(Value::as_object) {
        if let Some(bad) = labels.keys().find(|k| k.contains(':')) {
            return Err(invalid(format!("label key {bad:?} must not contain ':'")));
        }
    }
    Ok(())
}

/// Ensure `metadata.name` is set and carry over (or mint) the object UID.
fn prepare_metadata(name: &str, data: &mut Value, previous: Option<&Value>) {
    let Some(doc) = data.as_object_mut() else {
        return;
    };
    let meta = doc
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()));
    if !meta.is_object() {
        *meta = Value::Object(Default::default());
    }
    if let Some(meta) = meta.as_object_mut() {
        meta.insert("name".into(), Value::String(name.to_string()));
        if !meta.contains_key("uid") {
            let uid = previous
                .and_then(|p| p.pointer("/metadata/uid"))
                .cloned()
                .unwrap_or_else(|| Value::String(uuid::Uuid::now_v7().to_string()));
            meta.insert("uid".into(), uid);
        }
    }
}

/// `data` with its `status` member replaced by `status`.
fn with_status(mut data: Value, status: Option<Value>) -> Value {
    if let Some(doc) = data.as_object_mut() {
        match status {
            Some(status) if !status.is_null() => {
                doc.insert("status".into(), status);
            }
            _ => {
                doc.remove("status");
            }
        }
    }
    data
}

fn patch_error(name: &str, err: PatchError) -> StoreError {
    match err {
        PatchError::TestFailed { .. } => StoreError::Conflict {
            name: name.to_string(),
            reason: err.to_string(),
        },
        other => StoreError::Invalid {
            name: name.to_string(),
            reason: other.to_string(),
        },
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    fn capabilities(&self) -> Capabilities {
        *self.capabilities.read().expect("lock poisoned")
    }

    async fn create(&self, ctx: &Context, object: StoredObject) -> StoreResult<StoredObject> {
        self.begin(StoreOp::Create)?;
        ctx.run(async move {
            let StoredObject { name, mut data, .. } = object;
            prepare_metadata(&name, &mut data, None);
            validate(&name, &data)?;

            let mut state = self.state.write().expect("lock poisoned");
            if state.objects.contains_key(&name) {
                return Err(StoreError::AlreadyExists { name });
            }
            Ok(self.commit(
                &mut state,
                WatchEventKind::Added,
                StoredObject::new(name, data),
            ))
        })
        .await
    }

    async fn get(&self, ctx: &Context, name: &str) -> StoreResult<StoredObject> {
        self.begin(StoreOp::Get)?;
        ctx.run(async move {
            let state = self.state.read().expect("lock poisoned");
            Self::current(&state, name)
        })
        .await
    }

    async fn list(&self, ctx: &Context) -> StoreResult<ObjectList> {
        self.begin(StoreOp::List)?;
        ctx.run(async move {
            let state = self.state.read().expect("lock poisoned");
            Ok(ObjectList {
                items: state.objects.values().cloned().collect(),
                resource_version: state.resource_version,
            })
        })
        .await
    }

    async fn patch(
        &self,
        ctx: &Context,
        name: &str,
        patch: &PatchBody,
        subresource: Subresource,
    ) -> StoreResult<StoredObject> {
        self.begin(StoreOp::Patch)?;
        let capabilities = self.capabilities();
        ctx.run(async move {
            if !capabilities.patch {
                return Err(StoreError::Unsupported("patch".into()));
            }
            if subresource == Subresource::Status && !capabilities.update_status {
                return Err(StoreError::Unsupported("status subresource".into()));
            }

            let mut state = self.state.write().expect("lock poisoned");
            let current = Self::current(&state, name)?;

            let mut patched = current.data.clone();
            match patch {
                PatchBody::Json(ops) => {
                    apply_json_patch(&mut patched, ops).map_err(|e| patch_error(name, e))?
                }
                PatchBody::Merge(doc) => apply_merge_patch(&mut patched, doc),
            }
            let data = match subresource {
                Subresource::Main => patched,
                Subresource::Status => with_status(current.data.clone(), patched.get("status").cloned()),
            };
            validate(name, &data)?;

            if data == current.data {
                return Ok(current);
            }
            Ok(self.commit(
                &mut state,
                WatchEventKind::Modified,
                StoredObject::new(name, data),
            ))
        })
        .await
    }

    async fn update(&self, ctx: &Context, object: StoredObject) -> StoreResult<StoredObject> {
        self.begin(StoreOp::Update)?;
        ctx.run(async move {
            let mut state = self.state.write().expect("lock poisoned");
            let current = Self::current(&state, &object.name)?;
            Self::check_version(&current, object.resource_version)?;

            let StoredObject { name, mut data, .. } = object;
            prepare_metadata(&name, &mut data, Some(&current.data));
            validate(&name, &data)?;

            if data == current.data {
                return Ok(current);
            }
            Ok(self.commit(
                &mut state,
                WatchEventKind::Modified,
                StoredObject::new(name, data),
            ))
        })
        .await
    }

    async fn update_status(
        &self,
        ctx: &Context,
        object: StoredObject,
    ) -> StoreResult<StoredObject> {
        self.begin(StoreOp::UpdateStatus)?;
        let capabilities = self.capabilities();
        ctx.run(async move {
            if !capabilities.update_status {
                return Err(StoreError::Unsupported("status subresource".into()));
            }
            let mut state = self.state.write().expect("lock poisoned");
            let current = Self::current(&state, &object.name)?;
            Self::check_version(&current, object.resource_version)?;

            let data = with_status(current.data.clone(), object.data.get("status").cloned());
            if data == current.data {
                return Ok(current);
            }
            Ok(self.commit(
                &mut state,
                WatchEventKind::Modified,
                StoredObject::new(object.name, data),
            ))
        })
        .await
    }

    async fn delete(&self, ctx: &Context, name: &str) -> StoreResult<()> {
        self.begin(StoreOp::Delete)?;
        ctx.run(async move {
            let mut state = self.state.write().expect("lock poisoned");
            let current = Self::current(&state, name)?;
            self.commit(&mut state, WatchEventKind::Deleted, current);
            Ok(())
        })
        .await
    }

    async fn watch(&self, ctx: &Context, from_version: u64) -> StoreResult<WatchStream> {
        self.begin(StoreOp::Watch)?;
        ctx.run(async move {
            let state = self.state.read().expect("lock poisoned");
            if from_version < state.compacted_through {
                return Err(StoreError::Expired(format!(
                    "version {from_version} is compacted; oldest available is {}",
                    state.compacted_through
                )));
            }
            let backlog: Vec<WatchEvent> = state
                .history
                .iter()
                .filter(|e| e.resource_version() > from_version)
                .cloned()
                .collect();
            let live = self.events.read().expect("lock poisoned").subscribe();
            Ok(WatchStream::new(backlog, live, from_version))
        })
        .await
    }
}
