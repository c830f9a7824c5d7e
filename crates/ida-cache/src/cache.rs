use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use ida_store::{StoredObject, WatchEvent};
use tokio::sync::watch;

use crate::handler::{DeleteEvent, EventHandler};

/// Computes the secondary index value of an object, if it has one.
pub type Indexer = Box<dyn Fn(&StoredObject) -> Option<String> + Send + Sync>;

/// A change applied to the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum Delta {
    Added(StoredObject),
    Updated { old: StoredObject, new: StoredObject },
    Deleted(DeleteEvent),
}

impl Delta {
    /// Forward this change to `handler`.
    pub fn dispatch(&self, handler: &dyn EventHandler) {
        match self {
            Self::Added(obj) => handler.on_add(obj),
            Self::Updated { old, new } => handler.on_update(old, new),
            Self::Deleted(event) => handler.on_delete(event),
        }
    }
}

#[derive(Default)]
struct Inner {
    items: BTreeMap<String, StoredObject>,
    index: HashMap<String, BTreeSet<String>>,
}

/// Keyed snapshot of a store's objects.
///
/// Writes come from [`Self::replace`] (a full list) and [`Self::apply`] (one
/// watch event). An event whose resource version is not newer than the
/// cached object's is stale and ignored.
pub struct MirrorCache {
    inner: RwLock<Inner>,
    indexer: Option<Indexer>,
    synced: watch::Sender<bool>,
}

impl MirrorCache {
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            inner: RwLock::new(Inner::default()),
            indexer: None,
            synced,
        }
    }

    /// A cache that also maintains an index computed by `indexer`.
    pub fn with_indexer(indexer: Indexer) -> Self {
        Self {
            indexer: Some(indexer),
            ..Self::new()
        }
    }

    pub fn get(&self, name: &str) -> Option<StoredObject> {
        self.inner
            .read()
            .expect("lock poisoned")
            .items
            .get(name)
            .cloned()
    }

    /// Every cached object, in name order.
    pub fn list(&self) -> Vec<StoredObject> {
        self.inner
            .read()
            .expect("lock poisoned")
            .items
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Objects whose index value equals `value`. Always empty without an
    /// indexer.
    pub fn by_index(&self, value: &str) -> Vec<StoredObject> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .index
            .get(value)
            .into_iter()
            .flatten()
            .filter_map(|name| inner.items.get(name).cloned())
            .collect()
    }

    /// Whether a full list has been applied.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    /// Receiver that flips to `true` on the first sync.
    pub fn subscribe_synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Make the cache match a full listing and return what changed.
    ///
    /// Objects with an unchanged resource version produce no delta, so a
    /// relist never repeats an event the handler already saw. Objects that
    /// disappeared produce tombstones.
    pub fn replace(&self, items: Vec<StoredObject>) -> Vec<Delta> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let mut previous = std::mem::take(&mut inner.items);
        inner.index.clear();

        let mut deltas = Vec::new();
        for obj in items {
            match previous.remove(&obj.name) {
                None => deltas.push(Delta::Added(obj.clone())),
                Some(old) if old.resource_version != obj.resource_version => {
                    deltas.push(Delta::Updated {
                        old,
                        new: obj.clone(),
                    })
                }
                Some(_) => {}
            }
            self.insert(&mut inner, obj);
        }

        for (key, last_known) in previous {
            deltas.push(Delta::Deleted(DeleteEvent::Tombstone { key, last_known }));
        }
        deltas
    }

    /// Apply one watch event. `None` when the event is stale or a no-op.
    pub fn apply(&self, event: WatchEvent) -> Option<Delta> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let name = event.object().name.clone();
        if let Some(cached) = inner.items.get(&name) {
            if cached.resource_version >= event.resource_version() {
                return None;
            }
        }

        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let delta = match self.remove(&mut inner, &name) {
                    Some(old) => Delta::Updated {
                        old,
                        new: obj.clone(),
                    },
                    None => Delta::Added(obj.clone()),
                };
                self.insert(&mut inner, obj);
                Some(delta)
            }
            WatchEvent::Deleted(obj) => {
                self.remove(&mut inner, &name)?;
                Some(Delta::Deleted(DeleteEvent::Object(obj)))
            }
        }
    }

    fn insert(&self, inner: &mut Inner, obj: StoredObject) {
        if let Some(value) = self.indexer.as_ref().and_then(|f| f(&obj)) {
            inner.index.entry(value).or_default().insert(obj.name.clone());
        }
        inner.items.insert(obj.name.clone(), obj);
    }

    fn remove(&self, inner: &mut Inner, name: &str) -> Option<StoredObject> {
        let old = inner.items.remove(name)?;
        if let Some(value) = self.indexer.as_ref().and_then(|f| f(&old)) {
            if let Some(names) = inner.index.get_mut(&value) {
                names.remove(name);
                if names.is_empty() {
                    inner.index.remove(&value);
                }
            }
        }
        Some(old)
    }
}

impl Default for MirrorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MirrorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCache")
            .field("len", &self.len())
            .field("indexed", &self.indexer.is_some())
            .field("synced", &self.has_synced())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn obj(name: &str, rv: u64, color: &str) -> StoredObject {
        StoredObject::new(name, json!({ "color": color })).with_resource_version(rv)
    }

    fn by_color() -> Indexer {
        Box::new(|o: &StoredObject| o.data.get("color").and_then(Value::as_str).map(String::from))
    }

    #[test]
    fn replace_computes_deltas() {
        let cache = MirrorCache::new();
        let first = cache.replace(vec![obj("a", 1, "red"), obj("b", 2, "red")]);
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|d| matches!(d, Delta::Added(_))));

        let second = cache.replace(vec![obj("a", 1, "red"), obj("c", 5, "blue")]);
        assert_eq!(
            second,
            vec![
                Delta::Added(obj("c", 5, "blue")),
                Delta::Deleted(DeleteEvent::Tombstone {
                    key: "b".into(),
                    last_known: obj("b", 2, "red"),
                }),
            ]
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn replace_reports_changed_versions_as_updates() {
        let cache = MirrorCache::new();
        cache.replace(vec![obj("a", 1, "red")]);
        let deltas = cache.replace(vec![obj("a", 4, "blue")]);
        assert_eq!(
            deltas,
            vec![Delta::Updated {
                old: obj("a", 1, "red"),
                new: obj("a", 4, "blue"),
            }]
        );
    }

    #[test]
    fn stale_events_are_dropped() {
        let cache = MirrorCache::new();
        cache.replace(vec![obj("a", 5, "red")]);
        assert!(cache.apply(WatchEvent::Modified(obj("a", 5, "blue"))).is_none());
        assert!(cache.apply(WatchEvent::Modified(obj("a", 3, "blue"))).is_none());
        assert!(cache.apply(WatchEvent::Deleted(obj("a", 4, "red"))).is_none());
        assert_eq!(cache.get("a").unwrap().data["color"], json!("red"));
    }

    #[test]
    fn apply_add_update_delete() {
        let cache = MirrorCache::new();
        assert!(matches!(
            cache.apply(WatchEvent::Added(obj("a", 1, "red"))),
            Some(Delta::Added(_))
        ));
        assert!(matches!(
            cache.apply(WatchEvent::Modified(obj("a", 2, "blue"))),
            Some(Delta::Updated { .. })
        ));
        let deleted = cache.apply(WatchEvent::Deleted(obj("a", 3, "blue"))).unwrap();
        assert_eq!(deleted, Delta::Deleted(DeleteEvent::Object(obj("a", 3, "blue"))));
        assert!(cache.is_empty());

        // Deleting something never cached is a no-op.
        assert!(cache.apply(WatchEvent::Deleted(obj("z", 9, "red"))).is_none());
    }

    #[test]
    fn index_follows_changes() {
        let cache = MirrorCache::with_indexer(by_color());
        cache.replace(vec![obj("a", 1, "red"), obj("b", 2, "red"), obj("c", 3, "blue")]);
        assert_eq!(cache.by_index("red").len(), 2);

        cache.apply(WatchEvent::Modified(obj("a", 4, "blue")));
        let blue: Vec<String> = cache.by_index("blue").into_iter().map(|o| o.name).collect();
        assert_eq!(blue, vec!["a", "c"]);
        assert_eq!(cache.by_index("red").len(), 1);

        cache.apply(WatchEvent::Deleted(obj("b", 5, "red")));
        assert!(cache.by_index("red").is_empty());
    }

    #[test]
    fn index_without_indexer_is_empty() {
        let cache = MirrorCache::new();
        cache.replace(vec![obj("a", 1, "red")]);
        assert!(cache.by_index("red").is_empty());
    }

    #[test]
    fn synced_flag() {
        let cache = MirrorCache::new();
        let rx = cache.subscribe_synced();
        assert!(!cache.has_synced());
        cache.mark_synced();
        assert!(cache.has_synced());
        assert!(*rx.borrow());
    }
}
