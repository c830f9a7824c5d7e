use ida_store::StoredObject;

/// A deletion as seen by the cache.
#[derive(Clone, Debug, PartialEq)]
pub enum DeleteEvent {
    /// Observed on the watch stream; the object is its final state.
    Object(StoredObject),
    /// Discovered on relist: the object vanished while no watch was open, so
    /// its final state is unknown. `last_known` is what the cache last held.
    Tombstone { key: String, last_known: StoredObject },
}

impl DeleteEvent {
    pub fn key(&self) -> &str {
        match self {
            Self::Object(obj) => &obj.name,
            Self::Tombstone { key, .. } => key,
        }
    }

    /// The deleted object, unwrapping a tombstone.
    pub fn object(&self) -> &StoredObject {
        match self {
            Self::Object(obj) => obj,
            Self::Tombstone { last_known, .. } => last_known,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone { .. })
    }
}

/// Receives cache changes in the order the informer applies them.
///
/// Callbacks run on the informer task and should not block.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, object: &StoredObject);

    fn on_update(&self, old: &StoredObject, new: &StoredObject);

    fn on_delete(&self, event: &DeleteEvent);
}
