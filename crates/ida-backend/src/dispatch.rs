use std::marker::PhantomData;
use std::sync::Arc;

use ida_cache::{DeleteEvent, EventHandler};
use ida_store::StoredObject;
use ida_types::{AllocatorKey, IdentityId, IdentityObject, TypeError};
use tracing::warn;

use crate::traits::CacheMutations;

/// A stored object, decoded.
#[derive(Clone, Debug, PartialEq)]
pub enum Decoded<K> {
    Identity { id: IdentityId, key: K },
    Invalid(TypeError),
}

/// Decode a stored identity into its numeric ID and key.
pub fn decode_identity<K: AllocatorKey>(object: &StoredObject) -> Decoded<K> {
    let identity = match IdentityObject::from_value(&object.name, &object.data) {
        Ok(identity) => identity,
        Err(err) => return Decoded::Invalid(err),
    };
    match identity.id() {
        Ok(id) => Decoded::Identity {
            id,
            key: K::from_label_map(identity.security_labels),
        },
        Err(err) => Decoded::Invalid(err),
    }
}

/// Forwards cache events to [`CacheMutations`] as `(id, key)` pairs.
pub struct IdentityDispatcher<K> {
    handler: Arc<dyn CacheMutations<K>>,
    _key: PhantomData<fn() -> K>,
}

impl<K: AllocatorKey> IdentityDispatcher<K> {
    pub fn new(handler: Arc<dyn CacheMutations<K>>) -> Self {
        Self {
            handler,
            _key: PhantomData,
        }
    }

    fn forward(&self, event: &'static str, object: &StoredObject, f: impl FnOnce(IdentityId, K)) {
        match decode_identity::<K>(object) {
            Decoded::Identity { id, key } => f(id, key),
            Decoded::Invalid(err) => warn!(
                object = %object.name,
                event,
                error = %err,
                "dropping identity event that does not decode"
            ),
        }
    }
}

impl<K: AllocatorKey> EventHandler for IdentityDispatcher<K> {
    fn on_add(&self, object: &StoredObject) {
        self.forward("add", object, |id, key| self.handler.on_add(id, key));
    }

    fn on_update(&self, _old: &StoredObject, new: &StoredObject) {
        self.forward("modify", new, |id, key| self.handler.on_modify(id, key));
    }

    fn on_delete(&self, event: &DeleteEvent) {
        self.forward("delete", event.object(), |id, key| {
            self.handler.on_delete(id, key)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ida_types::LabelKey;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<(String, u64, String)>>);

    impl CacheMutations<LabelKey> for Calls {
        fn on_list_done(&self) {}

        fn on_add(&self, id: IdentityId, key: LabelKey) {
            self.0.lock().unwrap().push(("add".into(), id.get(), key.to_string()));
        }

        fn on_modify(&self, id: IdentityId, key: LabelKey) {
            self.0.lock().unwrap().push(("modify".into(), id.get(), key.to_string()));
        }

        fn on_delete(&self, id: IdentityId, key: LabelKey) {
            self.0.lock().unwrap().push(("delete".into(), id.get(), key.to_string()));
        }
    }

    fn identity(name: &str) -> StoredObject {
        StoredObject::new(
            name,
            json!({
                "metadata": { "name": name },
                "securityLabels": { "k8s:app": "web" },
            }),
        )
    }

    #[test]
    fn decodes_name_and_labels() {
        match decode_identity::<LabelKey>(&identity("4242")) {
            Decoded::Identity { id, key } => {
                assert_eq!(id, IdentityId::new(4242));
                assert_eq!(key, LabelKey::from_pairs([("k8s:app", "web")]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_numeric_name_is_invalid() {
        assert!(matches!(
            decode_identity::<LabelKey>(&identity("web")),
            Decoded::Invalid(TypeError::InvalidId { .. })
        ));
    }

    #[test]
    fn invalid_decode_can_be_cloned() {
        let decoded = decode_identity::<LabelKey>(&identity("web"));
        let copy = decoded.clone();
        assert_eq!(copy, decoded);
        match copy {
            Decoded::Invalid(err) => assert!(err.to_string().contains("web")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_document_is_invalid() {
        let obj = StoredObject::new("5", json!({ "securityLabels": "nope" }));
        assert!(matches!(
            decode_identity::<LabelKey>(&obj),
            Decoded::Invalid(TypeError::Decode { .. })
        ));
    }

    #[test]
    fn dispatch_unwraps_tombstones_and_drops_invalid() {
        let calls = Arc::new(Calls::default());
        let dispatcher = IdentityDispatcher::<LabelKey>::new(calls.clone());

        dispatcher.on_add(&identity("1"));
        dispatcher.on_add(&identity("not-a-number"));
        dispatcher.on_update(&identity("1"), &identity("1"));
        dispatcher.on_delete(&DeleteEvent::Tombstone {
            key: "1".into(),
            last_known: identity("1"),
        });

        let calls = calls.0.lock().unwrap().clone();
        let kinds: Vec<(&str, u64)> = calls.iter().map(|(k, id, _)| (k.as_str(), *id)).collect();
        assert_eq!(kinds, vec![("add", 1), ("modify", 1), ("delete", 1)]);
        assert_eq!(calls[0].2, "k8s:app=web;");
    }
}
