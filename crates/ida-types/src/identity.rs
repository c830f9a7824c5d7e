use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::id::IdentityId;
use crate::labels::LabelMap;

/// Object metadata persisted alongside every identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Decimal string of the numeric identity.
    pub name: String,
    /// Discoverable labels: the governing source's labels, prefix stripped.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: LabelMap,
    /// Store-assigned unique ID for this incarnation of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Store generation counter of the copy this metadata was read from.
    /// Zero means "unconditional" when writing.
    #[serde(skip)]
    pub resource_version: u64,
}

/// Node references recorded on an identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStatus {
    /// Node name -> last time that node refreshed its reference.
    #[serde(default)]
    pub nodes: BTreeMap<String, DateTime<Utc>>,
}

/// The persisted identity: `metadata`, `securityLabels`, `status`.
///
/// `security_labels` is the canonical label set the identity was allocated
/// for and never changes after creation. `status` is absent until some node
/// records a reference through the status subresource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityObject {
    pub metadata: ObjectMeta,
    pub security_labels: LabelMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IdentityStatus>,
}

impl IdentityObject {
    /// Build a fresh identity with no node references.
    pub fn new(id: IdentityId, security_labels: LabelMap, labels: LabelMap) -> Self {
        Self {
            metadata: ObjectMeta {
                name: id.to_string(),
                labels,
                uid: None,
                resource_version: 0,
            },
            security_labels,
            status: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Parse the object name as a numeric identity.
    pub fn id(&self) -> Result<IdentityId, TypeError> {
        self.metadata.name.parse()
    }

    /// Timestamp of `node`'s reference, if any.
    pub fn node_ref(&self, node: &str) -> Option<&DateTime<Utc>> {
        self.status.as_ref().and_then(|s| s.nodes.get(node))
    }

    pub fn has_node_ref(&self, node: &str) -> bool {
        self.node_ref(node).is_some()
    }

    /// Iterate `(node, timestamp)` pairs in node-name order.
    pub fn node_refs(&self) -> impl Iterator<Item = (&String, &DateTime<Utc>)> {
        self.status.iter().flat_map(|s| s.nodes.iter())
    }

    pub fn node_ref_count(&self) -> usize {
        self.status.as_ref().map_or(0, |s| s.nodes.len())
    }

    /// Record or refresh `node`'s reference.
    pub fn set_node_ref(&mut self, node: &str, at: DateTime<Utc>) {
        self.status
            .get_or_insert_with(IdentityStatus::default)
            .nodes
            .insert(node.to_string(), at);
    }

    /// Drop `node`'s reference. Returns `true` if it was present.
    pub fn remove_node_ref(&mut self, node: &str) -> bool {
        self.status
            .as_mut()
            .is_some_and(|s| s.nodes.remove(node).is_some())
    }

    /// Serialize to the JSON document stored in the object store.
    pub fn to_value(&self) -> Result<Value, TypeError> {
        serde_json::to_value(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode a stored JSON document. `name` is only used in the error.
    pub fn from_value(name: &str, value: &Value) -> Result<Self, TypeError> {
        Self::deserialize(value).map_err(|e| TypeError::Decode {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> LabelMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample() -> IdentityObject {
        IdentityObject::new(
            IdentityId::new(1001),
            labels(&[("k8s:app", "web"), ("custom:x", "1")]),
            labels(&[("app", "web")]),
        )
    }

    #[test]
    fn new_identity_has_no_status() {
        let identity = sample();
        assert_eq!(identity.name(), "1001");
        assert_eq!(identity.id().unwrap(), IdentityId::new(1001));
        assert!(identity.status.is_none());
        assert_eq!(identity.node_ref_count(), 0);
    }

    #[test]
    fn set_and_remove_node_refs() {
        let mut identity = sample();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        identity.set_node_ref("node-a", t);
        identity.set_node_ref("node-b", t);
        assert!(identity.has_node_ref("node-a"));
        assert_eq!(identity.node_ref_count(), 2);

        assert!(identity.remove_node_ref("node-a"));
        assert!(!identity.remove_node_ref("node-a"));
        assert!(!identity.has_node_ref("node-a"));
        assert!(identity.has_node_ref("node-b"));
    }

    #[test]
    fn remove_without_status_is_false() {
        let mut identity = sample();
        assert!(!identity.remove_node_ref("node-a"));
    }

    #[test]
    fn wire_shape_uses_camel_case() {
        let mut identity = sample();
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        identity.set_node_ref("node-a", t);
        let value = identity.to_value().unwrap();

        assert_eq!(value["metadata"]["name"], json!("1001"));
        assert_eq!(value["metadata"]["labels"]["app"], json!("web"));
        assert_eq!(value["securityLabels"]["custom:x"], json!("1"));
        assert_eq!(value["status"]["nodes"]["node-a"], json!("2024-05-01T12:00:00Z"));
        assert!(value["metadata"].get("resourceVersion").is_none());
    }

    #[test]
    fn absent_status_is_omitted() {
        let value = sample().to_value().unwrap();
        assert!(value.get("status").is_none());
    }

    #[test]
    fn decode_round_trip() {
        let identity = sample();
        let value = identity.to_value().unwrap();
        let decoded = IdentityObject::from_value("1001", &value).unwrap();
        assert_eq!(decoded, identity);
    }

    #[test]
    fn decode_rejects_missing_security_labels() {
        let value = json!({ "metadata": { "name": "12" } });
        let err = IdentityObject::from_value("12", &value).unwrap_err();
        assert!(matches!(err, TypeError::Decode { ref name, .. } if name == "12"));
    }

    #[test]
    fn decode_accepts_null_status() {
        let value = json!({
            "metadata": { "name": "12" },
            "securityLabels": { "k8s:app": "db" },
            "status": null,
        });
        let decoded = IdentityObject::from_value("12", &value).unwrap();
        assert!(decoded.status.is_none());
    }
}
