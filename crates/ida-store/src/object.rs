use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named JSON document as held by the store.
///
/// `resource_version` is assigned by the store on every mutation from a
/// single store-wide counter, so it orders all writes. When passed to an
/// update, a non-zero value acts as an optimistic-concurrency guard; zero
/// means "unconditional".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    pub name: String,
    pub resource_version: u64,
    pub data: Value,
}

impl StoredObject {
    /// Wrap a document for submission. The store assigns the version.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            resource_version: 0,
            data,
        }
    }

    /// Same document, guarded by `resource_version` on update.
    pub fn with_resource_version(mut self, resource_version: u64) -> Self {
        self.resource_version = resource_version;
        self
    }

    /// The `status` member of the document, if present and not null.
    pub fn status(&self) -> Option<&Value> {
        self.data.get("status").filter(|v| !v.is_null())
    }
}

/// Snapshot returned by a list call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectList {
    /// Objects in name order.
    pub items: Vec<StoredObject>,
    /// Store resource version the snapshot was taken at. A watch started
    /// from this version delivers exactly the mutations after the snapshot.
    pub resource_version: u64,
}

/// Which part of an object a patch targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subresource {
    /// The whole object.
    Main,
    /// Only the `status` member.
    Status,
}

/// Optional features a store may lack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Conditional JSON / merge patch.
    pub patch: bool,
    /// A dedicated status subresource (`update_status`, status patches).
    pub update_status: bool,
}

impl Capabilities {
    /// Everything supported.
    pub const fn full() -> Self {
        Self {
            patch: true,
            update_status: true,
        }
    }

    /// Only plain create/get/list/update/delete/watch.
    pub const fn minimal() -> Self {
        Self {
            patch: false,
            update_status: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}
