use ida_cache::InformerConfig;
use ida_types::LABEL_SOURCE_K8S;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Name recorded in `status.nodes` for references held by this process.
    pub node_name: String,
    /// Label source whose labels are copied, prefix stripped, onto object
    /// metadata.
    pub label_source: String,
    pub informer: InformerConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            node_name: "localhost".into(),
            label_source: LABEL_SOURCE_K8S.into(),
            informer: InformerConfig::default(),
        }
    }
}

impl BackendConfig {
    pub fn for_node(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            ..Default::default()
        }
    }
}
