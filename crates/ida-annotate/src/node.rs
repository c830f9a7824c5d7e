use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use ida_store::{Context, ObjectStore, PatchBody, StoredObject, Subresource};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::annotation::NodeAnnotation;
use crate::controller::{ControllerManager, ControllerParams, RetryConfig};
use crate::error::{AnnotateError, AnnotateResult};

/// Controller name used by [`NodeAnnotator::annotate_node`].
pub const UPDATE_NODE_ANNOTATIONS: &str = "update-node-annotations";

/// Node condition cleared once networking is set up.
pub const NETWORK_UNAVAILABLE: &str = "NetworkUnavailable";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
    reason: String,
    message: String,
    last_transition_time: String,
    last_heartbeat_time: String,
}

/// Merge `annotation` into the node's `metadata.annotations`.
///
/// Does nothing when no field is set.
pub async fn update_node_annotation(
    store: &dyn ObjectStore,
    ctx: &Context,
    node_name: &str,
    annotation: &NodeAnnotation,
) -> AnnotateResult<()> {
    let annotations = annotation.annotations();
    if annotations.is_empty() {
        return Ok(());
    }
    let patch = PatchBody::Merge(json!({ "metadata": { "annotations": annotations } }));
    store
        .patch(ctx, node_name, &patch, Subresource::Main)
        .await?;
    Ok(())
}

/// Set the node's `NetworkUnavailable` condition to `False`.
///
/// Written through the status subresource when the store has one, else as
/// a full update.
pub async fn set_node_network_available(
    store: &dyn ObjectStore,
    ctx: &Context,
    node_name: &str,
) -> AnnotateResult<()> {
    let node = store.get(ctx, node_name).await?;
    let updated = with_network_available(node)?;

    if store.capabilities().update_status {
        match store.update_status(ctx, updated.clone()).await {
            Ok(_) => return Ok(()),
            Err(err) if err.is_unsupported() => {}
            Err(err) => return Err(err.into()),
        }
    }
    store.update(ctx, updated).await?;
    Ok(())
}

fn with_network_available(mut node: StoredObject) -> AnnotateResult<StoredObject> {
    let invalid = |reason: &str| AnnotateError::InvalidNode {
        name: node.name.clone(),
        reason: reason.to_string(),
    };
    let now = Utc::now().to_rfc3339();
    let condition = NodeCondition {
        kind: NETWORK_UNAVAILABLE.into(),
        status: "False".into(),
        reason: "NetworkReady".into(),
        message: "node network is configured".into(),
        last_transition_time: now.clone(),
        last_heartbeat_time: now,
    };
    let condition = serde_json::to_value(&condition)
        .map_err(|e| AnnotateError::Serialization(e.to_string()))?;

    let doc = node
        .data
        .as_object_mut()
        .ok_or_else(|| invalid("document is not an object"))?;
    let status = doc
        .entry("status")
        .or_insert_with(|| json!({}));
    if status.is_null() {
        *status = json!({});
    }
    let status = status
        .as_object_mut()
        .ok_or_else(|| invalid("status is not an object"))?;
    let conditions = status
        .entry("conditions")
        .or_insert_with(|| Value::Array(Vec::new()));
    let conditions = conditions
        .as_array_mut()
        .ok_or_else(|| invalid("status.conditions is not an array"))?;

    match conditions
        .iter_mut()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(NETWORK_UNAVAILABLE))
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
    Ok(node)
}

/// Publishes node addressing through a retried controller.
pub struct NodeAnnotator {
    store: Arc<dyn ObjectStore>,
    manager: Arc<ControllerManager>,
    retry: RetryConfig,
}

impl NodeAnnotator {
    pub fn new(store: Arc<dyn ObjectStore>, manager: Arc<ControllerManager>) -> Self {
        Self {
            store,
            manager,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn manager(&self) -> &Arc<ControllerManager> {
        &self.manager
    }

    /// Start (or restart) the controller that annotates `node_name` and then
    /// marks its network available. Returns immediately; progress is visible
    /// through the controller status.
    pub fn annotate_node(&self, node_name: &str, annotation: NodeAnnotation) {
        debug!(node = node_name, ?annotation, "updating node annotations");

        let store = self.store.clone();
        let node_name = node_name.to_string();
        let annotation = Arc::new(annotation);
        let params = ControllerParams::new(move |token| {
            let store = store.clone();
            let node_name = node_name.clone();
            let annotation = annotation.clone();
            async move {
                let ctx = Context::with_cancellation(token);
                if let Err(err) =
                    update_node_annotation(store.as_ref(), &ctx, &node_name, &annotation).await
                {
                    warn!(node = %node_name, error = %err, "unable to patch node with annotations");
                    return Err(err);
                }
                set_node_network_available(store.as_ref(), &ctx, &node_name).await
            }
            .boxed()
        })
        .with_retry(self.retry.clone());

        self.manager.update_controller(UPDATE_NODE_ANNOTATIONS, params);
    }
}
