//! Node annotation collaborator.
//!
//! Publishes a node's pod CIDRs, health IPs and host IPs as annotations on
//! its node object, then clears the node's `NetworkUnavailable` condition.
//! The update runs as a named controller that retries with exponential
//! backoff until it succeeds or is removed.

pub mod annotation;
pub mod controller;
pub mod error;
pub mod node;

pub use annotation::{
    NodeAnnotation, ANNOTATION_V4_CIDR, ANNOTATION_V4_HEALTH_IP, ANNOTATION_V4_HOST_IP,
    ANNOTATION_V6_CIDR, ANNOTATION_V6_HEALTH_IP, ANNOTATION_V6_HOST_IP,
};
pub use controller::{ControllerFn, ControllerManager, ControllerParams, ControllerStatus, RetryConfig};
pub use error::{AnnotateError, AnnotateResult};
pub use node::{
    set_node_network_available, update_node_annotation, NodeAnnotator, NETWORK_UNAVAILABLE,
    UPDATE_NODE_ANNOTATIONS,
};
