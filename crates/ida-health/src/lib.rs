//! Node health endpoint.
//!
//! [`launch_as_endpoint`] starts an HTTP responder and hands back an owned
//! [`HealthEndpoint`]. Liveness probes go through that handle, and consuming
//! or dropping it shuts the responder down. There is no process-wide client.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod router;

pub use config::{HealthConfig, NodeAddressing};
pub use endpoint::{launch_as_endpoint, ping_addr, HealthEndpoint};
pub use error::{HealthError, HealthResult};
pub use router::{build_router, HelloResponse, HELLO_PATH};
