use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Listen address. Port 0 picks a free port.
    pub bind_addr: SocketAddr,
    /// How long to wait for the responder to answer its first probe.
    pub ready_timeout_ms: u64,
    /// Pause between readiness probes.
    pub probe_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ready_timeout_ms: 5_000,
            probe_interval_ms: 100,
        }
    }
}

impl HealthConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Health addresses of the local node, published to other nodes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAddressing {
    pub node_name: String,
    pub v4_health_ip: Option<Ipv4Addr>,
    pub v6_health_ip: Option<Ipv6Addr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = HealthConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:0".parse::<SocketAddr>().unwrap());
        assert_eq!(c.ready_timeout(), Duration::from_secs(5));
        assert_eq!(c.probe_interval(), Duration::from_millis(100));
    }
}
