use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};

pub const ANNOTATION_V4_CIDR: &str = "network.ida.dev/ipv4-pod-cidr";
pub const ANNOTATION_V6_CIDR: &str = "network.ida.dev/ipv6-pod-cidr";
pub const ANNOTATION_V4_HEALTH_IP: &str = "network.ida.dev/ipv4-health-ip";
pub const ANNOTATION_V6_HEALTH_IP: &str = "network.ida.dev/ipv6-health-ip";
pub const ANNOTATION_V4_HOST_IP: &str = "network.ida.dev/ipv4-host-ip";
pub const ANNOTATION_V6_HOST_IP: &str = "network.ida.dev/ipv6-host-ip";

/// Addressing published on a node object. Unset fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeAnnotation {
    pub v4_cidr: Option<Ipv4Net>,
    pub v6_cidr: Option<Ipv6Net>,
    pub v4_health_ip: Option<Ipv4Addr>,
    pub v6_health_ip: Option<Ipv6Addr>,
    pub v4_host_ip: Option<Ipv4Addr>,
    pub v6_host_ip: Option<Ipv6Addr>,
}

impl NodeAnnotation {
    /// Annotation key -> value for every set field.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let fields: [(&str, Option<String>); 6] = [
            (ANNOTATION_V4_CIDR, self.v4_cidr.map(|c| c.to_string())),
            (ANNOTATION_V6_CIDR, self.v6_cidr.map(|c| c.to_string())),
            (ANNOTATION_V4_HEALTH_IP, self.v4_health_ip.map(|ip| ip.to_string())),
            (ANNOTATION_V6_HEALTH_IP, self.v6_health_ip.map(|ip| ip.to_string())),
            (ANNOTATION_V4_HOST_IP, self.v4_host_ip.map(|ip| ip.to_string())),
            (ANNOTATION_V6_HOST_IP, self.v6_host_ip.map(|ip| ip.to_string())),
        ];
        fields
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_set_fields_are_annotated() {
        let annotation = NodeAnnotation {
            v4_cidr: Some("10.0.1.0/24".parse().unwrap()),
            v6_health_ip: Some("fd00::7".parse().unwrap()),
            ..Default::default()
        };
        let map = annotation.annotations();
        assert_eq!(map.len(), 2);
        assert_eq!(map[ANNOTATION_V4_CIDR], "10.0.1.0/24");
        assert_eq!(map[ANNOTATION_V6_HEALTH_IP], "fd00::7");
        assert!(!annotation.is_empty());
    }

    #[test]
    fn empty_annotation() {
        let annotation = NodeAnnotation::default();
        assert!(annotation.is_empty());
        assert!(annotation.annotations().is_empty());
    }
}
