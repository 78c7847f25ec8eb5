//! ARM wire models for `Microsoft.Network/loadBalancers` (api-version 2017-10-01)
//!
//! Only the fields this provider reads or writes are modelled. Everything
//! else is kept in the `extra` maps so a fetched load balancer can be written
//! back without dropping properties owned by other resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A load balancer as returned by GET and accepted by PUT
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<LoadBalancerProperties>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerProperties {
    #[serde(
        rename = "frontendIPConfigurations",
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_ip_configurations: Option<Vec<FrontendIpConfiguration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound_nat_pools: Option<Vec<InboundNatPool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundNatPool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<InboundNatPoolProperties>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundNatPoolProperties {
    #[serde(
        rename = "frontendIPConfiguration",
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_ip_configuration: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_port_range_start: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_port_range_end: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

/// Reference to another ARM resource by ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl LoadBalancer {
    pub fn provisioning_state(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.provisioning_state.as_deref())
    }

    pub fn inbound_nat_pools(&self) -> &[InboundNatPool] {
        self.properties
            .as_ref()
            .and_then(|p| p.inbound_nat_pools.as_deref())
            .unwrap_or(&[])
    }

    pub fn frontend_ip_configurations(&self) -> &[FrontendIpConfiguration] {
        self.properties
            .as_ref()
            .and_then(|p| p.frontend_ip_configurations.as_deref())
            .unwrap_or(&[])
    }
}

/// Transport protocol of a NAT pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    pub const ALL: [TransportProtocol; 2] = [TransportProtocol::Tcp, TransportProtocol::Udp];

    /// Canonical ARM spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "Tcp",
            TransportProtocol::Udp => "Udp",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportProtocol {
    type Err = String;

    /// Case-insensitive: "tcp", "TCP" and "Tcp" all parse to `Tcp`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid protocol '{}', expected one of: Tcp, Udp", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> JsonValue {
        json!({
            "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/lb1",
            "name": "lb1",
            "location": "local",
            "etag": "W/\"abc\"",
            "type": "Microsoft.Network/loadBalancers",
            "properties": {
                "provisioningState": "Succeeded",
                "frontendIPConfigurations": [{
                    "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/lb1/frontendIPConfigurations/feip1",
                    "name": "feip1",
                    "properties": { "privateIPAllocationMethod": "Dynamic" }
                }],
                "inboundNatPools": [{
                    "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/lb1/inboundNatPools/pool1",
                    "name": "pool1",
                    "etag": "W/\"abc\"",
                    "properties": {
                        "frontendIPConfiguration": {
                            "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/lb1/frontendIPConfigurations/feip1"
                        },
                        "protocol": "Tcp",
                        "frontendPortRangeStart": 50000,
                        "frontendPortRangeEnd": 50100,
                        "backendPort": 22,
                        "provisioningState": "Succeeded"
                    }
                }],
                "loadBalancingRules": [],
                "probes": []
            }
        })
    }

    #[test]
    fn deserialize_load_balancer() {
        let lb: LoadBalancer = serde_json::from_value(sample()).unwrap();

        assert_eq!(lb.name.as_deref(), Some("lb1"));
        assert_eq!(lb.provisioning_state(), Some("Succeeded"));
        assert_eq!(lb.frontend_ip_configurations()[0].name.as_deref(), Some("feip1"));

        let pool = &lb.inbound_nat_pools()[0];
        let props = pool.properties.as_ref().unwrap();
        assert_eq!(props.protocol.as_deref(), Some("Tcp"));
        assert_eq!(props.frontend_port_range_start, Some(50000));
        assert_eq!(props.frontend_port_range_end, Some(50100));
        assert_eq!(props.backend_port, Some(22));
    }

    #[test]
    fn unmodelled_fields_survive_resubmission() {
        let lb: LoadBalancer = serde_json::from_value(sample()).unwrap();
        let written = serde_json::to_value(&lb).unwrap();

        assert_eq!(written["etag"], "W/\"abc\"");
        assert_eq!(written["type"], "Microsoft.Network/loadBalancers");
        assert_eq!(written["properties"]["loadBalancingRules"], json!([]));
        assert_eq!(
            written["properties"]["frontendIPConfigurations"][0]["properties"]["privateIPAllocationMethod"],
            "Dynamic"
        );
    }

    #[test]
    fn missing_collections_read_as_empty() {
        let lb: LoadBalancer = serde_json::from_value(json!({ "name": "lb1" })).unwrap();
        assert!(lb.inbound_nat_pools().is_empty());
        assert!(lb.frontend_ip_configurations().is_empty());
        assert_eq!(lb.provisioning_state(), None);
    }

    #[test]
    fn new_pool_serializes_without_id() {
        let pool = InboundNatPool {
            name: Some("pool1".to_string()),
            properties: Some(InboundNatPoolProperties {
                protocol: Some("Udp".to_string()),
                backend_port: Some(53),
                ..Default::default()
            }),
            ..Default::default()
        };

        let written = serde_json::to_value(&pool).unwrap();
        assert_eq!(
            written,
            json!({ "name": "pool1", "properties": { "protocol": "Udp", "backendPort": 53 } })
        );
    }

    #[test]
    fn protocol_parses_case_insensitively() {
        assert_eq!("tcp".parse::<TransportProtocol>(), Ok(TransportProtocol::Tcp));
        assert_eq!("TCP".parse::<TransportProtocol>(), Ok(TransportProtocol::Tcp));
        assert_eq!("Udp".parse::<TransportProtocol>(), Ok(TransportProtocol::Udp));
        assert!("icmp".parse::<TransportProtocol>().is_err());
        assert_eq!(TransportProtocol::Udp.to_string(), "Udp");
    }
}
