//! lb_nat_pool schema definition

use cirrus_core::provider::{ProviderError, ProviderResult};
use cirrus_core::resource::{Resource, Value};
use cirrus_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types};

use crate::models::TransportProtocol;

pub const RESOURCE_TYPE: &str = "lb_nat_pool";

/// Protocol type accepting "Tcp"/"Udp" in any casing
pub fn transport_protocol() -> AttributeType {
    AttributeType::Custom {
        name: "TransportProtocol".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => s.parse::<TransportProtocol>().map(|_| ()),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Returns the schema for lb_nat_pool (Microsoft.Network/loadBalancers/inboundNatPools)
pub fn nat_pool_schema() -> ResourceSchema {
    ResourceSchema::new(RESOURCE_TYPE)
        .with_description("An inbound NAT pool of an Azure Stack load balancer, translating a frontend port range to a backend port on scale set instances.")
        .attribute(
            AttributeSchema::new("name", types::non_empty_string())
                .required()
                .force_new()
                .with_description("Name of the NAT pool, unique within the load balancer."),
        )
        .attribute(
            AttributeSchema::new("resource_group_name", types::non_empty_string())
                .required()
                .force_new()
                .with_description("Resource group of the load balancer."),
        )
        .attribute(
            AttributeSchema::new("loadbalancer_id", types::non_empty_string())
                .required()
                .force_new()
                .with_description("ID of the load balancer owning the NAT pool."),
        )
        .attribute(
            AttributeSchema::new("protocol", transport_protocol())
                .required()
                .with_description("Transport protocol: Tcp or Udp (case-insensitive)."),
        )
        .attribute(
            AttributeSchema::new("frontend_port_start", types::port_number())
                .required()
                .with_description("First port of the frontend port range."),
        )
        .attribute(
            AttributeSchema::new("frontend_port_end", types::port_number())
                .required()
                .with_description("Last port of the frontend port range."),
        )
        .attribute(
            AttributeSchema::new("backend_port", types::port_number())
                .required()
                .with_description("Port used for connections on the backend."),
        )
        .attribute(
            AttributeSchema::new("frontend_ip_configuration_name", types::non_empty_string())
                .required()
                .with_description("Name of the load balancer frontend IP configuration to use."),
        )
        .attribute(
            AttributeSchema::new("frontend_ip_configuration_id", AttributeType::String)
                .computed()
                .with_description("ID of the frontend IP configuration the pool is bound to, resolved from frontend_ip_configuration_name."),
        )
}

/// Validated desired state of one NAT pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredNatPool {
    pub name: String,
    pub resource_group_name: String,
    pub loadbalancer_id: String,
    pub protocol: TransportProtocol,
    pub frontend_port_start: u16,
    pub frontend_port_end: u16,
    pub backend_port: u16,
    pub frontend_ip_configuration_name: String,
}

impl TryFrom<&Resource> for DesiredNatPool {
    type Error = ProviderError;

    fn try_from(resource: &Resource) -> ProviderResult<Self> {
        if let Err(errors) = nat_pool_schema().validate(&resource.attributes) {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            return Err(
                ProviderError::validation(messages.join("; ")).for_resource(resource.id.clone()),
            );
        }

        let string = |key: &str| -> ProviderResult<String> {
            resource.get_str(key).map(str::to_string).ok_or_else(|| {
                ProviderError::validation(format!("'{}' must be a string", key))
                    .for_resource(resource.id.clone())
            })
        };
        let port = |key: &str| -> ProviderResult<u16> {
            resource
                .get_int(key)
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| {
                    ProviderError::validation(format!("'{}' must be a port number", key))
                        .for_resource(resource.id.clone())
                })
        };

        let protocol = string("protocol")?
            .parse::<TransportProtocol>()
            .map_err(|msg| ProviderError::validation(msg).for_resource(resource.id.clone()))?;

        Ok(Self {
            name: string("name")?,
            resource_group_name: string("resource_group_name")?,
            loadbalancer_id: string("loadbalancer_id")?,
            protocol,
            frontend_port_start: port("frontend_port_start")?,
            frontend_port_end: port("frontend_port_end")?,
            backend_port: port("backend_port")?,
            frontend_ip_configuration_name: string("frontend_ip_configuration_name")?,
        })
    }
}
