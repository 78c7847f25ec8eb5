//! Inbound NAT pool reconciler
//!
//! A NAT pool has no API of its own: it is an element of the load balancer's
//! `inboundNatPools` collection. Every mutation therefore runs one
//! read-modify-write cycle against the whole load balancer while holding the
//! load balancer's lock:
//!
//! lock -> GET parent -> splice collection -> PUT parent -> poll
//! provisioningState -> GET parent -> unlock

use std::collections::HashMap;
use std::sync::Arc;

use cirrus_core::lock::{LockGuard, LockRegistry};
use cirrus_core::provider::{ProviderError, ProviderResult};
use cirrus_core::resource::{Resource, ResourceId, State, Value};
use cirrus_core::wait::cancellable;
use tokio_util::sync::CancellationToken;

use crate::client::{ArmError, LoadBalancerClient};
use crate::collection::{find_by_name, remove_element, replace_element};
use crate::config::PollConfig;
use crate::models::{
    FrontendIpConfiguration, InboundNatPool, InboundNatPoolProperties, LoadBalancer, SubResource,
    TransportProtocol,
};
use crate::resource_id::{
    AzureResourceId, FRONTEND_IP_CONFIGURATIONS, INBOUND_NAT_POOLS, LOAD_BALANCERS,
    ResourceIdError, load_balancer_lock_key, load_balancer_name_and_group,
};
use crate::schemas::nat_pool::{DesiredNatPool, RESOURCE_TYPE};

/// Where a NAT pool lives, parsed from its ARM ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatPoolAddress {
    pub resource_group: String,
    pub load_balancer_name: String,
    pub load_balancer_id: String,
    pub pool_name: String,
}

impl NatPoolAddress {
    pub fn parse(identifier: &str) -> ProviderResult<Self> {
        let invalid = |e: ResourceIdError| {
            ProviderError::validation(format!("invalid NAT pool ID {:?}", identifier)).with_cause(e)
        };

        let id = AzureResourceId::parse(identifier).map_err(invalid)?;
        let pool_name = id.require(INBOUND_NAT_POOLS).map_err(invalid)?.to_string();
        let load_balancer_name = id.require(LOAD_BALANCERS).map_err(invalid)?.to_string();
        let load_balancer_id = id.truncate_after(LOAD_BALANCERS).map_err(invalid)?.to_string();

        Ok(Self {
            resource_group: id.resource_group,
            load_balancer_name,
            load_balancer_id,
            pool_name,
        })
    }
}

/// Desired state identifying an existing NAT pool; needs no remote call
pub fn import_nat_pool(identifier: &str) -> ProviderResult<Resource> {
    let address = NatPoolAddress::parse(identifier)?;
    Ok(Resource::new(RESOURCE_TYPE, address.pool_name.as_str())
        .with_attribute("name", address.pool_name.as_str())
        .with_attribute("resource_group_name", address.resource_group.as_str())
        .with_attribute("loadbalancer_id", address.load_balancer_id.as_str()))
}

/// Reconciles `lb_nat_pool` resources against Azure Stack load balancers
pub struct NatPoolReconciler {
    client: Arc<dyn LoadBalancerClient>,
    locks: LockRegistry,
    poll: PollConfig,
    cancel: Option<CancellationToken>,
}

impl NatPoolReconciler {
    /// `locks` must be the registry shared by every reconciler that edits load balancers
    pub fn new(client: Arc<dyn LoadBalancerClient>, locks: LockRegistry, poll: PollConfig) -> Self {
        Self {
            client,
            locks,
            poll,
            cancel: None,
        }
    }

    /// Abort lock waits, remote calls and polling once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Create the NAT pool, or overwrite the one with the same name.
    ///
    /// Returns `State::not_found` when the load balancer no longer exists.
    pub async fn create_or_update(&self, desired: &DesiredNatPool) -> ProviderResult<State> {
        let id = ResourceId::new(RESOURCE_TYPE, desired.name.as_str());
        let pool_id = match self.apply(desired, &id).await {
            Ok(Some(pool_id)) => pool_id,
            Ok(None) => return Ok(State::not_found(id)),
            Err(e) => return Err(e.for_resource(id)),
        };

        self.read(&pool_id).await
    }

    /// Current state of the NAT pool identified by its ARM ID.
    pub async fn read(&self, identifier: &str) -> ProviderResult<State> {
        let address = NatPoolAddress::parse(identifier)?;
        let id = ResourceId::new(RESOURCE_TYPE, address.pool_name.as_str());

        let load_balancer = self
            .retrieve_load_balancer(&address.load_balancer_id)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        let Some(load_balancer) = load_balancer else {
            log::info!(
                "Load Balancer {:?} not found. Removing NAT pool {:?} from state",
                address.load_balancer_name,
                address.pool_name
            );
            return Ok(State::not_found(id));
        };

        let Some((_, pool)) = find_nat_pool_by_name(&load_balancer, &address.pool_name) else {
            log::info!(
                "NAT pool {:?} not found in Load Balancer {:?}. Removing from state",
                address.pool_name,
                address.load_balancer_name
            );
            return Ok(State::not_found(id));
        };

        Ok(State::existing(id, flatten_nat_pool(&address, pool)).with_identifier(identifier))
    }

    /// Remove the NAT pool. Succeeds when it, or its load balancer, is already gone.
    pub async fn delete(&self, identifier: &str) -> ProviderResult<()> {
        let address = NatPoolAddress::parse(identifier)?;
        let id = ResourceId::new(RESOURCE_TYPE, address.pool_name.as_str());
        self.remove(&address).await.map_err(|e| e.for_resource(id))
    }

    /// Minimal desired state reconstructed from a NAT pool ID
    pub fn import(&self, identifier: &str) -> ProviderResult<Resource> {
        import_nat_pool(identifier)
    }

    // =========================================================================
    // Read-modify-write cycles
    // =========================================================================

    /// Returns the ID the remote assigned to the pool, or `None` if the parent is gone
    async fn apply(
        &self,
        desired: &DesiredNatPool,
        id: &ResourceId,
    ) -> ProviderResult<Option<String>> {
        let lock_key = load_balancer_lock_key(&desired.loadbalancer_id)
            .map_err(|e| invalid_load_balancer_id(&desired.loadbalancer_id, e))?;
        let _lock = self.lock(&lock_key, "create_or_update").await?;

        let Some(mut load_balancer) = self.retrieve_load_balancer(&desired.loadbalancer_id).await?
        else {
            log::info!(
                "Load Balancer {:?} not found. Removing NAT pool {} from state",
                desired.loadbalancer_id,
                id
            );
            return Ok(None);
        };

        let pool = expand_nat_pool(desired, &load_balancer)?;
        let mut pools = load_balancer.inbound_nat_pools().to_vec();
        if replace_element(&mut pools, pool).is_some() {
            log::debug!("Replacing existing NAT pool {:?}", desired.name);
        }
        load_balancer
            .properties
            .get_or_insert_with(Default::default)
            .inbound_nat_pools = Some(pools);

        self.submit(&desired.loadbalancer_id, &load_balancer).await?;

        let refreshed = self
            .retrieve_load_balancer(&desired.loadbalancer_id)
            .await?
            .ok_or_else(|| {
                ProviderError::invariant(format!(
                    "Load Balancer {:?} not found after update",
                    desired.loadbalancer_id
                ))
            })?;
        if refreshed.id.is_none() {
            return Err(ProviderError::invariant(format!(
                "cannot read Load Balancer {:?}: ID is missing",
                desired.loadbalancer_id
            )));
        }
        let has_collection = refreshed
            .properties
            .as_ref()
            .is_some_and(|p| p.inbound_nat_pools.is_some());
        if !has_collection {
            return Err(ProviderError::invariant(format!(
                "Load Balancer {:?} has no inbound NAT pools after update",
                desired.loadbalancer_id
            )));
        }

        let pool_id = find_nat_pool_by_name(&refreshed, &desired.name)
            .and_then(|(_, pool)| pool.id.clone())
            .ok_or_else(|| {
                ProviderError::invariant(format!(
                    "cannot find created Load Balancer NAT pool ID {:?}",
                    desired.name
                ))
            })?;

        log::info!("NAT pool {:?} is {}", desired.name, pool_id);
        Ok(Some(pool_id))
    }

    async fn remove(&self, address: &NatPoolAddress) -> ProviderResult<()> {
        let lock_key = load_balancer_lock_key(&address.load_balancer_id)
            .map_err(|e| invalid_load_balancer_id(&address.load_balancer_id, e))?;
        let _lock = self.lock(&lock_key, "delete").await?;

        let Some(mut load_balancer) = self
            .retrieve_load_balancer(&address.load_balancer_id)
            .await?
        else {
            log::info!(
                "Load Balancer {:?} not found, NAT pool {:?} is already gone",
                address.load_balancer_name,
                address.pool_name
            );
            return Ok(());
        };

        let mut pools = load_balancer.inbound_nat_pools().to_vec();
        if remove_element(&mut pools, &address.pool_name).is_none() {
            log::info!(
                "NAT pool {:?} not found in Load Balancer {:?}, nothing to delete",
                address.pool_name,
                address.load_balancer_name
            );
            return Ok(());
        }
        load_balancer
            .properties
            .get_or_insert_with(Default::default)
            .inbound_nat_pools = Some(pools);

        self.submit(&address.load_balancer_id, &load_balancer).await?;

        let refreshed = self
            .retrieve_load_balancer(&address.load_balancer_id)
            .await?
            .ok_or_else(|| {
                ProviderError::invariant(format!(
                    "Load Balancer {:?} not found after removing NAT pool {:?}",
                    address.load_balancer_name, address.pool_name
                ))
            })?;
        if refreshed.id.is_none() {
            return Err(ProviderError::invariant(format!(
                "cannot read Load Balancer {:?}: ID is missing",
                address.load_balancer_name
            )));
        }

        log::info!(
            "Deleted NAT pool {:?} from Load Balancer {:?}",
            address.pool_name,
            address.load_balancer_name
        );
        Ok(())
    }

    // =========================================================================
    // Remote calls
    // =========================================================================

    async fn lock(&self, key: &str, operation: &str) -> ProviderResult<LockGuard> {
        cancellable(self.cancel.as_ref(), async {
            Ok(self.locks.acquire(key, operation).await)
        })
        .await
    }

    /// Fetch the whole load balancer; `None` when the remote reports it missing.
    pub async fn retrieve_load_balancer(
        &self,
        load_balancer_id: &str,
    ) -> ProviderResult<Option<LoadBalancer>> {
        let (resource_group, name) = split_load_balancer_id(load_balancer_id)?;

        cancellable(self.cancel.as_ref(), async {
            match self.client.get(&resource_group, &name).await {
                Ok(load_balancer) => Ok(Some(load_balancer)),
                Err(ArmError::NotFound) => Ok(None),
                Err(e) => Err(ProviderError::remote(format!(
                    "Error retrieving Load Balancer {:?} (Resource Group {:?})",
                    name, resource_group
                ))
                .with_cause(e)),
            }
        })
        .await
    }

    /// PUT the load balancer and wait for it to finish provisioning
    async fn submit(
        &self,
        load_balancer_id: &str,
        load_balancer: &LoadBalancer,
    ) -> ProviderResult<()> {
        let (resource_group, name) = split_load_balancer_id(load_balancer_id)?;

        log::debug!(
            "Updating Load Balancer {:?} (Resource Group {:?}) with {} NAT pool(s)",
            name,
            resource_group,
            load_balancer.inbound_nat_pools().len()
        );
        cancellable(self.cancel.as_ref(), async {
            self.client
                .create_or_update(&resource_group, &name, load_balancer)
                .await
                .map_err(|e| {
                    ProviderError::remote(format!(
                        "Error creating/updating Load Balancer {:?} (Resource Group {:?})",
                        name, resource_group
                    ))
                    .with_cause(e)
                })
        })
        .await?;

        let mut conf = self.poll.state_change_conf();
        if let Some(token) = &self.cancel {
            conf = conf.with_cancellation(token.clone());
        }
        conf.wait_for_state(|| self.provisioning_state(load_balancer_id))
            .await
            .map_err(|e| {
                let message = format!(
                    "Error waiting for completion of Load Balancer {:?} (Resource Group {:?}): {}",
                    name, resource_group, e.message
                );
                ProviderError { message, ..e }
            })?;

        Ok(())
    }

    async fn provisioning_state(&self, load_balancer_id: &str) -> ProviderResult<String> {
        let load_balancer = self
            .retrieve_load_balancer(load_balancer_id)
            .await?
            .ok_or_else(|| {
                ProviderError::not_found(format!(
                    "Load Balancer {:?} disappeared while provisioning",
                    load_balancer_id
                ))
            })?;

        load_balancer
            .provisioning_state()
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::remote(format!(
                    "Load Balancer {:?} reported no provisioning state",
                    load_balancer_id
                ))
            })
    }
}

fn invalid_load_balancer_id(id: &str, cause: ResourceIdError) -> ProviderError {
    ProviderError::validation(format!("invalid Load Balancer ID {:?}", id)).with_cause(cause)
}

/// (resource group, name) of a load balancer ID
fn split_load_balancer_id(id: &str) -> ProviderResult<(String, String)> {
    load_balancer_name_and_group(id).map_err(|e| invalid_load_balancer_id(id, e))
}

// =============================================================================
// Locating and building sub-resources
// =============================================================================

/// The NAT pool named `name` and its position in the load balancer's collection
pub fn find_nat_pool_by_name<'a>(
    load_balancer: &'a LoadBalancer,
    name: &str,
) -> Option<(usize, &'a InboundNatPool)> {
    find_by_name(load_balancer.inbound_nat_pools(), name)
}

pub fn find_frontend_ip_configuration_by_name<'a>(
    load_balancer: &'a LoadBalancer,
    name: &str,
) -> Option<(usize, &'a FrontendIpConfiguration)> {
    find_by_name(load_balancer.frontend_ip_configurations(), name)
}

/// Wire representation of `desired`, with its frontend IP configuration resolved
/// against `load_balancer`. The result carries no ID.
pub fn expand_nat_pool(
    desired: &DesiredNatPool,
    load_balancer: &LoadBalancer,
) -> ProviderResult<InboundNatPool> {
    let frontend_name = &desired.frontend_ip_configuration_name;
    let (_, frontend) = find_frontend_ip_configuration_by_name(load_balancer, frontend_name)
        .ok_or_else(|| {
            ProviderError::validation(format!(
                "Frontend IP Configuration {:?} not found in Load Balancer {:?}",
                frontend_name, desired.loadbalancer_id
            ))
        })?;

    Ok(InboundNatPool {
        name: Some(desired.name.clone()),
        properties: Some(InboundNatPoolProperties {
            frontend_ip_configuration: Some(SubResource {
                id: frontend.id.clone(),
            }),
            protocol: Some(desired.protocol.as_str().to_string()),
            frontend_port_range_start: Some(i32::from(desired.frontend_port_start)),
            frontend_port_range_end: Some(i32::from(desired.frontend_port_end)),
            backend_port: Some(i32::from(desired.backend_port)),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn flatten_nat_pool(address: &NatPoolAddress, pool: &InboundNatPool) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    attributes.insert("name".to_string(), Value::from(address.pool_name.as_str()));
    attributes.insert(
        "resource_group_name".to_string(),
        Value::from(address.resource_group.as_str()),
    );
    attributes.insert(
        "loadbalancer_id".to_string(),
        Value::from(address.load_balancer_id.as_str()),
    );

    let Some(props) = &pool.properties else {
        return attributes;
    };

    if let Some(protocol) = &props.protocol {
        let normalized = protocol
            .parse::<TransportProtocol>()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|_| protocol.clone());
        attributes.insert("protocol".to_string(), Value::String(normalized));
    }
    if let Some(port) = props.frontend_port_range_start {
        attributes.insert("frontend_port_start".to_string(), Value::from(port));
    }
    if let Some(port) = props.frontend_port_range_end {
        attributes.insert("frontend_port_end".to_string(), Value::from(port));
    }
    if let Some(port) = props.backend_port {
        attributes.insert("backend_port".to_string(), Value::from(port));
    }

    if let Some(frontend_id) = props
        .frontend_ip_configuration
        .as_ref()
        .and_then(|r| r.id.as_deref())
    {
        if let Some(name) = AzureResourceId::parse(frontend_id)
            .ok()
            .and_then(|id| id.get(FRONTEND_IP_CONFIGURATIONS).map(str::to_string))
        {
            attributes.insert("frontend_ip_configuration_name".to_string(), Value::String(name));
        }
        attributes.insert(
            "frontend_ip_configuration_id".to_string(),
            Value::from(frontend_id),
        );
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use cirrus_core::provider::ErrorKind;
    use serde_json::json;

    const LB_ID: &str =
        "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Network/loadBalancers/lb1";

    fn load_balancer() -> LoadBalancer {
        serde_json::from_value(json!({
            "id": LB_ID,
            "name": "lb1",
            "properties": {
                "frontendIPConfigurations": [
                    { "id": format!("{}/frontendIPConfigurations/feip1", LB_ID), "name": "feip1" },
                    { "id": format!("{}/frontendIPConfigurations/feip2", LB_ID), "name": "feip2" }
                ]
            }
        }))
        .unwrap()
    }

    fn desired(feip: &str) -> DesiredNatPool {
        DesiredNatPool {
            name: "pool1".to_string(),
            resource_group_name: "rg1".to_string(),
            loadbalancer_id: LB_ID.to_string(),
            protocol: TransportProtocol::Udp,
            frontend_port_start: 80,
            frontend_port_end: 81,
            backend_port: 3389,
            frontend_ip_configuration_name: feip.to_string(),
        }
    }

    #[test]
    fn parse_address() {
        let address = NatPoolAddress::parse(&format!("{}/inboundNatPools/pool1", LB_ID)).unwrap();
        assert_eq!(address.resource_group, "rg1");
        assert_eq!(address.load_balancer_name, "lb1");
        assert_eq!(address.load_balancer_id, LB_ID);
        assert_eq!(address.pool_name, "pool1");
    }

    #[test]
    fn parse_address_requires_pool_segment() {
        let err = NatPoolAddress::parse(LB_ID).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.to_string().contains("inboundNatPools"));
    }

    #[test]
    fn expand_resolves_frontend_reference() {
        let pool = expand_nat_pool(&desired("feip2"), &load_balancer()).unwrap();
        assert!(pool.id.is_none());
        assert_eq!(pool.name.as_deref(), Some("pool1"));

        let props = pool.properties.unwrap();
        assert_eq!(props.protocol.as_deref(), Some("Udp"));
        assert_eq!(props.frontend_port_range_start, Some(80));
        assert_eq!(props.frontend_port_range_end, Some(81));
        assert_eq!(props.backend_port, Some(3389));
        assert_eq!(
            props.frontend_ip_configuration.unwrap().id.unwrap(),
            format!("{}/frontendIPConfigurations/feip2", LB_ID)
        );
    }

    #[test]
    fn expand_rejects_unknown_frontend() {
        let err = expand_nat_pool(&desired("missing"), &load_balancer()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.message.contains("\"missing\""));
    }

    #[test]
    fn locate_sub_resources() {
        let lb = load_balancer();
        let (index, feip) = find_frontend_ip_configuration_by_name(&lb, "feip2").unwrap();
        assert_eq!(index, 1);
        assert_eq!(feip.name.as_deref(), Some("feip2"));
        assert!(find_nat_pool_by_name(&lb, "pool1").is_none());
    }

    #[test]
    fn flatten_projects_attributes() {
        let address = NatPoolAddress::parse(&format!("{}/inboundNatPools/pool1", LB_ID)).unwrap();
        let mut pool = expand_nat_pool(&desired("feip1"), &load_balancer()).unwrap();
        if let Some(props) = pool.properties.as_mut() {
            props.protocol = Some("udp".to_string());
        }

        let attributes = flatten_nat_pool(&address, &pool);
        assert_eq!(attributes["name"], Value::from("pool1"));
        assert_eq!(attributes["resource_group_name"], Value::from("rg1"));
        assert_eq!(attributes["loadbalancer_id"], Value::from(LB_ID));
        assert_eq!(attributes["protocol"], Value::from("Udp"));
        assert_eq!(attributes["frontend_port_start"], Value::Int(80));
        assert_eq!(attributes["backend_port"], Value::Int(3389));
        assert_eq!(attributes["frontend_ip_configuration_name"], Value::from("feip1"));
        assert_eq!(
            attributes["frontend_ip_configuration_id"],
            Value::String(format!("{}/frontendIPConfigurations/feip1", LB_ID))
        );
    }
}
