//! Azure Stack Provider

use std::sync::Arc;

use cirrus_core::lock::LockRegistry;
use cirrus_core::provider::{ProviderError, ProviderResult};
use cirrus_core::resource::{Resource, ResourceId, State};
use tokio_util::sync::CancellationToken;

use crate::client::{ArmClient, LoadBalancerClient};
use crate::config::{AzureStackConfig, PollConfig};
use crate::nat_pool::NatPoolReconciler;
use crate::schemas::nat_pool::{DesiredNatPool, RESOURCE_TYPE};

/// Azure Stack Provider
pub struct AzureStackProvider {
    nat_pools: NatPoolReconciler,
}

impl AzureStackProvider {
    /// Create a provider talking to the configured ARM endpoint
    pub fn new(config: &AzureStackConfig, locks: LockRegistry) -> ProviderResult<Self> {
        let client = ArmClient::new(config).map_err(|e| {
            ProviderError::validation("Failed to build ARM client").with_cause(e)
        })?;
        Ok(Self::with_client(
            Arc::new(client),
            locks,
            config.poll.clone(),
        ))
    }

    /// Create with a specific load balancer client (for testing)
    pub fn with_client(
        client: Arc<dyn LoadBalancerClient>,
        locks: LockRegistry,
        poll: PollConfig,
    ) -> Self {
        Self {
            nat_pools: NatPoolReconciler::new(client, locks, poll),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.nat_pools = self.nat_pools.with_cancellation(token);
        self
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        check_resource_type(id)?;

        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };

        let state = self
            .nat_pools
            .read(identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))?;
        Ok(State {
            id: id.clone(),
            ..state
        })
    }

    /// Create or update; both converge the pool to `resource`
    pub async fn apply_resource(&self, resource: &Resource) -> ProviderResult<State> {
        check_resource_type(&resource.id)?;

        let desired = DesiredNatPool::try_from(resource)?;
        let state = self
            .nat_pools
            .create_or_update(&desired)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))?;
        Ok(State {
            id: resource.id.clone(),
            ..state
        })
    }

    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        check_resource_type(id)?;

        self.nat_pools
            .delete(identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    pub fn import_resource(
        &self,
        resource_type: &str,
        identifier: &str,
    ) -> ProviderResult<Resource> {
        if resource_type != RESOURCE_TYPE {
            return Err(ProviderError::validation(format!(
                "Unknown resource type: {}",
                resource_type
            )));
        }
        self.nat_pools.import(identifier)
    }
}

fn check_resource_type(id: &ResourceId) -> ProviderResult<()> {
    if id.resource_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(
            ProviderError::validation(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone()),
        )
    }
}
