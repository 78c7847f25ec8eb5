//! Cirrus Azure Stack Provider
//!
//! Manages load balancer inbound NAT pools on Azure Stack through the ARM
//! REST API.
//!
//! ## Module Structure
//!
//! - `provider` - AzureStackProvider implementation
//! - `nat_pool` - read-modify-write reconciler for NAT pools
//! - `client` - `LoadBalancerClient` seam and its reqwest implementation
//! - `collection` - named sub-resource collection editing
//! - `models` - ARM wire models
//! - `resource_id` - ARM resource ID parsing
//! - `resources` / `schemas` - resource types and their attribute schemas
//! - `config` - endpoint, credentials and polling settings

pub mod client;
pub mod collection;
pub mod config;
pub mod models;
pub mod nat_pool;
pub mod provider;
pub mod resource_id;
pub mod resources;
pub mod schemas;

// Re-export main types
pub use client::{ArmClient, ArmError, LoadBalancerClient};
pub use config::{AzureStackConfig, ConfigError, PollConfig};
pub use nat_pool::NatPoolReconciler;
pub use provider::AzureStackProvider;
pub use schemas::nat_pool::DesiredNatPool;

use cirrus_core::provider::{BoxFuture, Provider, ProviderResult, ResourceType};
use cirrus_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzureStackProvider {
    fn name(&self) -> &'static str {
        "azurestack"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.apply_resource(&resource).await })
    }

    fn update(
        &self,
        _id: &ResourceId,
        _identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let to = to.clone();
        Box::pin(async move { self.apply_resource(&to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }

    fn import(&self, resource_type: &str, identifier: &str) -> ProviderResult<Resource> {
        self.import_resource(resource_type, identifier)
    }
}
