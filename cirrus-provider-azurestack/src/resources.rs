//! Resource type definitions for the Azure Stack provider

use cirrus_core::provider::ResourceType;
use cirrus_core::schema::ResourceSchema;

use crate::schemas::nat_pool::{RESOURCE_TYPE, nat_pool_schema};

pub struct LbNatPoolType;

impl ResourceType for LbNatPoolType {
    fn name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> ResourceSchema {
        nat_pool_schema()
    }
}

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![Box::new(LbNatPoolType)]
}
