//! Azure Stack resource schema definitions

pub mod nat_pool;

use cirrus_core::schema::ResourceSchema;

/// Returns all Azure Stack schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    vec![nat_pool::nat_pool_schema()]
}
