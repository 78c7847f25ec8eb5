//! ARM resource ID parsing
//!
//! `/subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{name}[/{child}/{name}...]`

use std::fmt;

use thiserror::Error;

pub const LOAD_BALANCERS: &str = "loadBalancers";
pub const INBOUND_NAT_POOLS: &str = "inboundNatPools";
pub const FRONTEND_IP_CONFIGURATIONS: &str = "frontendIPConfigurations";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceIdError {
    #[error("resource ID is empty")]
    Empty,

    #[error("resource ID {0:?} must start with '/'")]
    NotAbsolute(String),

    #[error("resource ID {0:?} has an odd number of segments")]
    OddSegments(String),

    #[error("resource ID {id:?} has no {key:?} segment")]
    MissingSegment { id: String, key: String },
}

/// A parsed ARM resource ID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    /// Provider namespace (e.g., "Microsoft.Network")
    pub provider: String,
    /// Remaining type/name pairs in order
    pub path: Vec<(String, String)>,
}

impl AzureResourceId {
    pub fn parse(id: &str) -> Result<Self, ResourceIdError> {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ResourceIdError::Empty);
        }
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Err(ResourceIdError::NotAbsolute(id.to_string()));
        };

        let segments: Vec<&str> = rest.trim_end_matches('/').split('/').collect();
        if segments.len() % 2 != 0 {
            return Err(ResourceIdError::OddSegments(id.to_string()));
        }

        let mut subscription_id = None;
        let mut resource_group = None;
        let mut provider = None;
        let mut path = Vec::new();

        for pair in segments.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.eq_ignore_ascii_case("subscriptions") && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("resourceGroups") && resource_group.is_none() {
                resource_group = Some(value.to_string());
            } else if key.eq_ignore_ascii_case("providers") && provider.is_none() {
                provider = Some(value.to_string());
            } else {
                path.push((key.to_string(), value.to_string()));
            }
        }

        let missing = |key: &str| ResourceIdError::MissingSegment {
            id: id.to_string(),
            key: key.to_string(),
        };

        Ok(Self {
            subscription_id: subscription_id.ok_or_else(|| missing("subscriptions"))?,
            resource_group: resource_group.ok_or_else(|| missing("resourceGroups"))?,
            provider: provider.unwrap_or_default(),
            path,
        })
    }

    /// Value of the first path segment named `key` (case-insensitive)
    pub fn get(&self, key: &str) -> Option<&str> {
        self.path
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, ResourceIdError> {
        self.get(key).ok_or_else(|| ResourceIdError::MissingSegment {
            id: self.to_string(),
            key: key.to_string(),
        })
    }

    /// This ID truncated after the segment named `key`
    pub fn truncate_after(&self, key: &str) -> Result<AzureResourceId, ResourceIdError> {
        let position = self
            .path
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
            .ok_or_else(|| ResourceIdError::MissingSegment {
                id: self.to_string(),
                key: key.to_string(),
            })?;

        Ok(AzureResourceId {
            path: self.path[..=position].to_vec(),
            ..self.clone()
        })
    }
}

impl fmt::Display for AzureResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "/subscriptions/{}/resourceGroups/{}",
            self.subscription_id, self.resource_group
        )?;
        if !self.provider.is_empty() {
            write!(f, "/providers/{}", self.provider)?;
        }
        for (key, value) in &self.path {
            write!(f, "/{}/{}", key, value)?;
        }
        Ok(())
    }
}

/// Load balancer name and resource group from a load balancer ID
pub fn load_balancer_name_and_group(
    load_balancer_id: &str,
) -> Result<(String, String), ResourceIdError> {
    let id = AzureResourceId::parse(load_balancer_id)?;
    let name = id.require(LOAD_BALANCERS)?.to_string();
    Ok((id.resource_group, name))
}

/// ID of the load balancer owning a sub-resource (or the load balancer itself)
pub fn parent_load_balancer_id(id: &str) -> Result<String, ResourceIdError> {
    Ok(AzureResourceId::parse(id)?
        .truncate_after(LOAD_BALANCERS)?
        .to_string())
}

/// Key used to serialize mutations of one load balancer.
///
/// ARM IDs are case-insensitive, and the same parent may be referenced through
/// a user-supplied ID or one derived from a child ID; both map to the same key.
pub fn load_balancer_lock_key(id: &str) -> Result<String, ResourceIdError> {
    Ok(parent_load_balancer_id(id)?.to_lowercase())
}
