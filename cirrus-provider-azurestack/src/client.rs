//! Load balancer client
//!
//! `LoadBalancerClient` is the seam between the reconciler and the ARM REST
//! API. `ArmClient` talks to a real Azure Stack endpoint over reqwest; tests
//! substitute an in-memory implementation.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::config::AzureStackConfig;
use crate::models::LoadBalancer;

const NETWORK_PROVIDER: &str = "Microsoft.Network";

/// Errors returned by the ARM API
#[derive(Debug, Error)]
pub enum ArmError {
    /// The resource does not exist (HTTP 404)
    #[error("resource not found")]
    NotFound,

    /// Any other non-success status
    #[error("HTTP {status}: {code}: {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    /// Transport-level failure (connect, TLS, timeout)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not the expected JSON
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured endpoint cannot carry a resource path
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl ArmError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::NotFound)
    }
}

/// Operations on load balancers needed by sub-resource reconcilers
#[async_trait]
pub trait LoadBalancerClient: Send + Sync {
    /// Fetch a load balancer; `ArmError::NotFound` when it does not exist
    async fn get(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, ArmError>;

    /// Submit the whole load balancer; returns the accepted representation
    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ArmError>;
}

#[derive(Debug, Deserialize)]
struct ArmErrorEnvelope {
    error: ArmErrorBody,
}

#[derive(Debug, Deserialize)]
struct ArmErrorBody {
    code: String,
    message: String,
}

/// reqwest-backed client for `Microsoft.Network/loadBalancers`
#[derive(Debug, Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: Url,
    subscription_id: String,
    access_token: String,
    api_version: String,
}

impl ArmClient {
    pub fn new(config: &AzureStackConfig) -> Result<Self, ArmError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("cirrus/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, config))
    }

    /// Create with a specific HTTP client (for testing)
    pub fn with_client(http: reqwest::Client, config: &AzureStackConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint.clone(),
            subscription_id: config.subscription_id.clone(),
            access_token: config.access_token.clone(),
            api_version: config.api_version.clone(),
        }
    }

    fn load_balancer_url(&self, resource_group: &str, name: &str) -> Result<Url, ArmError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ArmError::InvalidUrl(self.endpoint.to_string()))?
            .pop_if_empty()
            .extend([
                "subscriptions",
                self.subscription_id.as_str(),
                "resourceGroups",
                resource_group,
                "providers",
                NETWORK_PROVIDER,
                "loadBalancers",
                name,
            ]);
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ArmError> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ArmError::NotFound);
        }

        let body = response.bytes().await?;
        if !status.is_success() {
            let (code, message) = match serde_json::from_slice::<ArmErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) => (
                    status.canonical_reason().unwrap_or("Unknown").to_string(),
                    String::from_utf8_lossy(&body).into_owned(),
                ),
            };
            return Err(ArmError::Status {
                status: status.as_u16(),
                code,
                message,
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl LoadBalancerClient for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, ArmError> {
        let url = self.load_balancer_url(resource_group, name)?;
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ArmError> {
        let url = self.load_balancer_url(resource_group, name)?;
        log::debug!("PUT {}", url);

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.access_token)
            .json(load_balancer)
            .send()
            .await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(endpoint: &str) -> ArmClient {
        let config = AzureStackConfig::new(Url::parse(endpoint).unwrap(), "sub-1", "token");
        ArmClient::with_client(reqwest::Client::new(), &config)
    }

    #[test]
    fn builds_load_balancer_url() {
        let url = client("https://management.local.azurestack.external")
            .load_balancer_url("rg1", "lb1")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.local.azurestack.external/subscriptions/sub-1/resourceGroups/rg1/providers/Microsoft.Network/loadBalancers/lb1?api-version=2017-10-01"
        );
    }

    #[test]
    fn keeps_endpoint_path_prefix() {
        let url = client("https://arm.example.com/tenant-a/")
            .load_balancer_url("rg1", "lb1")
            .unwrap();
        assert!(
            url.path()
                .starts_with("/tenant-a/subscriptions/sub-1/resourceGroups/rg1/")
        );
    }

    #[test]
    fn escapes_names() {
        let url = client("https://arm.example.com")
            .load_balancer_url("rg 1", "lb/1")
            .unwrap();
        assert!(
            url.path()
                .ends_with("/resourceGroups/rg%201/providers/Microsoft.Network/loadBalancers/lb%2F1")
        );
    }
}
