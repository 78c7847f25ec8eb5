//! Provider configuration
//!
//! Values come from the environment (`ARM_*` variables) or from the
//! attributes of a provider block handed over by the orchestrator.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use cirrus_core::resource::Value;
use cirrus_core::wait::StateChangeConf;
use thiserror::Error;
use url::Url;

/// API version of the Azure Stack network resource provider
pub const DEFAULT_API_VERSION: &str = "2017-10-01";

/// Default HTTP request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default budget for a load balancer to settle after a PUT (10 minutes)
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 600;

/// Default interval between provisioning state polls
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// How to wait for a load balancer's provisioning state to settle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub pending: Vec<String>,
    pub target: Vec<String>,
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            pending: vec!["Accepted".to_string(), "Updating".to_string()],
            target: vec!["Succeeded".to_string()],
            timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl PollConfig {
    pub fn state_change_conf(&self) -> StateChangeConf {
        StateChangeConf::new(self.pending.clone(), self.target.clone(), self.timeout)
            .with_poll_interval(self.interval)
    }
}

/// Connection settings for an Azure Stack ARM endpoint
#[derive(Clone)]
pub struct AzureStackConfig {
    /// ARM endpoint (e.g., https://management.local.azurestack.external)
    pub endpoint: Url,
    pub subscription_id: String,
    /// Bearer token for ARM requests
    pub access_token: String,
    pub api_version: String,
    pub request_timeout: Duration,
    pub poll: PollConfig,
}

impl fmt::Debug for AzureStackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureStackConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("subscription_id", &self.subscription_id)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("request_timeout", &self.request_timeout)
            .field("poll", &self.poll)
            .finish()
    }
}

impl AzureStackConfig {
    pub fn new(
        endpoint: Url,
        subscription_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            subscription_id: subscription_id.into(),
            access_token: access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            poll: PollConfig::default(),
        }
    }

    /// Load from `ARM_ENDPOINT`, `ARM_SUBSCRIPTION_ID`, `ARM_ACCESS_TOKEN`
    /// and the optional `ARM_API_VERSION`, `ARM_REQUEST_TIMEOUT_SECS`,
    /// `ARM_POLL_TIMEOUT_SECS`, `ARM_POLL_INTERVAL_SECS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from a provider block (`endpoint = "..."`, `subscription_id = "..."`, ...)
    pub fn from_attributes(attributes: &HashMap<String, Value>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| {
            let attr = key.trim_start_matches("ARM_").to_lowercase();
            match attributes.get(&attr) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Int(i)) => Some(i.to_string()),
                _ => None,
            }
        })
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let endpoint_str = required("ARM_ENDPOINT")?;
        let endpoint = Url::parse(&endpoint_str).map_err(|e| ConfigError::Invalid {
            key: "ARM_ENDPOINT",
            message: e.to_string(),
        })?;

        let mut config = Self::new(
            endpoint,
            required("ARM_SUBSCRIPTION_ID")?,
            required("ARM_ACCESS_TOKEN")?,
        );

        if let Some(version) = lookup("ARM_API_VERSION").filter(|v| !v.is_empty()) {
            config.api_version = version;
        }
        if let Some(secs) = parse_secs(&lookup, "ARM_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "ARM_POLL_TIMEOUT_SECS")? {
            config.poll.timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "ARM_POLL_INTERVAL_SECS")? {
            config.poll.interval = secs;
        }

        Ok(config)
    }
}

fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| ConfigError::Invalid {
                key,
                message: format!("{:?} is not a number of seconds: {}", raw, e),
            }),
    }
}
