//! In-memory load balancer API shared by the reconciler tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use cirrus_core::lock::LockRegistry;
use cirrus_provider_azurestack::client::{ArmError, LoadBalancerClient};
use cirrus_provider_azurestack::config::PollConfig;
use cirrus_provider_azurestack::models::{LoadBalancer, TransportProtocol};
use cirrus_provider_azurestack::nat_pool::NatPoolReconciler;
use cirrus_provider_azurestack::resource_id::load_balancer_name_and_group;
use cirrus_provider_azurestack::schemas::nat_pool::DesiredNatPool;

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

pub fn load_balancer_id(resource_group: &str, name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/loadBalancers/{}",
        SUBSCRIPTION, resource_group, name
    )
}

/// A provisioned load balancer with the given frontend IP configurations
pub fn load_balancer(resource_group: &str, name: &str, frontends: &[&str]) -> LoadBalancer {
    let id = load_balancer_id(resource_group, name);
    let frontends: Vec<_> = frontends
        .iter()
        .map(|f| {
            json!({
                "id": format!("{}/frontendIPConfigurations/{}", id, f),
                "name": f,
                "properties": { "privateIPAllocationMethod": "Dynamic" }
            })
        })
        .collect();

    serde_json::from_value(json!({
        "id": id,
        "name": name,
        "location": "local",
        "properties": {
            "provisioningState": "Succeeded",
            "frontendIPConfigurations": frontends,
            "loadBalancingRules": []
        }
    }))
    .unwrap()
}

pub fn desired_nat_pool(
    name: &str,
    resource_group: &str,
    lb: &str,
    frontend: &str,
) -> DesiredNatPool {
    DesiredNatPool {
        name: name.to_string(),
        resource_group_name: resource_group.to_string(),
        loadbalancer_id: load_balancer_id(resource_group, lb),
        protocol: TransportProtocol::Tcp,
        frontend_port_start: 50000,
        frontend_port_end: 50100,
        backend_port: 22,
        frontend_ip_configuration_name: frontend.to_string(),
    }
}

/// One request seen by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    /// Load balancer name and the NAT pool names it was submitted with
    Put(String, Vec<String>),
}

impl Call {
    pub fn is_put(&self) -> bool {
        matches!(self, Call::Put(..))
    }
}

#[derive(Default)]
struct Inner {
    load_balancers: HashMap<String, LoadBalancer>,
    journal: Vec<Call>,
    /// States reported by successive GETs after a PUT; the last one sticks
    after_put: VecDeque<String>,
    put_script: Vec<String>,
    fail_put: Option<(u16, String)>,
    drop_pool_ids: bool,
    remove_after_put: bool,
}

/// Fake ARM load balancer endpoint with a call journal
#[derive(Default)]
pub struct FakeLoadBalancerClient {
    inner: Mutex<Inner>,
    latency: Duration,
}

fn key(resource_group: &str, name: &str) -> String {
    format!("{}/{}", resource_group, name).to_lowercase()
}

impl FakeLoadBalancerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_balancer(self, load_balancer: LoadBalancer) -> Self {
        let id = load_balancer.id.clone().unwrap_or_default();
        let (resource_group, name) = load_balancer_name_and_group(&id).unwrap();
        self.inner
            .lock()
            .unwrap()
            .load_balancers
            .insert(key(&resource_group, &name), load_balancer);
        self
    }

    /// Every call sleeps this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Provisioning states observed by GETs following each PUT
    pub fn set_provisioning_script(&self, states: &[&str]) {
        self.inner.lock().unwrap().put_script = states.iter().map(|s| s.to_string()).collect();
    }

    pub fn fail_puts_with(&self, status: u16, code: &str) {
        self.inner.lock().unwrap().fail_put = Some((status, code.to_string()));
    }

    /// Accepted pools come back without an ID
    pub fn drop_pool_ids(&self) {
        self.inner.lock().unwrap().drop_pool_ids = true;
    }

    /// The load balancer vanishes right after it is written
    pub fn remove_after_put(&self) {
        self.inner.lock().unwrap().remove_after_put = true;
    }

    pub fn remove_load_balancer(&self, resource_group: &str, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .load_balancers
            .remove(&key(resource_group, name));
    }

    pub fn load_balancer(&self, resource_group: &str, name: &str) -> Option<LoadBalancer> {
        self.inner
            .lock()
            .unwrap()
            .load_balancers
            .get(&key(resource_group, name))
            .cloned()
    }

    pub fn pool_names(&self, resource_group: &str, name: &str) -> Vec<String> {
        self.load_balancer(resource_group, name)
            .map(|lb| {
                lb.inbound_nat_pools()
                    .iter()
                    .filter_map(|p| p.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn journal(&self) -> Vec<Call> {
        self.inner.lock().unwrap().journal.clone()
    }

    pub fn puts(&self) -> Vec<Call> {
        self.journal().into_iter().filter(Call::is_put).collect()
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl LoadBalancerClient for FakeLoadBalancerClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<LoadBalancer, ArmError> {
        self.pause().await;

        let mut inner = self.inner.lock().unwrap();
        inner.journal.push(Call::Get(name.to_string()));

        let next_state = inner.after_put.pop_front();
        let sticky = inner.after_put.is_empty();
        let lb = inner
            .load_balancers
            .get_mut(&key(resource_group, name))
            .ok_or(ArmError::NotFound)?;
        if let Some(state) = next_state {
            lb.properties.get_or_insert_with(Default::default).provisioning_state =
                Some(state.clone());
            if sticky {
                inner.after_put.push_back(state);
            }
        }

        Ok(inner.load_balancers[&key(resource_group, name)].clone())
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        load_balancer: &LoadBalancer,
    ) -> Result<LoadBalancer, ArmError> {
        self.pause().await;

        let mut inner = self.inner.lock().unwrap();
        let pools = load_balancer
            .inbound_nat_pools()
            .iter()
            .filter_map(|p| p.name.clone())
            .collect();
        inner.journal.push(Call::Put(name.to_string(), pools));

        if let Some((status, code)) = inner.fail_put.clone() {
            return Err(ArmError::Status {
                status,
                code,
                message: "request rejected".to_string(),
            });
        }

        let mut stored = load_balancer.clone();
        let id = stored.id.clone().unwrap_or_default();
        let drop_ids = inner.drop_pool_ids;
        let props = stored.properties.get_or_insert_with(Default::default);
        for pool in props.inbound_nat_pools.iter_mut().flatten() {
            if drop_ids {
                pool.id = None;
            } else if pool.id.is_none() {
                pool.id = Some(format!(
                    "{}/inboundNatPools/{}",
                    id,
                    pool.name.as_deref().unwrap_or_default()
                ));
            }
        }

        let script = if inner.put_script.is_empty() {
            vec!["Succeeded".to_string()]
        } else {
            inner.put_script.clone()
        };
        props.provisioning_state = Some(script[0].clone());
        inner.after_put = script.into_iter().collect();

        if inner.remove_after_put {
            inner.load_balancers.remove(&key(resource_group, name));
        } else {
            inner
                .load_balancers
                .insert(key(resource_group, name), stored.clone());
        }
        Ok(stored)
    }
}

/// Polls every second, gives up after a minute
pub fn fast_poll() -> PollConfig {
    PollConfig {
        timeout: Duration::from_secs(60),
        interval: Duration::from_secs(1),
        ..PollConfig::default()
    }
}

pub fn reconciler(client: &Arc<FakeLoadBalancerClient>, locks: &LockRegistry) -> NatPoolReconciler {
    NatPoolReconciler::new(client.clone(), locks.clone(), fast_poll())
}
