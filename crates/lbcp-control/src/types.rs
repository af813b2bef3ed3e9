//! Request and response types for control plane operations.
//!
//! Requests carry raw caller input (strings, wide integers, optional fields)
//! so that validation can produce precise `InvalidArgument` messages instead
//! of opaque deserialization failures.

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use lbcp_core::{AccountId, InstanceId};
use lbcp_store::{BackendState, HealthCheck, Listener, SecurityGroupRef};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricSample;

/// Caller-supplied listener definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerSpec {
    /// Port the balancer accepts traffic on.
    pub load_balancer_port: u32,
    /// Front-end protocol name.
    pub protocol: String,
    /// Port traffic is forwarded to.
    pub instance_port: u32,
    /// Back-end protocol name.
    #[serde(default)]
    pub instance_protocol: Option<String>,
    /// Server certificate for secure listeners.
    #[serde(default)]
    pub certificate_id: Option<String>,
}

impl ListenerSpec {
    /// A listener forwarding `protocol` traffic from `port` to `instance_port`.
    #[must_use]
    pub fn new(protocol: impl Into<String>, port: u32, instance_port: u32) -> Self {
        Self {
            load_balancer_port: port,
            protocol: protocol.into(),
            instance_port,
            instance_protocol: None,
            certificate_id: None,
        }
    }
}

/// Request to create a load balancer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateLoadBalancerRequest {
    /// Name, unique within the account.
    pub name: String,
    /// Listeners to create with the balancer.
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
    /// Zones to deploy to.
    #[serde(default)]
    pub zones: Vec<String>,
}

impl CreateLoadBalancerRequest {
    /// Create a request with the given name and no listeners or zones.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add zones to the request.
    #[must_use]
    pub fn with_zones<I, Z>(mut self, zones: I) -> Self
    where
        I: IntoIterator<Item = Z>,
        Z: Into<String>,
    {
        self.zones.extend(zones.into_iter().map(Into::into));
        self
    }

    /// Add a listener to the request.
    #[must_use]
    pub fn with_listener(mut self, listener: ListenerSpec) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Result of creating a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLoadBalancerResponse {
    /// The allocated DNS name.
    pub dns_name: String,
}

/// Request to configure a balancer's health check.
///
/// Every field is required; they are optional here so a missing field can
/// be reported by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigureHealthCheckRequest {
    /// Seconds between checks.
    #[serde(default)]
    pub interval: Option<u32>,
    /// Probe target.
    #[serde(default)]
    pub target: Option<String>,
    /// Probe timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u32>,
    /// Successes before healthy.
    #[serde(default)]
    pub healthy_threshold: Option<u32>,
    /// Failures before unhealthy.
    #[serde(default)]
    pub unhealthy_threshold: Option<u32>,
}

/// A load balancer as seen by its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerDescription {
    /// Balancer name.
    pub name: String,
    /// Owning account.
    pub account_id: AccountId,
    /// Allocated DNS name.
    pub dns_name: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Listeners.
    pub listeners: Vec<Listener>,
    /// Zones in service.
    pub zones: Vec<String>,
    /// Registered targets in healthy membership.
    pub instances: Vec<InstanceId>,
    /// Health check policy, when configured.
    pub health_check: Option<HealthCheck>,
    /// Source security group of the servo agents.
    pub source_security_group: Option<SecurityGroupRef>,
}

/// Health of one registered target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHealth {
    /// The target.
    pub instance_id: InstanceId,
    /// Current state.
    pub state: BackendState,
    /// Reason code, present only when out of service.
    pub reason_code: Option<String>,
    /// Explanation of the state.
    pub description: Option<String>,
}

/// A backend as handed to a servo agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentBackend {
    /// The target.
    pub instance_id: InstanceId,
    /// Address to forward to.
    pub ip_address: Option<IpAddr>,
}

/// The balancer configuration a servo agent applies to its zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignedLoadBalancer {
    /// Balancer name.
    pub name: String,
    /// Zone served by the agent.
    pub zone: String,
    /// Allocated DNS name.
    pub dns_name: Option<String>,
    /// Listeners to open.
    pub listeners: Vec<Listener>,
    /// Health check policy, when configured.
    pub health_check: Option<HealthCheck>,
    /// Targets in the agent's zone.
    pub backends: Vec<AgentBackend>,
}

/// One observed target state from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStateReport {
    /// Target id as sent by the agent.
    pub instance_id: String,
    /// Observed state token.
    pub state: String,
}

impl InstanceStateReport {
    /// Build a report entry.
    #[must_use]
    pub fn new(instance_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            state: state.into(),
        }
    }
}

/// A batched report pushed by a servo agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServoReport {
    /// Observed target states.
    #[serde(default)]
    pub instances: Vec<InstanceStateReport>,
    /// Metric samples to forward.
    #[serde(default)]
    pub metrics: Vec<MetricSample>,
}

/// Outcome of processing a servo report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Whether the agent passed the identity gate.
    pub admitted: bool,
    /// Entries that passed the target, zone and state checks and were
    /// written, including ones that left the state unchanged.
    pub applied: u32,
    /// Entries that were dropped.
    pub dropped: u32,
}

/// Request to register a servo agent for a balancer zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterServoRequest {
    /// Public address the agent calls from.
    #[serde(default)]
    pub public_address: Option<IpAddr>,
    /// Private address the agent calls from.
    #[serde(default)]
    pub private_address: Option<IpAddr>,
    /// Owning account of the balancer.
    pub account_id: AccountId,
    /// Balancer name.
    pub load_balancer: String,
    /// Zone the agent serves.
    pub zone: String,
    /// Security group the agent runs in.
    #[serde(default)]
    pub security_group: Option<SecurityGroupRef>,
}

/// Configuration for the control plane service.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Zones balancers may be deployed to. Empty accepts any well-formed name.
    pub available_zones: Vec<String>,
    /// Maximum number of balancers per account.
    pub max_load_balancers_per_account: u32,
    /// Domain under which balancer DNS names are allocated.
    pub dns_domain: String,
}

impl ControlConfig {
    /// Returns true if `zone` may be used by a balancer.
    #[must_use]
    pub fn is_available_zone(&self, zone: &str) -> bool {
        self.available_zones.is_empty() || self.available_zones.iter().any(|z| z == zone)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            available_zones: Vec::new(),
            max_load_balancers_per_account: 20,
            dns_domain: "lb.internal".to_string(),
        }
    }
}
