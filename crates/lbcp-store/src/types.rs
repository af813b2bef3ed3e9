//! Domain types stored in the database.
//!
//! A [`LoadBalancer`] is stored as one aggregate: its listeners, zones and
//! registered backends live inside the record and share its lifetime.
//! [`ServoInstance`] records are stored separately because they are owned by
//! the zone assignment subsystem and only reference a balancer.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lbcp_core::{AccountId, InstanceId};
use serde::{Deserialize, Serialize};

/// A load balancer aggregate stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancer {
    /// Owning account.
    pub account_id: AccountId,
    /// Name, unique within the owning account.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// DNS record allocated at creation.
    #[serde(default)]
    pub dns: Option<DnsRecord>,
    /// Health check policy pushed to servo agents.
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    /// Listeners, unique by load balancer port.
    #[serde(default)]
    pub listeners: Vec<Listener>,
    /// Availability zones the balancer is deployed to.
    #[serde(default)]
    pub zones: Vec<Zone>,
    /// Registered backend targets.
    #[serde(default)]
    pub backends: Vec<BackendInstance>,
    /// Source security group used by the servo agents.
    #[serde(default)]
    pub security_group: Option<SecurityGroupRef>,
}

impl LoadBalancer {
    /// Create an empty aggregate with only its identity set.
    #[must_use]
    pub fn new(account_id: AccountId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            dns: None,
            health_check: None,
            listeners: Vec::new(),
            zones: Vec::new(),
            backends: Vec::new(),
            security_group: None,
        }
    }

    /// Find the listener bound to a load balancer port.
    #[must_use]
    pub fn listener(&self, port: u16) -> Option<&Listener> {
        self.listeners.iter().find(|l| l.load_balancer_port == port)
    }

    /// Find a zone by name.
    #[must_use]
    pub fn zone(&self, name: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.name == name)
    }

    /// Find a registered backend by instance id.
    #[must_use]
    pub fn backend(&self, instance_id: &InstanceId) -> Option<&BackendInstance> {
        self.backends.iter().find(|b| &b.instance_id == instance_id)
    }

    /// Find a registered backend by instance id for mutation.
    pub fn backend_mut(&mut self, instance_id: &InstanceId) -> Option<&mut BackendInstance> {
        self.backends
            .iter_mut()
            .find(|b| &b.instance_id == instance_id)
    }

    /// Returns true if the instance is registered with this balancer.
    #[must_use]
    pub fn has_backend(&self, instance_id: &InstanceId) -> bool {
        self.backend(instance_id).is_some()
    }

    /// Names of the zones currently in service.
    #[must_use]
    pub fn in_service_zone_names(&self) -> Vec<String> {
        self.zones
            .iter()
            .filter(|z| z.state == ZoneState::InService)
            .map(|z| z.name.clone())
            .collect()
    }

    /// Check the aggregate's uniqueness invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first duplicated listener port, zone or
    /// backend.
    pub fn validate(&self) -> Result<(), String> {
        let mut ports = HashSet::new();
        if let Some(dup) = self
            .listeners
            .iter()
            .find(|l| !ports.insert(l.load_balancer_port))
        {
            return Err(format!("duplicate listener port {}", dup.load_balancer_port));
        }

        let mut zones = HashSet::new();
        if let Some(dup) = self.zones.iter().find(|z| !zones.insert(z.name.as_str())) {
            return Err(format!("duplicate zone {}", dup.name));
        }

        let mut backends = HashSet::new();
        if let Some(dup) = self
            .backends
            .iter()
            .find(|b| !backends.insert(&b.instance_id))
        {
            return Err(format!("duplicate backend {}", dup.instance_id));
        }

        Ok(())
    }
}

/// A DNS record allocated to a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Fully qualified domain name.
    pub fqdn: String,
}

/// Health check policy applied by the servo agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Seconds between checks.
    pub interval_seconds: u32,
    /// Probe target such as `HTTP:80/index.html` or `TCP:443`.
    pub target: String,
    /// Seconds before a probe counts as failed.
    pub timeout_seconds: u32,
    /// Consecutive successes before a target is healthy.
    pub healthy_threshold: u32,
    /// Consecutive failures before a target is unhealthy.
    pub unhealthy_threshold: u32,
}

/// Listener protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
    /// Raw TCP.
    Tcp,
    /// Raw TCP over TLS.
    Ssl,
}

impl Protocol {
    /// Return the canonical uppercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
            Self::Ssl => "SSL",
        }
    }

    /// Returns true if the protocol terminates TLS and needs a certificate.
    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Https | Self::Ssl)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown protocol name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported protocol: {0}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Self::Http),
            "HTTPS" => Ok(Self::Https),
            "TCP" => Ok(Self::Tcp),
            "SSL" => Ok(Self::Ssl),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// A listener owned by a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Port the balancer accepts traffic on.
    pub load_balancer_port: u16,
    /// Front-end protocol.
    pub protocol: Protocol,
    /// Back-end protocol, when different from the front end.
    #[serde(default)]
    pub instance_protocol: Option<Protocol>,
    /// Port traffic is forwarded to on each backend.
    pub instance_port: u16,
    /// Server certificate for secure listeners.
    #[serde(default)]
    pub certificate_id: Option<String>,
}

/// Zone states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneState {
    /// Traffic is served in the zone.
    InService,
    /// The zone was disabled by the owner.
    Disabled,
}

impl ZoneState {
    /// Return the state's display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InService => "InService",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for ZoneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An availability zone a load balancer is deployed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone name.
    pub name: String,
    /// Current state.
    pub state: ZoneState,
}

/// Backend instance states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendState {
    /// Passing health checks.
    InService,
    /// Newly registered or failing health checks.
    OutOfService,
    /// Could not be provisioned; stays here until deregistered.
    Error,
}

impl BackendState {
    /// Return the state's display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InService => "InService",
            Self::OutOfService => "OutOfService",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A backend target registered with a load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInstance {
    /// Instance id of the target.
    pub instance_id: InstanceId,
    /// Address the servo agents forward traffic to.
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
    /// Zone the instance runs in.
    #[serde(default)]
    pub zone: Option<String>,
    /// Current health state.
    pub state: BackendState,
    /// Short reason for the current state.
    #[serde(default)]
    pub reason_code: Option<String>,
    /// Human-readable explanation of the current state.
    #[serde(default)]
    pub description: Option<String>,
    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

/// Reference to a security group applied to the servo agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRef {
    /// Account alias owning the group.
    pub owner_alias: String,
    /// Group name.
    pub group_name: String,
}

/// A servo agent record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoInstance {
    /// Instance id of the agent.
    pub servo_id: InstanceId,
    /// Public address the agent may call from.
    #[serde(default)]
    pub public_address: Option<IpAddr>,
    /// Private address the agent may call from.
    #[serde(default)]
    pub private_address: Option<IpAddr>,
    /// The balancer and zone the agent proxies for.
    #[serde(default)]
    pub assignment: Option<ZoneAssignment>,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

impl ServoInstance {
    /// Returns true if `addr` is one of the agent's registered addresses.
    ///
    /// IPv4-mapped IPv6 addresses match their IPv4 form.
    #[must_use]
    pub fn has_address(&self, addr: IpAddr) -> bool {
        let addr = addr.to_canonical();
        [self.public_address, self.private_address]
            .into_iter()
            .flatten()
            .any(|registered| registered.to_canonical() == addr)
    }
}

/// The zone of a load balancer a servo agent is assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneAssignment {
    /// Owning account of the balancer.
    pub account_id: AccountId,
    /// Balancer name.
    pub load_balancer: String,
    /// Zone name.
    pub zone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(id: &str) -> BackendInstance {
        BackendInstance {
            instance_id: id.parse().unwrap(),
            ip_address: None,
            zone: None,
            state: BackendState::OutOfService,
            reason_code: None,
            description: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn protocol_parse_is_case_insensitive() {
        assert_eq!("http".parse::<Protocol>().unwrap(), Protocol::Http);
        assert_eq!("Ssl".parse::<Protocol>().unwrap(), Protocol::Ssl);
        assert!("udp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::Https.to_string(), "HTTPS");
    }

    #[test]
    fn validate_rejects_duplicates() {
        let mut lb = LoadBalancer::new(AccountId::from_bytes([1u8; 32]), "web");
        assert!(lb.validate().is_ok());

        lb.backends.push(backend("i-0000000a"));
        lb.backends.push(backend("i-0000000a"));
        assert!(lb.validate().unwrap_err().contains("i-0000000a"));

        lb.backends.pop();
        let listener = Listener {
            load_balancer_port: 80,
            protocol: Protocol::Http,
            instance_protocol: None,
            instance_port: 8080,
            certificate_id: None,
        };
        lb.listeners.push(listener.clone());
        lb.listeners.push(listener);
        assert!(lb.validate().unwrap_err().contains("80"));
    }

    #[test]
    fn in_service_zone_names_skips_disabled() {
        let mut lb = LoadBalancer::new(AccountId::from_bytes([1u8; 32]), "web");
        lb.zones.push(Zone {
            name: "zone-a".into(),
            state: ZoneState::InService,
        });
        lb.zones.push(Zone {
            name: "zone-b".into(),
            state: ZoneState::Disabled,
        });
        assert_eq!(lb.in_service_zone_names(), vec!["zone-a".to_string()]);
    }

    #[test]
    fn servo_address_match() {
        let servo = ServoInstance {
            servo_id: "i-0a1b2c3d".parse().unwrap(),
            public_address: Some("203.0.113.5".parse().unwrap()),
            private_address: Some("10.0.0.5".parse().unwrap()),
            assignment: None,
            registered_at: Utc::now(),
        };
        assert!(servo.has_address("10.0.0.5".parse().unwrap()));
        assert!(servo.has_address("203.0.113.5".parse().unwrap()));
        assert!(!servo.has_address("10.0.0.6".parse().unwrap()));
    }

    #[test]
    fn servo_address_match_accepts_mapped_ipv4() {
        let servo = ServoInstance {
            servo_id: "i-0a1b2c3d".parse().unwrap(),
            public_address: None,
            private_address: Some("10.0.0.5".parse().unwrap()),
            assignment: None,
            registered_at: Utc::now(),
        };
        assert!(servo.has_address("::ffff:10.0.0.5".parse().unwrap()));
        assert!(!servo.has_address("::ffff:10.0.0.6".parse().unwrap()));
    }
}
