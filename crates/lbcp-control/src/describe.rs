//! Read-path projections of load balancer aggregates.

use lbcp_core::InstanceId;
use lbcp_store::{BackendState, LoadBalancer};

use crate::error::{ControlError, Result};
use crate::gate::AdmittedAgent;
use crate::health::{in_enabled_zone, is_routable, member_backends};
use crate::types::{AgentBackend, AssignedLoadBalancer, InstanceHealth, LoadBalancerDescription};

/// Project a balancer for its owner.
///
/// Only zones in service and backends in healthy membership are listed.
#[must_use]
pub fn load_balancer(lb: &LoadBalancer) -> LoadBalancerDescription {
    LoadBalancerDescription {
        name: lb.name.clone(),
        account_id: lb.account_id,
        dns_name: lb.dns.as_ref().map(|d| d.fqdn.clone()),
        created_at: lb.created_at,
        listeners: lb.listeners.clone(),
        zones: lb.in_service_zone_names(),
        instances: member_backends(lb).map(|b| b.instance_id.clone()).collect(),
        health_check: lb.health_check.clone(),
        source_security_group: lb.security_group.clone(),
    }
}

/// Report the health of registered backends.
///
/// An empty `instance_ids` selects every registered backend. Backends in
/// the `Error` state or in disabled zones are left out, including when
/// requested by id.
///
/// # Errors
///
/// Returns `InvalidArgument` if a requested instance is not registered.
pub fn instance_health(lb: &LoadBalancer, instance_ids: &[InstanceId]) -> Result<Vec<InstanceHealth>> {
    let project = |b: &lbcp_store::BackendInstance| InstanceHealth {
        instance_id: b.instance_id.clone(),
        state: b.state,
        reason_code: match b.state {
            BackendState::InService => None,
            _ => b.reason_code.clone(),
        },
        description: b.description.clone(),
    };

    if instance_ids.is_empty() {
        return Ok(member_backends(lb).map(project).collect());
    }

    let mut health = Vec::with_capacity(instance_ids.len());
    for id in instance_ids {
        let backend = lb.backend(id).ok_or_else(|| {
            ControlError::InvalidArgument(format!(
                "instance {id} is not registered with load balancer {}",
                lb.name
            ))
        })?;
        if is_routable(backend.state) && in_enabled_zone(lb, backend) {
            health.push(project(backend));
        }
    }
    Ok(health)
}

/// The configuration an admitted agent applies to its zone.
#[must_use]
pub fn assigned_load_balancer(agent: &AdmittedAgent) -> AssignedLoadBalancer {
    let lb = &agent.load_balancer;
    AssignedLoadBalancer {
        name: lb.name.clone(),
        zone: agent.zone.clone(),
        dns_name: lb.dns.as_ref().map(|d| d.fqdn.clone()),
        listeners: lb.listeners.clone(),
        health_check: lb.health_check.clone(),
        backends: lb
            .backends
            .iter()
            .filter(|b| is_routable(b.state) && b.zone.as_deref() == Some(agent.zone.as_str()))
            .map(|b| AgentBackend {
                instance_id: b.instance_id.clone(),
                ip_address: b.ip_address,
            })
            .collect(),
    }
}
