//! Agent identity gate.
//!
//! Servo agents identify themselves only by the id in the request. The gate
//! accepts the claim when the call arrives from one of the addresses the
//! agent was registered with. This is a network-origin check, not
//! authentication: anything able to send from a registered address passes.
//! Callers must not treat an admitted agent as cryptographically verified.
//!
//! Rejections are never reported to the agent. They are logged and the
//! caller receives `None`.

use std::net::IpAddr;
use std::sync::Arc;

use lbcp_core::InstanceId;
use lbcp_store::{LoadBalancer, ServoInstance, Store, StoreError, ZoneState};

use crate::access::{AccessFilter, Action, Principal};

/// An agent whose claim was accepted, with the balancer zone it serves.
#[derive(Debug, Clone)]
pub struct AdmittedAgent {
    /// The agent's registration record.
    pub servo: ServoInstance,
    /// The balancer the agent is assigned to.
    pub load_balancer: LoadBalancer,
    /// The zone the agent serves.
    pub zone: String,
}

/// Why a claim was refused.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    /// No agent is registered under the claimed id.
    #[error("unknown agent")]
    UnknownAgent,
    /// The call did not come from a registered address.
    #[error("origin {0} does not match the agent's registered addresses")]
    AddressMismatch(IpAddr),
    /// The agent is not assigned to any balancer.
    #[error("agent is not assigned to a load balancer")]
    Unassigned,
    /// The assigned balancer no longer exists.
    #[error("assigned load balancer no longer exists")]
    LoadBalancerMissing,
    /// The assigned zone is missing or disabled.
    #[error("assigned zone {0} is not in service")]
    ZoneNotInService(String),
    /// The access filter refused the system principal.
    #[error("access filter denied the load balancer")]
    AccessDenied,
    /// A lookup failed.
    #[error("lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Validates agent claims against registered servo records.
pub struct AgentIdentityGate<S: Store> {
    store: Arc<S>,
    access: Arc<dyn AccessFilter>,
}

impl<S: Store> AgentIdentityGate<S> {
    /// Create a gate over the given store and access filter.
    #[must_use]
    pub fn new(store: Arc<S>, access: Arc<dyn AccessFilter>) -> Self {
        Self { store, access }
    }

    /// Admit or silently refuse an agent claim.
    pub fn admit(&self, servo_id: &InstanceId, origin: IpAddr) -> Option<AdmittedAgent> {
        match self.check(servo_id, origin) {
            Ok(admitted) => Some(admitted),
            Err(rejection) => {
                tracing::warn!(
                    servo_id = %servo_id,
                    origin = %origin,
                    reason = %rejection,
                    "Dropped agent request"
                );
                None
            }
        }
    }

    /// Check an agent claim, returning the reason for any refusal.
    ///
    /// # Errors
    ///
    /// Returns the [`Rejection`] explaining why the claim was refused.
    pub fn check(&self, servo_id: &InstanceId, origin: IpAddr) -> Result<AdmittedAgent, Rejection> {
        let servo = self
            .store
            .get_servo_instance(servo_id)?
            .ok_or(Rejection::UnknownAgent)?;

        if !servo.has_address(origin) {
            return Err(Rejection::AddressMismatch(origin));
        }

        let assignment = servo.assignment.clone().ok_or(Rejection::Unassigned)?;

        let load_balancer = match self
            .store
            .get_load_balancer(&assignment.account_id, &assignment.load_balancer)
        {
            Ok(lb) => lb,
            Err(StoreError::NotFound) => return Err(Rejection::LoadBalancerMissing),
            Err(e) => return Err(e.into()),
        };

        let in_service = load_balancer
            .zone(&assignment.zone)
            .is_some_and(|z| z.state == ZoneState::InService);
        if !in_service {
            return Err(Rejection::ZoneNotInService(assignment.zone));
        }

        if !self
            .access
            .authorize(&Principal::system(), &load_balancer, Action::ReportState)
        {
            return Err(Rejection::AccessDenied);
        }

        Ok(AdmittedAgent {
            servo,
            load_balancer,
            zone: assignment.zone,
        })
    }
}
