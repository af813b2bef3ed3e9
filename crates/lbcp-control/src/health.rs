//! Backend health state machine.
//!
//! # State Machine
//!
//! ```text
//!   register            report InService
//!  ─────────▶ OutOfService ─────────────▶ InService
//!                  ▲                          │
//!                  └──────────────────────────┘
//!                     report OutOfService
//!
//!   register (target cannot be located) ──▶ Error   (until deregistered)
//! ```
//!
//! Only servo agent reports move a backend between `InService` and
//! `OutOfService`. `Error` is entered at registration time and is never left
//! through a report.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use lbcp_store::{BackendInstance, BackendState, LoadBalancer, ZoneState};

/// Reason code set when an agent reports a backend as failing.
pub const REASON_INSTANCE: &str = "Instance";

/// Description set when an agent reports a backend as failing.
pub const DESCRIPTION_UNHEALTHY: &str =
    "Instance has failed at least the UnhealthyThreshold number of health checks consecutively.";

/// Reason code set by the control plane itself, at registration or when a
/// target could not be provisioned.
pub const REASON_PROVISIONING: &str = "ELB";

/// Description of a freshly registered target awaiting its first report.
pub const DESCRIPTION_REGISTERING: &str = "Instance registration is still in progress.";

/// Description set when a target could not be located in the inventory.
pub const DESCRIPTION_UNRESOLVED: &str =
    "Instance could not be located; it will not receive traffic until re-registered.";

/// A state an agent may report for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportedState {
    /// The backend passes health checks.
    InService,
    /// The backend failed the unhealthy threshold.
    OutOfService,
}

impl ReportedState {
    /// The backend state this report moves to.
    #[must_use]
    pub const fn target(self) -> BackendState {
        match self {
            Self::InService => BackendState::InService,
            Self::OutOfService => BackendState::OutOfService,
        }
    }
}

impl fmt::Display for ReportedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target().as_str())
    }
}

/// Error returned for a state token agents may not report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported reported state: {0}")]
pub struct UnsupportedState(pub String);

impl FromStr for ReportedState {
    type Err = UnsupportedState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InService" => Ok(Self::InService),
            "OutOfService" => Ok(Self::OutOfService),
            _ => Err(UnsupportedState(s.to_string())),
        }
    }
}

/// The effect of an accepted report on one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the report.
    pub from: BackendState,
    /// State after the report.
    pub to: BackendState,
}

/// Apply an agent report to a backend.
///
/// Returns `None` if the backend is in `Error`, which no report can leave.
pub fn apply_report(
    backend: &mut BackendInstance,
    reported: ReportedState,
    now: DateTime<Utc>,
) -> Option<Transition> {
    if backend.state == BackendState::Error {
        return None;
    }

    let from = backend.state;
    backend.state = reported.target();
    backend.updated_at = now;

    match reported {
        ReportedState::InService => {
            backend.reason_code = None;
            backend.description = None;
        }
        ReportedState::OutOfService => {
            backend.reason_code = Some(REASON_INSTANCE.to_string());
            backend.description = Some(DESCRIPTION_UNHEALTHY.to_string());
        }
    }

    Some(Transition {
        from,
        to: backend.state,
    })
}

/// Returns true if the backend state may appear in healthy-membership views.
#[must_use]
pub const fn is_routable(state: BackendState) -> bool {
    !matches!(state, BackendState::Error)
}

/// Returns true if the backend's zone is not disabled on the balancer.
///
/// Backends without a known zone are only hidden by their own state.
#[must_use]
pub fn in_enabled_zone(lb: &LoadBalancer, backend: &BackendInstance) -> bool {
    backend
        .zone
        .as_deref()
        .and_then(|z| lb.zone(z))
        .map_or(true, |z| z.state != ZoneState::Disabled)
}

/// Backends that belong in the balancer's membership views.
pub fn member_backends(lb: &LoadBalancer) -> impl Iterator<Item = &BackendInstance> {
    lb.backends
        .iter()
        .filter(|b| is_routable(b.state) && in_enabled_zone(lb, b))
}
