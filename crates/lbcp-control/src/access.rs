//! Access filtering for load balancer operations.
//!
//! The control plane consumes authorization decisions as plain predicates.
//! [`DefaultAccessFilter`] implements the built-in policy: owners and
//! administrators may act on a balancer, and each account may own a bounded
//! number of balancers.

use lbcp_core::AccountId;
use lbcp_store::LoadBalancer;

/// Account id reserved for the control plane's own principal.
pub const SYSTEM_ACCOUNT: AccountId = AccountId::from_bytes([0u8; 32]);

/// The caller of a control plane operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Account the caller acts for.
    pub account_id: AccountId,
    /// User within the account, if known.
    pub user: Option<String>,
    /// Whether the caller holds administrator privilege.
    pub administrator: bool,
    /// Whether this is the control plane acting on its own behalf.
    pub system: bool,
}

impl Principal {
    /// A regular account principal.
    #[must_use]
    pub const fn account(account_id: AccountId) -> Self {
        Self {
            account_id,
            user: None,
            administrator: false,
            system: false,
        }
    }

    /// An administrator principal acting from `account_id`.
    #[must_use]
    pub const fn administrator(account_id: AccountId) -> Self {
        Self {
            account_id,
            user: None,
            administrator: true,
            system: false,
        }
    }

    /// The control plane's own principal.
    #[must_use]
    pub const fn system() -> Self {
        Self {
            account_id: SYSTEM_ACCOUNT,
            user: None,
            administrator: true,
            system: true,
        }
    }
}

/// Actions checked by the access filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read a balancer's description or health.
    Describe,
    /// Change listeners, instances, zones or health checks.
    Modify,
    /// Delete a balancer.
    Delete,
    /// Accept agent-reported state for a balancer.
    ReportState,
}

/// Resource classes subject to quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Load balancers per account.
    LoadBalancer,
}

/// Authorization predicates consumed by the control plane.
pub trait AccessFilter: Send + Sync {
    /// Decide whether `principal` may perform `action` on `resource`.
    fn authorize(&self, principal: &Principal, resource: &LoadBalancer, action: Action) -> bool;

    /// Decide whether `principal` may own one more resource of `class`,
    /// given that it currently owns `current`.
    fn authorize_quota(&self, principal: &Principal, class: ResourceClass, current: u32) -> bool;
}

/// Owner-or-administrator access with a per-account balancer limit.
#[derive(Debug, Clone)]
pub struct DefaultAccessFilter {
    max_load_balancers_per_account: u32,
}

impl DefaultAccessFilter {
    /// Create a filter with the given per-account balancer limit.
    #[must_use]
    pub const fn new(max_load_balancers_per_account: u32) -> Self {
        Self {
            max_load_balancers_per_account,
        }
    }
}

impl AccessFilter for DefaultAccessFilter {
    fn authorize(&self, principal: &Principal, resource: &LoadBalancer, _action: Action) -> bool {
        principal.system || principal.administrator || principal.account_id == resource.account_id
    }

    fn authorize_quota(&self, principal: &Principal, class: ResourceClass, current: u32) -> bool {
        match class {
            ResourceClass::LoadBalancer => {
                principal.system || current < self.max_load_balancers_per_account
            }
        }
    }
}
