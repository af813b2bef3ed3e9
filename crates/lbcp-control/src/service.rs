//! Control plane service implementation.
//!
//! This module provides the `ControlPlane` trait and the
//! `LoadBalancingService` implementation that composes the store, the
//! access filter, the event dispatcher and the other external
//! collaborators.
//!
//! Mutating commands notify the data plane before they persist: if the
//! event cannot be delivered, the store is left untouched.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use lbcp_core::{validate_load_balancer_name, validate_zone_name, AccountId, InstanceId};
use lbcp_store::{
    BackendInstance, BackendState, HealthCheck, Listener, LoadBalancer, ServoInstance, Store,
    StoreError, Zone, ZoneAssignment, ZoneState,
};

use crate::access::{AccessFilter, Action, DefaultAccessFilter, Principal, ResourceClass};
use crate::describe;
use crate::dispatch::{EventDispatcher, EventKind, LoadBalancerEvent, NoopEventDispatcher};
use crate::dns::{DnsProvisioner, DomainDnsProvisioner};
use crate::error::{ControlError, Result};
use crate::gate::AgentIdentityGate;
use crate::health::{DESCRIPTION_REGISTERING, DESCRIPTION_UNRESOLVED, REASON_PROVISIONING};
use crate::inventory::{InstanceResolver, StaticInstanceResolver};
use crate::metrics::{MetricsSink, TracingMetricsSink};
use crate::report;
use crate::types::{
    AssignedLoadBalancer, ConfigureHealthCheckRequest, ControlConfig, CreateLoadBalancerRequest,
    CreateLoadBalancerResponse, InstanceHealth, ListenerSpec, LoadBalancerDescription,
    RegisterServoRequest, ReportSummary, ServoReport,
};
use crate::validate;
use crate::workflow::{Compensation, Saga};

/// Name that switches describe-load-balancers into the cross-account view
/// for administrators.
pub const VERBOSE: &str = "verbose";

/// Trait defining the control plane operations.
///
/// Public commands take the calling [`Principal`]. The agent-facing pair
/// takes the claimed servo id and the network origin of the call instead.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    // =========================================================================
    // Load Balancer Operations
    // =========================================================================

    /// Create a load balancer with its DNS name, zones and listeners.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::QuotaExceeded` if the account is at its limit,
    /// `ControlError::AlreadyExists` if the name is taken, or
    /// `ControlError::DispatchFailed` if the data plane could not be told.
    /// Nothing is left behind on failure.
    async fn create_load_balancer(
        &self,
        principal: &Principal,
        request: CreateLoadBalancerRequest,
    ) -> Result<CreateLoadBalancerResponse>;

    /// Delete a load balancer. Deleting a missing balancer succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::DispatchFailed` if the data plane could not be
    /// told; the balancer is kept in that case.
    async fn delete_load_balancer(&self, principal: &Principal, name: &str) -> Result<()>;

    /// Describe the caller's load balancers, optionally filtered by name.
    ///
    /// [`VERBOSE`] is never a name. Administrators passing it see every
    /// account; for anyone else it is ignored.
    async fn describe_load_balancers(
        &self,
        principal: &Principal,
        names: &[String],
    ) -> Result<Vec<LoadBalancerDescription>>;

    // =========================================================================
    // Listener Operations
    // =========================================================================

    /// Add listeners. Returns every listener on the balancer afterwards.
    async fn create_listeners(
        &self,
        principal: &Principal,
        name: &str,
        listeners: Vec<ListenerSpec>,
    ) -> Result<Vec<Listener>>;

    /// Remove the listeners on the given ports.
    async fn delete_listeners(&self, principal: &Principal, name: &str, ports: Vec<u32>)
        -> Result<()>;

    // =========================================================================
    // Backend Operations
    // =========================================================================

    /// Register targets. Returns every registered target afterwards.
    async fn register_instances(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceId>>;

    /// Deregister targets. Returns every registered target afterwards.
    async fn deregister_instances(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceId>>;

    /// Report the health of registered targets. No ids selects all of them.
    async fn describe_instance_health(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceHealth>>;

    /// Replace the health check policy.
    async fn configure_health_check(
        &self,
        principal: &Principal,
        name: &str,
        request: ConfigureHealthCheckRequest,
    ) -> Result<HealthCheck>;

    // =========================================================================
    // Zone Operations
    // =========================================================================

    /// Put zones in service. Returns the zones in service afterwards.
    async fn enable_zones(
        &self,
        principal: &Principal,
        name: &str,
        zones: Vec<String>,
    ) -> Result<Vec<String>>;

    /// Take zones out of service. Returns the zones in service afterwards.
    async fn disable_zones(
        &self,
        principal: &Principal,
        name: &str,
        zones: Vec<String>,
    ) -> Result<Vec<String>>;

    // =========================================================================
    // Agent Operations
    // =========================================================================

    /// The configuration a servo agent applies to its zone.
    ///
    /// Returns `None` for any claim the identity gate refuses.
    async fn describe_assigned_load_balancer(
        &self,
        servo_id: &InstanceId,
        origin: IpAddr,
    ) -> Option<AssignedLoadBalancer>;

    /// Apply a state report pushed by a servo agent.
    ///
    /// Refused claims are dropped whole and reported as not admitted.
    async fn report_state(
        &self,
        servo_id: &InstanceId,
        origin: IpAddr,
        report: ServoReport,
    ) -> ReportSummary;

    // =========================================================================
    // Servo Registry
    // =========================================================================

    /// Record a servo agent serving one zone of a balancer.
    ///
    /// Only an administrator may change the addresses of an agent that is
    /// already registered.
    async fn register_servo(
        &self,
        principal: &Principal,
        servo_id: InstanceId,
        request: RegisterServoRequest,
    ) -> Result<ServoInstance>;

    /// Remove a servo agent record. Removing a missing agent succeeds.
    async fn deregister_servo(&self, principal: &Principal, servo_id: &InstanceId) -> Result<()>;
}

/// The main control plane service implementation.
pub struct LoadBalancingService<S: Store> {
    store: Arc<S>,
    config: ControlConfig,
    access: Arc<dyn AccessFilter>,
    dispatcher: Arc<dyn EventDispatcher>,
    dns: Arc<dyn DnsProvisioner>,
    metrics: Arc<dyn MetricsSink>,
    inventory: Arc<dyn InstanceResolver>,
    gate: AgentIdentityGate<S>,
}

impl<S: Store> LoadBalancingService<S> {
    /// Create a new control plane service.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        config: ControlConfig,
        access: Arc<dyn AccessFilter>,
        dispatcher: Arc<dyn EventDispatcher>,
        dns: Arc<dyn DnsProvisioner>,
    ) -> Self {
        let gate = AgentIdentityGate::new(Arc::clone(&store), Arc::clone(&access));
        Self {
            store,
            config,
            access,
            dispatcher,
            dns,
            metrics: Arc::new(TracingMetricsSink),
            inventory: Arc::new(StaticInstanceResolver::new()),
            gate,
        }
    }

    /// Create with the built-in access policy, DNS provisioner and metrics
    /// sink, and a dispatcher that drops every event.
    #[must_use]
    pub fn with_defaults(store: Arc<S>, config: ControlConfig) -> Self {
        let access = Arc::new(DefaultAccessFilter::new(
            config.max_load_balancers_per_account,
        ));
        let dns = Arc::new(DomainDnsProvisioner::new(config.dns_domain.clone()));
        Self::new(store, config, access, Arc::new(NoopEventDispatcher::new()), dns)
    }

    /// Replace the access filter.
    #[must_use]
    pub fn with_access(mut self, access: Arc<dyn AccessFilter>) -> Self {
        self.gate = AgentIdentityGate::new(Arc::clone(&self.store), Arc::clone(&access));
        self.access = access;
        self
    }

    /// Replace the event dispatcher.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Replace the DNS provisioner.
    #[must_use]
    pub fn with_dns(mut self, dns: Arc<dyn DnsProvisioner>) -> Self {
        self.dns = dns;
        self
    }

    /// Replace the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the instance resolver.
    #[must_use]
    pub fn with_inventory(mut self, inventory: Arc<dyn InstanceResolver>) -> Self {
        self.inventory = inventory;
        self
    }

    /// Get a reference to the store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &ControlConfig {
        &self.config
    }

    /// Load a balancer in the caller's account and check access to it.
    fn load(&self, principal: &Principal, name: &str, action: Action) -> Result<LoadBalancer> {
        let lb = self
            .store
            .get_load_balancer(&principal.account_id, name)
            .map_err(|e| ControlError::from_store(name, e))?;

        if !self.access.authorize(principal, &lb, action) {
            return Err(ControlError::LoadBalancerNotFound(name.to_string()));
        }
        Ok(lb)
    }

    /// Apply a mutation to a stored balancer.
    fn modify(
        &self,
        account_id: &AccountId,
        name: &str,
        mut mutate: impl FnMut(&mut LoadBalancer) -> lbcp_store::Result<()>,
    ) -> Result<LoadBalancer> {
        self.store
            .update_load_balancer(account_id, name, &mut mutate)
            .map_err(|e| ControlError::from_store(name, e))
    }

    /// Deliver an event, turning a failure into `DispatchFailed`.
    async fn dispatch(
        &self,
        account_id: AccountId,
        name: &str,
        kind: EventKind,
        context: &str,
    ) -> Result<()> {
        let event = LoadBalancerEvent::new(account_id, name, kind);
        match self.dispatcher.emit(&event).await {
            Ok(()) => {
                tracing::debug!(
                    event_id = %event.event_id,
                    kind = event.kind.name(),
                    load_balancer = %name,
                    "Dispatched event"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    kind = event.kind.name(),
                    load_balancer = %name,
                    error = %e,
                    cause = ?e.cause,
                    "Event dispatch failed"
                );
                Err(ControlError::DispatchFailed {
                    context: context.to_string(),
                    reason: e.reason().to_string(),
                })
            }
        }
    }

    /// Find the balancer a delete request refers to.
    ///
    /// Administrators fall back to a lookup across accounts when the name is
    /// not in their own.
    fn find_for_delete(&self, principal: &Principal, name: &str) -> Result<Option<LoadBalancer>> {
        match self.store.get_load_balancer(&principal.account_id, name) {
            Ok(lb) => return Ok(Some(lb)),
            Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        if !principal.administrator {
            return Ok(None);
        }

        let mut matches = self.store.find_load_balancers_by_name(name)?;
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(ControlError::InvalidArgument(format!(
                "{n} load balancers are named {name}; delete from the owning account"
            ))),
        }
    }

    /// Build the backend record for a newly registered target.
    async fn new_backend(&self, instance_id: InstanceId) -> BackendInstance {
        let now = Utc::now();
        match self.inventory.resolve(&instance_id).await {
            Some(location) => BackendInstance {
                instance_id,
                ip_address: Some(location.ip_address),
                zone: Some(location.zone),
                state: BackendState::OutOfService,
                reason_code: Some(REASON_PROVISIONING.to_string()),
                description: Some(DESCRIPTION_REGISTERING.to_string()),
                updated_at: now,
            },
            None => {
                tracing::warn!(instance_id = %instance_id, "Could not resolve instance");
                BackendInstance {
                    instance_id,
                    ip_address: None,
                    zone: None,
                    state: BackendState::Error,
                    reason_code: Some(REASON_PROVISIONING.to_string()),
                    description: Some(DESCRIPTION_UNRESOLVED.to_string()),
                    updated_at: now,
                }
            }
        }
    }
}

fn backend_ids(lb: &LoadBalancer) -> Vec<InstanceId> {
    lb.backends.iter().map(|b| b.instance_id.clone()).collect()
}

#[async_trait]
impl<S: Store + 'static> ControlPlane for LoadBalancingService<S> {
    // =========================================================================
    // Load Balancer Operations
    // =========================================================================

    async fn create_load_balancer(
        &self,
        principal: &Principal,
        request: CreateLoadBalancerRequest,
    ) -> Result<CreateLoadBalancerResponse> {
        validate_load_balancer_name(&request.name)?;
        let listeners = validate::listeners(&request.listeners)?;

        let account_id = principal.account_id;
        let name = request.name.as_str();

        let access = &self.access;
        self.store
            .allocate_load_balancer(&LoadBalancer::new(account_id, name), &|count| {
                access.authorize_quota(principal, ResourceClass::LoadBalancer, count)
            })
            .map_err(|e| match e {
                StoreError::AdmissionDenied => ControlError::QuotaExceeded { account_id },
                other => ControlError::from_store(name, other),
            })?;

        let mut saga = Saga::begin(&*self.store, account_id, name);
        saga.on_failure(Compensation::DeleteLoadBalancer);
        saga.on_failure(Compensation::UnlinkReferences);

        let dns = match self.dns.allocate(&account_id, name).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(name = %name, error = %e, "DNS allocation failed");
                return Err(saga.abort(ControlError::Internal(
                    "New dns name could not be created".into(),
                )));
            }
        };
        let fqdn = dns.fqdn.clone();
        if let Err(e) = self.modify(&account_id, name, |lb| {
            lb.dns = Some(dns.clone());
            Ok(())
        }) {
            return Err(saga.abort(e));
        }

        let mut zones = Vec::new();
        if !request.zones.is_empty() {
            zones = match validate::zones(&self.config, &request.zones) {
                Ok(zones) => zones,
                Err(e) => return Err(saga.abort(e)),
            };
            if let Err(e) = self.modify(&account_id, name, |lb| {
                lb.zones = zones
                    .iter()
                    .map(|z| Zone {
                        name: z.clone(),
                        state: ZoneState::InService,
                    })
                    .collect();
                Ok(())
            }) {
                return Err(saga.abort(e));
            }
        }

        if let Err(e) = self
            .dispatch(
                account_id,
                name,
                EventKind::NewLoadBalancer { zones },
                "Failed to create the loadbalancer",
            )
            .await
        {
            return Err(saga.abort(e));
        }

        if !listeners.is_empty() {
            if let Err(e) = self.modify(&account_id, name, |lb| {
                lb.listeners.clone_from(&listeners);
                Ok(())
            }) {
                return Err(saga.abort(e));
            }
            if let Err(e) = self
                .dispatch(
                    account_id,
                    name,
                    EventKind::CreateListener {
                        listeners: listeners.clone(),
                    },
                    "Failed to create listener",
                )
                .await
            {
                return Err(saga.abort(e));
            }
        }

        saga.complete();

        tracing::info!(
            account_id = %account_id,
            name = %name,
            dns_name = %fqdn,
            "Created load balancer"
        );

        Ok(CreateLoadBalancerResponse { dns_name: fqdn })
    }

    async fn delete_load_balancer(&self, principal: &Principal, name: &str) -> Result<()> {
        let Some(lb) = self.find_for_delete(principal, name)? else {
            tracing::debug!(name = %name, "Delete of missing load balancer");
            return Ok(());
        };

        if !self.access.authorize(principal, &lb, Action::Delete) {
            return Err(ControlError::LoadBalancerNotFound(name.to_string()));
        }

        let ports: Vec<u16> = lb.listeners.iter().map(|l| l.load_balancer_port).collect();
        if !ports.is_empty() {
            if let Err(e) = self
                .dispatch(
                    lb.account_id,
                    &lb.name,
                    EventKind::DeleteListener { ports },
                    "Failed to delete listener",
                )
                .await
            {
                tracing::warn!(name = %name, error = %e, "Continuing delete without listener event");
            }
        }

        self.dispatch(
            lb.account_id,
            &lb.name,
            EventKind::DeleteLoadBalancer,
            "Failed to delete the loadbalancer",
        )
        .await?;

        let unlinked = self.store.unlink_servos(&lb.account_id, &lb.name)?;
        match self.store.delete_load_balancer(&lb.account_id, &lb.name) {
            Ok(()) | Err(StoreError::NotFound) => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            account_id = %lb.account_id,
            name = %lb.name,
            servos_unlinked = unlinked,
            "Deleted load balancer"
        );

        Ok(())
    }

    async fn describe_load_balancers(
        &self,
        principal: &Principal,
        names: &[String],
    ) -> Result<Vec<LoadBalancerDescription>> {
        let verbose = principal.administrator && names.iter().any(|n| n == VERBOSE);
        let wanted: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|n| *n != VERBOSE)
            .collect();

        let candidates = if verbose {
            self.store.list_all_load_balancers()?
        } else {
            self.store.list_load_balancers_by_account(&principal.account_id)?
        };

        Ok(candidates
            .iter()
            .filter(|lb| wanted.is_empty() || wanted.contains(&lb.name.as_str()))
            .filter(|lb| self.access.authorize(principal, lb, Action::Describe))
            .map(describe::load_balancer)
            .collect())
    }

    // =========================================================================
    // Listener Operations
    // =========================================================================

    async fn create_listeners(
        &self,
        principal: &Principal,
        name: &str,
        listeners: Vec<ListenerSpec>,
    ) -> Result<Vec<Listener>> {
        let requested = validate::listeners(&listeners)?;
        let lb = self.load(principal, name, Action::Modify)?;
        let added = validate::new_listeners(&lb, requested)?;
        if added.is_empty() {
            return Ok(lb.listeners);
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::CreateListener {
                listeners: added.clone(),
            },
            "Failed to create listener",
        )
        .await?;

        let updated = self.modify(&lb.account_id, name, |current| {
            for listener in &added {
                match current.listener(listener.load_balancer_port) {
                    Some(existing) if existing == listener => {}
                    Some(_) => {
                        return Err(StoreError::Rejected(format!(
                            "a listener already exists on port {} with a different configuration",
                            listener.load_balancer_port
                        )))
                    }
                    None => current.listeners.push(listener.clone()),
                }
            }
            Ok(())
        })?;

        tracing::info!(name = %name, added = added.len(), "Created listeners");

        Ok(updated.listeners)
    }

    async fn delete_listeners(
        &self,
        principal: &Principal,
        name: &str,
        ports: Vec<u32>,
    ) -> Result<()> {
        let ports = validate::ports(&ports)?;
        let lb = self.load(principal, name, Action::Modify)?;
        let present: Vec<u16> = ports
            .into_iter()
            .filter(|p| lb.listener(*p).is_some())
            .collect();
        if present.is_empty() {
            return Ok(());
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::DeleteListener {
                ports: present.clone(),
            },
            "Failed to delete listener",
        )
        .await?;

        self.modify(&lb.account_id, name, |current| {
            current
                .listeners
                .retain(|l| !present.contains(&l.load_balancer_port));
            Ok(())
        })?;

        tracing::info!(name = %name, ports = ?present, "Deleted listeners");

        Ok(())
    }

    // =========================================================================
    // Backend Operations
    // =========================================================================

    async fn register_instances(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceId>> {
        let requested = validate::instance_ids(&instance_ids)?;
        let lb = self.load(principal, name, Action::Modify)?;

        let fresh: Vec<InstanceId> = requested
            .into_iter()
            .filter(|id| !lb.has_backend(id))
            .collect();
        if fresh.is_empty() {
            return Ok(backend_ids(&lb));
        }

        let mut backends = Vec::with_capacity(fresh.len());
        for id in &fresh {
            backends.push(self.new_backend(id.clone()).await);
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::RegisterInstances {
                instances: fresh.clone(),
            },
            "Failed to register instances",
        )
        .await?;

        let updated = self.modify(&lb.account_id, name, |current| {
            for backend in &backends {
                if !current.has_backend(&backend.instance_id) {
                    current.backends.push(backend.clone());
                }
            }
            Ok(())
        })?;

        tracing::info!(name = %name, registered = ?fresh, "Registered instances");

        Ok(backend_ids(&updated))
    }

    async fn deregister_instances(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceId>> {
        let requested = validate::instance_ids(&instance_ids)?;
        let lb = self.load(principal, name, Action::Modify)?;

        let present: Vec<InstanceId> = requested
            .into_iter()
            .filter(|id| lb.has_backend(id))
            .collect();
        if present.is_empty() {
            return Ok(backend_ids(&lb));
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::DeregisterInstances {
                instances: present.clone(),
            },
            "Failed to deregister instances",
        )
        .await?;

        let updated = self.modify(&lb.account_id, name, |current| {
            current
                .backends
                .retain(|b| !present.contains(&b.instance_id));
            Ok(())
        })?;

        tracing::info!(name = %name, deregistered = ?present, "Deregistered instances");

        Ok(backend_ids(&updated))
    }

    async fn describe_instance_health(
        &self,
        principal: &Principal,
        name: &str,
        instance_ids: Vec<String>,
    ) -> Result<Vec<InstanceHealth>> {
        let requested = validate::instance_ids(&instance_ids)?;
        let lb = self.load(principal, name, Action::Describe)?;
        describe::instance_health(&lb, &requested)
    }

    async fn configure_health_check(
        &self,
        principal: &Principal,
        name: &str,
        request: ConfigureHealthCheckRequest,
    ) -> Result<HealthCheck> {
        let health_check = validate::health_check(&request)?;
        let lb = self.load(principal, name, Action::Modify)?;

        self.modify(&lb.account_id, name, |current| {
            current.health_check = Some(health_check.clone());
            Ok(())
        })?;

        tracing::info!(
            name = %name,
            target = %health_check.target,
            interval = health_check.interval_seconds,
            "Configured health check"
        );

        Ok(health_check)
    }

    // =========================================================================
    // Zone Operations
    // =========================================================================

    async fn enable_zones(
        &self,
        principal: &Principal,
        name: &str,
        zones: Vec<String>,
    ) -> Result<Vec<String>> {
        let requested = validate::zones(&self.config, &zones)?;
        let lb = self.load(principal, name, Action::Modify)?;

        let enabling: Vec<String> = requested
            .into_iter()
            .filter(|z| lb.zone(z).map_or(true, |zone| zone.state != ZoneState::InService))
            .collect();
        if enabling.is_empty() {
            return Ok(lb.in_service_zone_names());
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::EnabledZones {
                zones: enabling.clone(),
            },
            "Failed to enable zones",
        )
        .await?;

        let updated = self.modify(&lb.account_id, name, |current| {
            for zone in &enabling {
                match current.zones.iter_mut().find(|z| &z.name == zone) {
                    Some(existing) => existing.state = ZoneState::InService,
                    None => current.zones.push(Zone {
                        name: zone.clone(),
                        state: ZoneState::InService,
                    }),
                }
            }
            Ok(())
        })?;

        tracing::info!(name = %name, zones = ?enabling, "Enabled zones");

        Ok(updated.in_service_zone_names())
    }

    async fn disable_zones(
        &self,
        principal: &Principal,
        name: &str,
        zones: Vec<String>,
    ) -> Result<Vec<String>> {
        for zone in &zones {
            validate_zone_name(zone)?;
        }
        let lb = self.load(principal, name, Action::Modify)?;

        let mut disabling: Vec<String> = Vec::new();
        for zone in zones {
            let in_service = lb
                .zone(&zone)
                .is_some_and(|z| z.state == ZoneState::InService);
            if in_service && !disabling.contains(&zone) {
                disabling.push(zone);
            }
        }
        if disabling.is_empty() {
            return Ok(lb.in_service_zone_names());
        }

        self.dispatch(
            lb.account_id,
            name,
            EventKind::DisabledZones {
                zones: disabling.clone(),
            },
            "Failed to disable zones",
        )
        .await?;

        let updated = self.modify(&lb.account_id, name, |current| {
            for zone in &mut current.zones {
                if disabling.contains(&zone.name) {
                    zone.state = ZoneState::Disabled;
                }
            }
            Ok(())
        })?;

        tracing::info!(name = %name, zones = ?disabling, "Disabled zones");

        Ok(updated.in_service_zone_names())
    }

    // =========================================================================
    // Agent Operations
    // =========================================================================

    async fn describe_assigned_load_balancer(
        &self,
        servo_id: &InstanceId,
        origin: IpAddr,
    ) -> Option<AssignedLoadBalancer> {
        let agent = self.gate.admit(servo_id, origin)?;
        Some(describe::assigned_load_balancer(&agent))
    }

    async fn report_state(
        &self,
        servo_id: &InstanceId,
        origin: IpAddr,
        report: ServoReport,
    ) -> ReportSummary {
        let Some(agent) = self.gate.admit(servo_id, origin) else {
            return ReportSummary {
                admitted: false,
                applied: 0,
                dropped: u32::try_from(report.instances.len()).unwrap_or(u32::MAX),
            };
        };

        let summary = report::apply(&*self.store, &*self.metrics, &agent, &report);

        tracing::debug!(
            servo_id = %servo_id,
            load_balancer = %agent.load_balancer.name,
            applied = summary.applied,
            dropped = summary.dropped,
            "Processed agent report"
        );

        summary
    }

    // =========================================================================
    // Servo Registry
    // =========================================================================

    async fn register_servo(
        &self,
        principal: &Principal,
        servo_id: InstanceId,
        request: RegisterServoRequest,
    ) -> Result<ServoInstance> {
        validate_zone_name(&request.zone)?;
        if request.public_address.is_none() && request.private_address.is_none() {
            return Err(ControlError::InvalidArgument(
                "a servo needs a public or private address".into(),
            ));
        }

        let name = request.load_balancer.as_str();
        let lb = self
            .store
            .get_load_balancer(&request.account_id, name)
            .map_err(|e| ControlError::from_store(name, e))?;
        if !self.access.authorize(principal, &lb, Action::Modify) {
            return Err(ControlError::LoadBalancerNotFound(name.to_string()));
        }
        if lb.zone(&request.zone).is_none() {
            return Err(ControlError::InvalidArgument(format!(
                "zone {} is not assigned to load balancer {name}",
                request.zone
            )));
        }

        if let Some(existing) = self.store.get_servo_instance(&servo_id)? {
            let moved = existing.public_address != request.public_address
                || existing.private_address != request.private_address;
            if moved && !principal.administrator {
                return Err(ControlError::InvalidArgument(format!(
                    "servo {servo_id} is already registered at another address"
                )));
            }
        }

        let servo = ServoInstance {
            servo_id,
            public_address: request.public_address,
            private_address: request.private_address,
            assignment: Some(ZoneAssignment {
                account_id: request.account_id,
                load_balancer: request.load_balancer.clone(),
                zone: request.zone.clone(),
            }),
            registered_at: Utc::now(),
        };
        self.store.put_servo_instance(&servo)?;

        if let Some(group) = request.security_group {
            self.modify(&request.account_id, name, |current| {
                current.security_group = Some(group.clone());
                Ok(())
            })?;
        }

        tracing::info!(
            servo_id = %servo.servo_id,
            load_balancer = %name,
            zone = %request.zone,
            "Registered servo"
        );

        Ok(servo)
    }

    async fn deregister_servo(&self, principal: &Principal, servo_id: &InstanceId) -> Result<()> {
        let Some(servo) = self.store.get_servo_instance(servo_id)? else {
            return Ok(());
        };
        if !principal.administrator {
            let owned = servo.assignment.as_ref().is_some_and(|a| {
                self.store
                    .get_load_balancer(&a.account_id, &a.load_balancer)
                    .is_ok_and(|lb| self.access.authorize(principal, &lb, Action::Modify))
            });
            if !owned {
                return Err(ControlError::InvalidArgument(format!(
                    "servo {servo_id} is not assigned to a balancer owned by the caller"
                )));
            }
        }

        match self.store.delete_servo_instance(servo_id) {
            Ok(()) => {
                tracing::info!(servo_id = %servo_id, "Deregistered servo");
                Ok(())
            }
            Err(StoreError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SYSTEM_ACCOUNT;
    use crate::dispatch::MockEventDispatcher;
    use crate::inventory::InstanceLocation;
    use crate::types::InstanceStateReport;
    use lbcp_store::{RocksStore, SecurityGroupRef};
    use tempfile::TempDir;

    struct Harness {
        service: LoadBalancingService<RocksStore>,
        dispatcher: Arc<MockEventDispatcher>,
        inventory: Arc<StaticInstanceResolver>,
        _dir: TempDir,
    }

    fn setup() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let config = ControlConfig {
            available_zones: vec!["zone-a".into(), "zone-b".into()],
            max_load_balancers_per_account: 2,
            ..ControlConfig::default()
        };
        let dispatcher = Arc::new(MockEventDispatcher::new());
        let inventory = Arc::new(StaticInstanceResolver::new());
        let service = LoadBalancingService::with_defaults(store, config)
            .with_dispatcher(dispatcher.clone())
            .with_inventory(inventory.clone());
        Harness {
            service,
            dispatcher,
            inventory,
            _dir: dir,
        }
    }

    fn owner() -> Principal {
        Principal::account(AccountId::from_bytes([1u8; 32]))
    }

    fn stranger() -> Principal {
        Principal::account(AccountId::from_bytes([2u8; 32]))
    }

    async fn create(h: &Harness, name: &str) {
        h.service
            .create_load_balancer(
                &owner(),
                CreateLoadBalancerRequest::new(name)
                    .with_zones(["zone-a"])
                    .with_listener(ListenerSpec::new("HTTP", 80, 8080)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_persists_everything_and_emits_in_order() {
        let h = setup();
        let response = h
            .service
            .create_load_balancer(
                &owner(),
                CreateLoadBalancerRequest::new("web")
                    .with_zones(["zone-a"])
                    .with_listener(ListenerSpec::new("HTTP", 80, 8080)),
            )
            .await
            .unwrap();
        assert!(response.dns_name.starts_with("web-"));
        assert!(response.dns_name.ends_with(".lb.internal"));

        assert_eq!(h.dispatcher.kinds(), vec!["new_load_balancer", "create_listener"]);

        let lb = h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .unwrap();
        assert_eq!(lb.dns.unwrap().fqdn, response.dns_name);
        assert_eq!(lb.in_service_zone_names(), vec!["zone-a"]);
        assert_eq!(lb.listeners.len(), 1);
    }

    #[tokio::test]
    async fn create_rejects_bad_names_and_duplicates() {
        let h = setup();
        let err = h
            .service
            .create_load_balancer(&owner(), CreateLoadBalancerRequest::new("bad_name"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));

        create(&h, "web").await;
        let err = h
            .service
            .create_load_balancer(&owner(), CreateLoadBalancerRequest::new("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_enforces_quota() {
        let h = setup();
        create(&h, "one").await;
        create(&h, "two").await;

        let err = h
            .service
            .create_load_balancer(&owner(), CreateLoadBalancerRequest::new("three"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::QuotaExceeded { .. }));
        assert_eq!(err.http_status_code(), 429);
    }

    #[tokio::test]
    async fn create_with_unknown_zone_rolls_back() {
        let h = setup();
        let err = h
            .service
            .create_load_balancer(
                &owner(),
                CreateLoadBalancerRequest::new("web").with_zones(["zone-z"]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));
        assert!(h
            .service
            .store()
            .list_load_balancers_by_account(&owner().account_id)
            .unwrap()
            .is_empty());
        assert!(h.dispatcher.events().is_empty());
    }

    #[tokio::test]
    async fn create_dispatch_failure_carries_cause() {
        let h = setup();
        h.dispatcher.fail_on("new_load_balancer", Some("servo pool exhausted"));

        let err = h
            .service
            .create_load_balancer(&owner(), CreateLoadBalancerRequest::new("web"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to create the loadbalancer: servo pool exhausted"
        );

        h.dispatcher.fail_on("new_load_balancer", None);
        let err = h
            .service
            .create_load_balancer(&owner(), CreateLoadBalancerRequest::new("web"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to create the loadbalancer: internal error");
    }

    #[tokio::test]
    async fn delete_dispatch_failure_keeps_balancer() {
        let h = setup();
        create(&h, "web").await;
        h.dispatcher.fail_on("delete_load_balancer", None);

        let err = h.service.delete_load_balancer(&owner(), "web").await.unwrap_err();
        assert!(matches!(err, ControlError::DispatchFailed { .. }));
        assert!(h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .is_ok());
    }

    #[tokio::test]
    async fn delete_listener_event_failure_is_not_fatal() {
        let h = setup();
        create(&h, "web").await;
        h.dispatcher.fail_on("delete_listener", None);

        h.service.delete_load_balancer(&owner(), "web").await.unwrap();
        assert!(h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .is_err());
    }

    #[tokio::test]
    async fn administrator_deletes_across_accounts() {
        let h = setup();
        create(&h, "web").await;

        h.service.delete_load_balancer(&stranger(), "web").await.unwrap();
        assert!(h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .is_ok());

        let admin = Principal::administrator(AccountId::from_bytes([9u8; 32]));
        h.service.delete_load_balancer(&admin, "web").await.unwrap();
        assert!(h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .is_err());
    }

    #[tokio::test]
    async fn describe_is_account_scoped_unless_verbose() {
        let h = setup();
        create(&h, "web").await;

        let own = h.service.describe_load_balancers(&owner(), &[]).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].listeners.len(), 1);

        let other = h.service.describe_load_balancers(&stranger(), &[]).await.unwrap();
        assert!(other.is_empty());

        let verbose = vec![VERBOSE.to_string()];
        let not_admin = h
            .service
            .describe_load_balancers(&stranger(), &verbose)
            .await
            .unwrap();
        assert!(not_admin.is_empty());

        // The token never filters by name, even when it grants nothing.
        let own_verbose = h
            .service
            .describe_load_balancers(&owner(), &verbose)
            .await
            .unwrap();
        assert_eq!(own_verbose.len(), 1);
        assert_eq!(own_verbose[0].name, "web");

        let admin = Principal::administrator(SYSTEM_ACCOUNT);
        let all = h.service.describe_load_balancers(&admin, &verbose).await.unwrap();
        assert_eq!(all.len(), 1);

        let filtered = h
            .service
            .describe_load_balancers(&owner(), &["other".to_string()])
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn mutations_on_foreign_balancer_are_not_found() {
        let h = setup();
        create(&h, "web").await;

        let err = h
            .service
            .register_instances(&stranger(), "web", vec!["i-0000000a".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::LoadBalancerNotFound(_)));
    }

    #[tokio::test]
    async fn listeners_add_skip_identical_and_delete() {
        let h = setup();
        create(&h, "web").await;

        let listeners = h
            .service
            .create_listeners(
                &owner(),
                "web",
                vec![
                    ListenerSpec::new("HTTP", 80, 8080),
                    ListenerSpec::new("TCP", 9000, 9000),
                ],
            )
            .await
            .unwrap();
        assert_eq!(listeners.len(), 2);

        let err = h
            .service
            .create_listeners(&owner(), "web", vec![ListenerSpec::new("TCP", 80, 1234)])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));

        h.service
            .delete_listeners(&owner(), "web", vec![80, 9999])
            .await
            .unwrap();
        let lb = h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .unwrap();
        assert_eq!(lb.listeners.len(), 1);
        assert_eq!(lb.listeners[0].load_balancer_port, 9000);
    }

    #[tokio::test]
    async fn mutation_dispatch_failure_leaves_store_untouched() {
        let h = setup();
        create(&h, "web").await;
        h.dispatcher.fail_on("register_instances", Some("agent offline"));

        let err = h
            .service
            .register_instances(&owner(), "web", vec!["i-0000000a".into()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Failed to register instances: agent offline");

        let lb = h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .unwrap();
        assert!(lb.backends.is_empty());
    }

    #[tokio::test]
    async fn unresolved_instance_is_registered_in_error() {
        let h = setup();
        create(&h, "web").await;
        h.inventory.insert(
            "i-0000000a".parse().unwrap(),
            InstanceLocation {
                ip_address: "10.0.0.10".parse().unwrap(),
                zone: "zone-a".into(),
            },
        );

        h.service
            .register_instances(
                &owner(),
                "web",
                vec!["i-0000000a".into(), "i-0000000b".into()],
            )
            .await
            .unwrap();

        let health = h
            .service
            .describe_instance_health(&owner(), "web", vec![])
            .await
            .unwrap();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].state, BackendState::OutOfService);

        let stored = h
            .service
            .store()
            .get_load_balancer(&owner().account_id, "web")
            .unwrap();
        let unresolved = stored.backend(&"i-0000000b".parse().unwrap()).unwrap();
        assert_eq!(unresolved.state, BackendState::Error);
        assert_eq!(unresolved.reason_code.as_deref(), Some(REASON_PROVISIONING));

        let desc = h.service.describe_load_balancers(&owner(), &[]).await.unwrap();
        assert_eq!(desc[0].instances.len(), 1);
    }

    #[tokio::test]
    async fn deregister_removes_only_registered() {
        let h = setup();
        create(&h, "web").await;
        h.service
            .register_instances(&owner(), "web", vec!["i-0000000a".into()])
            .await
            .unwrap();

        let events_before = h.dispatcher.events().len();
        let remaining = h
            .service
            .deregister_instances(&owner(), "web", vec!["i-000000ff".into()])
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(h.dispatcher.events().len(), events_before);

        let remaining = h
            .service
            .deregister_instances(&owner(), "web", vec!["i-0000000a".into()])
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn zones_enable_and_disable() {
        let h = setup();
        create(&h, "web").await;

        let zones = h
            .service
            .enable_zones(&owner(), "web", vec!["zone-b".into()])
            .await
            .unwrap();
        assert_eq!(zones, vec!["zone-a", "zone-b"]);

        let zones = h
            .service
            .disable_zones(&owner(), "web", vec!["zone-a".into()])
            .await
            .unwrap();
        assert_eq!(zones, vec!["zone-b"]);

        let zones = h
            .service
            .enable_zones(&owner(), "web", vec!["zone-a".into()])
            .await
            .unwrap();
        assert_eq!(zones, vec!["zone-a", "zone-b"]);

        let err = h
            .service
            .enable_zones(&owner(), "web", vec!["zone-z".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn configure_health_check_emits_nothing() {
        let h = setup();
        create(&h, "web").await;
        let before = h.dispatcher.events().len();

        let err = h
            .service
            .configure_health_check(&owner(), "web", ConfigureHealthCheckRequest::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid argument: Healthy Threshold must be specified"
        );

        h.service
            .configure_health_check(
                &owner(),
                "web",
                ConfigureHealthCheckRequest {
                    interval: Some(10),
                    target: Some("TCP:8080".into()),
                    timeout: Some(3),
                    healthy_threshold: Some(3),
                    unhealthy_threshold: Some(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(h.dispatcher.events().len(), before);
    }

    #[tokio::test]
    async fn servo_registration_links_security_group() {
        let h = setup();
        create(&h, "web").await;
        let servo_id: InstanceId = "i-0a1b2c3d".parse().unwrap();

        let err = h
            .service
            .register_servo(
                &owner(),
                servo_id.clone(),
                RegisterServoRequest {
                    public_address: Some("203.0.113.7".parse().unwrap()),
                    private_address: None,
                    account_id: owner().account_id,
                    load_balancer: "web".into(),
                    zone: "zone-b".into(),
                    security_group: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));

        h.service
            .register_servo(
                &owner(),
                servo_id.clone(),
                RegisterServoRequest {
                    public_address: Some("203.0.113.7".parse().unwrap()),
                    private_address: Some("10.0.1.7".parse().unwrap()),
                    account_id: owner().account_id,
                    load_balancer: "web".into(),
                    zone: "zone-a".into(),
                    security_group: Some(SecurityGroupRef {
                        owner_alias: "lbcp".into(),
                        group_name: "servo-web".into(),
                    }),
                },
            )
            .await
            .unwrap();

        let desc = h.service.describe_load_balancers(&owner(), &[]).await.unwrap();
        assert_eq!(
            desc[0].source_security_group.as_ref().unwrap().group_name,
            "servo-web"
        );

        let assigned = h
            .service
            .describe_assigned_load_balancer(&servo_id, "10.0.1.7".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(assigned.zone, "zone-a");
        assert_eq!(assigned.listeners.len(), 1);

        h.service.deregister_servo(&owner(), &servo_id).await.unwrap();
        h.service.deregister_servo(&owner(), &servo_id).await.unwrap();
        assert!(h
            .service
            .describe_assigned_load_balancer(&servo_id, "10.0.1.7".parse().unwrap())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn servo_rebinding_requires_administrator() {
        let h = setup();
        create(&h, "web").await;
        let servo_id: InstanceId = "i-0a1b2c3d".parse().unwrap();
        let at = |ip: &str| RegisterServoRequest {
            public_address: None,
            private_address: Some(ip.parse().unwrap()),
            account_id: owner().account_id,
            load_balancer: "web".into(),
            zone: "zone-a".into(),
            security_group: None,
        };

        let err = h
            .service
            .register_servo(&stranger(), servo_id.clone(), at("10.0.1.7"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::LoadBalancerNotFound(_)));

        h.service
            .register_servo(&owner(), servo_id.clone(), at("10.0.1.7"))
            .await
            .unwrap();
        h.service
            .register_servo(&owner(), servo_id.clone(), at("10.0.1.7"))
            .await
            .unwrap();

        let err = h
            .service
            .register_servo(&owner(), servo_id.clone(), at("192.0.2.66"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidArgument(_)));
        assert!(h
            .service
            .describe_assigned_load_balancer(&servo_id, "192.0.2.66".parse().unwrap())
            .await
            .is_none());
        assert!(h
            .service
            .describe_assigned_load_balancer(&servo_id, "10.0.1.7".parse().unwrap())
            .await
            .is_some());

        assert!(h
            .service
            .deregister_servo(&stranger(), &servo_id)
            .await
            .is_err());

        let admin = Principal::administrator(AccountId::from_bytes([9u8; 32]));
        h.service
            .register_servo(&admin, servo_id.clone(), at("10.0.1.8"))
            .await
            .unwrap();
        assert!(h
            .service
            .describe_assigned_load_balancer(&servo_id, "10.0.1.8".parse().unwrap())
            .await
            .is_some());
        h.service.deregister_servo(&admin, &servo_id).await.unwrap();
    }

    #[tokio::test]
    async fn refused_report_counts_every_entry_as_dropped() {
        let h = setup();
        let summary = h
            .service
            .report_state(
                &"i-0a1b2c3d".parse().unwrap(),
                "10.0.0.1".parse().unwrap(),
                ServoReport {
                    instances: vec![
                        InstanceStateReport::new("i-0000000a", "InService"),
                        InstanceStateReport::new("i-0000000b", "InService"),
                    ],
                    metrics: Vec::new(),
                },
            )
            .await;
        assert!(!summary.admitted);
        assert_eq!(summary.dropped, 2);
    }
}
