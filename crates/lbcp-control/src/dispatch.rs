//! Event dispatch to the data plane.
//!
//! Every desired-state change is described by an immutable
//! [`LoadBalancerEvent`] and handed to an [`EventDispatcher`]. Dispatch is
//! synchronous from the command's point of view: the command waits for the
//! dispatcher to confirm or fail before it continues.

use std::time::Duration;

use async_trait::async_trait;
use lbcp_core::{AccountId, InstanceId};
use lbcp_store::Listener;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason reported when a dispatch failure carries no cause.
pub const GENERIC_REASON: &str = "internal error";

/// A desired-state change for one load balancer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerEvent {
    /// Unique id of this event.
    pub event_id: Uuid,
    /// Owning account of the balancer.
    pub account_id: AccountId,
    /// Balancer name.
    pub load_balancer: String,
    /// What changed.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl LoadBalancerEvent {
    /// Create an event with a fresh id.
    #[must_use]
    pub fn new(account_id: AccountId, load_balancer: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            account_id,
            load_balancer: load_balancer.into(),
            kind,
        }
    }
}

/// The kinds of change the data plane reconciles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A balancer was created in the given zones.
    NewLoadBalancer {
        /// Zones the balancer starts in.
        zones: Vec<String>,
    },
    /// Listeners were added.
    CreateListener {
        /// The new listeners.
        listeners: Vec<Listener>,
    },
    /// Listeners were removed.
    DeleteListener {
        /// Load balancer ports of the removed listeners.
        ports: Vec<u16>,
    },
    /// The balancer is being deleted.
    DeleteLoadBalancer,
    /// Backend targets were registered.
    RegisterInstances {
        /// Newly registered targets.
        instances: Vec<InstanceId>,
    },
    /// Backend targets were deregistered.
    DeregisterInstances {
        /// Removed targets.
        instances: Vec<InstanceId>,
    },
    /// Zones were enabled.
    EnabledZones {
        /// Enabled zones.
        zones: Vec<String>,
    },
    /// Zones were disabled.
    DisabledZones {
        /// Disabled zones.
        zones: Vec<String>,
    },
}

impl EventKind {
    /// Short name of the event kind, as used on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewLoadBalancer { .. } => "new_load_balancer",
            Self::CreateListener { .. } => "create_listener",
            Self::DeleteListener { .. } => "delete_listener",
            Self::DeleteLoadBalancer => "delete_load_balancer",
            Self::RegisterInstances { .. } => "register_instances",
            Self::DeregisterInstances { .. } => "deregister_instances",
            Self::EnabledZones { .. } => "enabled_zones",
            Self::DisabledZones { .. } => "disabled_zones",
        }
    }
}

/// Dispatch failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DispatchError {
    /// What went wrong.
    pub message: String,
    /// Underlying cause, when one is known.
    pub cause: Option<String>,
}

impl DispatchError {
    /// A failure without a known cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// A failure with an underlying cause.
    #[must_use]
    pub fn with_cause(message: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// The cause's message, or a generic reason when there is none.
    #[must_use]
    pub fn reason(&self) -> &str {
        self.cause.as_deref().unwrap_or(GENERIC_REASON)
    }
}

/// Trait for delivering events to the data plane.
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    /// Deliver one event and wait for confirmation.
    ///
    /// # Errors
    ///
    /// Returns a `DispatchError` if the data plane could not be notified.
    async fn emit(&self, event: &LoadBalancerEvent) -> Result<(), DispatchError>;
}

/// HTTP dispatcher posting events to the data plane's event endpoint.
#[derive(Debug, Clone)]
pub struct HttpEventDispatcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEventDispatcher {
    /// Create a new dispatcher.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The base URL of the data plane event service (e.g., "http://servo-manager:8080")
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self::with_client(client, base_url)
    }

    /// Create a new dispatcher with a custom reqwest client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL of the event service.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Error response from the event service.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[async_trait]
impl EventDispatcher for HttpEventDispatcher {
    async fn emit(&self, event: &LoadBalancerEvent) -> Result<(), DispatchError> {
        let url = format!("{}/v1/events", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(event)
            .send()
            .await
            .map_err(|e| DispatchError::with_cause("event request failed", e.to_string()))?;

        if response.status().is_success() {
            tracing::debug!(
                event_id = %event.event_id,
                kind = event.kind.name(),
                load_balancer = %event.load_balancer,
                "Dispatched event"
            );
            return Ok(());
        }

        let status = response.status();
        let cause = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .ok();

        tracing::error!(
            event_id = %event.event_id,
            kind = event.kind.name(),
            status = %status,
            cause = cause.as_deref().unwrap_or(GENERIC_REASON),
            "Event service rejected event"
        );

        let message = format!("event service returned status {status}");
        Err(match cause {
            Some(cause) => DispatchError::with_cause(message, cause),
            None => DispatchError::new(message),
        })
    }
}

/// A dispatcher for when no data plane is configured.
///
/// Every event is logged and reported as delivered.
#[derive(Debug, Clone, Default)]
pub struct NoopEventDispatcher;

impl NoopEventDispatcher {
    /// Create a new no-op dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventDispatcher for NoopEventDispatcher {
    async fn emit(&self, event: &LoadBalancerEvent) -> Result<(), DispatchError> {
        tracing::warn!(
            kind = event.kind.name(),
            load_balancer = %event.load_balancer,
            "NoopEventDispatcher: event dropped, no data plane configured"
        );
        Ok(())
    }
}

/// A dispatcher for tests that records events and fails on demand.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct MockEventDispatcher {
    events: parking_lot::Mutex<Vec<LoadBalancerEvent>>,
    failing: parking_lot::Mutex<std::collections::HashMap<&'static str, Option<String>>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockEventDispatcher {
    /// Create a dispatcher that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every event of the given kind, optionally with a cause.
    pub fn fail_on(&self, kind: &'static str, cause: Option<&str>) {
        self.failing.lock().insert(kind, cause.map(str::to_string));
    }

    /// Stop failing events.
    pub fn clear_failures(&self) {
        self.failing.lock().clear();
    }

    /// Events delivered so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<LoadBalancerEvent> {
        self.events.lock().clone()
    }

    /// Kind names of the events delivered so far, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind.name()).collect()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl EventDispatcher for MockEventDispatcher {
    async fn emit(&self, event: &LoadBalancerEvent) -> Result<(), DispatchError> {
        if let Some(cause) = self.failing.lock().get(event.kind.name()) {
            return Err(DispatchError {
                message: format!("{} rejected", event.kind.name()),
                cause: cause.clone(),
            });
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}
