//! Control plane for load balancer provisioning and backend health.
//!
//! This crate owns the desired state of every load balancer and reconciles
//! it with the fleet of servo agents that carry traffic. Commands mutate the
//! store and notify the data plane; agents report observed backend health
//! back through the identity gate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Gateway (HTTP)                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   LoadBalancingService                      │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │  Workflow   │ │  Identity   │ │   Backend Health    │    │
//! │  │  (saga)     │ │  Gate       │ │   State Machine     │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!       ┌───────────┬──────────┼───────────┬────────────┐
//!       ▼           ▼          ▼           ▼            ▼
//!  ┌─────────┐ ┌─────────┐ ┌────────┐ ┌─────────┐ ┌───────────┐
//!  │  Store  │ │ Access  │ │  DNS   │ │ Events  │ │  Metrics  │
//!  │(RocksDB)│ │ Filter  │ │        │ │ (HTTP)  │ │           │
//!  └─────────┘ └─────────┘ └────────┘ └─────────┘ └───────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use lbcp_control::{
//!     ControlConfig, ControlPlane, CreateLoadBalancerRequest, ListenerSpec,
//!     LoadBalancingService, Principal,
//! };
//! use lbcp_store::RocksStore;
//! use lbcp_core::AccountId;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/lbcp")?);
//! let control = LoadBalancingService::with_defaults(store, ControlConfig::default());
//!
//! let principal = Principal::account(AccountId::from_bytes([1u8; 32]));
//! let request = CreateLoadBalancerRequest::new("web")
//!     .with_zones(["zone-a"])
//!     .with_listener(ListenerSpec::new("HTTP", 80, 8080));
//! let created = control.create_load_balancer(&principal, request).await?;
//!
//! println!("Created load balancer at {}", created.dns_name);
//! # Ok(())
//! # }
//! ```
//!
//! # Backend States
//!
//! - `OutOfService` on registration, and whenever an agent reports failure
//! - `InService` when an agent reports the backend healthy
//! - `Error` when the target could not be located; left only by deregistering
//!
//! See the [`health`] module for the transition rules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod access;
pub mod describe;
pub mod dispatch;
pub mod dns;
pub mod error;
pub mod gate;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod report;
pub mod service;
pub mod types;
pub mod validate;
pub mod workflow;

#[cfg(test)]
mod scenarios;

pub use access::{AccessFilter, Action, DefaultAccessFilter, Principal, ResourceClass};
pub use dispatch::{
    DispatchError, EventDispatcher, EventKind, HttpEventDispatcher, LoadBalancerEvent,
    NoopEventDispatcher,
};
pub use dns::{DnsError, DnsProvisioner, DomainDnsProvisioner};
pub use error::{ControlError, Result};
pub use gate::{AdmittedAgent, AgentIdentityGate, Rejection};
pub use inventory::{InstanceLocation, InstanceResolver, StaticInstanceResolver};
pub use metrics::{HealthSample, MetricSample, MetricsSink, TracingMetricsSink};
pub use service::{ControlPlane, LoadBalancingService, VERBOSE};
pub use types::{
    AgentBackend, AssignedLoadBalancer, ConfigureHealthCheckRequest, ControlConfig,
    CreateLoadBalancerRequest, CreateLoadBalancerResponse, InstanceHealth, InstanceStateReport,
    ListenerSpec, LoadBalancerDescription, RegisterServoRequest, ReportSummary, ServoReport,
};

#[cfg(any(test, feature = "test-utils"))]
pub use dispatch::MockEventDispatcher;
#[cfg(any(test, feature = "test-utils"))]
pub use metrics::RecordingMetricsSink;

// Re-export commonly used types from dependencies for convenience
pub use lbcp_core::{AccountId, InstanceId};
pub use lbcp_store::{BackendState, HealthCheck, Listener, LoadBalancer, SecurityGroupRef};
