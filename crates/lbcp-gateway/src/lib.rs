//! HTTP gateway for the load balancer control plane.
//!
//! This crate exposes the control plane over JSON routes. It handles:
//!
//! - Bearer token authentication for account-facing commands
//! - REST endpoints for every load balancer command
//! - Agent-facing routes guarded by the identity gate and peer address
//! - Internal routes for the servo registry and instance inventory
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐        ┌──────────────────────┐
//! │  Account clients     │        │    Servo agents      │
//! │  (Bearer JWT)        │        │  (peer address)      │
//! └──────────────────────┘        └──────────────────────┘
//!            │                               │
//!            ▼                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        lbcp-gateway                         │
//! │  ┌─────────────┐ ┌─────────────┐ ┌─────────────────────┐    │
//! │  │   Auth      │ │   Router    │ │   Agent routes      │    │
//! │  │  Extractor  │ │  + Handlers │ │   (ConnectInfo)     │    │
//! │  └─────────────┘ └─────────────┘ └─────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┼──────────────┐
//!               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌───────────┐
//!        │ Control  │   │  Auth    │   │ Instance  │
//!        │ Plane    │   │ (JWT)    │   │ Inventory │
//!        └──────────┘   └──────────┘   └───────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//! use lbcp_gateway::{GatewayConfig, GatewayState, create_router};
//! use lbcp_control::{ControlConfig, LoadBalancingService, StaticInstanceResolver};
//! use lbcp_auth::{AuthConfig, SharedSecretValidator};
//! use lbcp_store::RocksStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/lbcp")?);
//! let inventory = Arc::new(StaticInstanceResolver::new());
//! let control = LoadBalancingService::with_defaults(store, ControlConfig::default())
//!     .with_inventory(inventory.clone());
//! let jwt_validator = Arc::new(SharedSecretValidator::new(AuthConfig::default()));
//!
//! let state = GatewayState::new(
//!     Arc::new(control),
//!     jwt_validator,
//!     inventory,
//!     GatewayConfig::default(),
//! );
//! let app = create_router(state);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(
//!     listener,
//!     app.into_make_service_with_connect_info::<SocketAddr>(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::{ConfigError, GatewayConfig};
pub use error::ApiError;
pub use routes::create_router;
pub use state::GatewayState;

// Re-export key types for convenience
pub use auth::AuthUser;
