//! Gateway application state.
//!
//! This module defines the shared state that is available to all request handlers.

use std::sync::Arc;

use lbcp_auth::JwtValidator;
use lbcp_control::{ControlPlane, StaticInstanceResolver};

use crate::config::GatewayConfig;

/// Shared application state for the gateway.
pub struct GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    /// The control plane.
    pub control: Arc<C>,
    /// The JWT validator for authentication.
    pub jwt_validator: Arc<V>,
    /// Instance inventory fed by the compute service through the internal API.
    ///
    /// The same resolver must be handed to the control plane.
    pub inventory: Arc<StaticInstanceResolver>,
    /// Gateway configuration.
    pub config: GatewayConfig,
}

impl<C, V> GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    /// Create a new gateway state.
    #[must_use]
    pub fn new(
        control: Arc<C>,
        jwt_validator: Arc<V>,
        inventory: Arc<StaticInstanceResolver>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            control,
            jwt_validator,
            inventory,
            config,
        }
    }
}

impl<C, V> Clone for GatewayState<C, V>
where
    C: ControlPlane,
    V: JwtValidator,
{
    fn clone(&self) -> Self {
        Self {
            control: Arc::clone(&self.control),
            jwt_validator: Arc::clone(&self.jwt_validator),
            inventory: Arc::clone(&self.inventory),
            config: self.config.clone(),
        }
    }
}
