//! Liveness endpoints for load balancer clients and internal services.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use lbcp_auth::JwtValidator;
use lbcp_control::ControlPlane;

use crate::state::GatewayState;

const SERVICE: &str = "lbcp-gateway";

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"healthy"` when the gateway answers.
    pub status: &'static str,
    /// Name of the answering service.
    pub service: &'static str,
    /// Crate version of the gateway build.
    pub version: &'static str,
}

/// Body of `GET /internal/v1/health`.
#[derive(Debug, Serialize)]
pub struct InternalLiveness {
    /// Always `"ok"` when the gateway answers.
    pub status: &'static str,
    /// Compute instances whose location the gateway can resolve.
    pub known_instances: usize,
}

/// Public liveness. No token needed.
pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "healthy",
        service: SERVICE,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Internal liveness, used by the compute service to check that location
/// pushes are landing.
pub async fn internal_health<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
) -> Json<InternalLiveness>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    Json(InternalLiveness {
        status: "ok",
        known_instances: state.inventory.len(),
    })
}
