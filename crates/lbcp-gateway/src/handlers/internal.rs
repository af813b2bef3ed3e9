//! Internal API endpoints.
//!
//! These endpoints are used by the zone-assignment and compute services.
//! Every endpoint here requires an administrator bearer token.

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use lbcp_auth::JwtValidator;
use lbcp_control::{ControlPlane, InstanceId, InstanceLocation, RegisterServoRequest};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

/// Request body for recording a compute instance's location.
#[derive(Debug, Deserialize)]
pub struct InstanceLocationBody {
    /// Private address of the instance.
    pub ip_address: IpAddr,
    /// Zone the instance runs in.
    pub zone: String,
}

fn parse_instance_id(raw: &str) -> Result<InstanceId, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid instance id: {e}")))
}

/// Register a servo agent for one zone of a balancer.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator, the servo id is
/// malformed or the balancer does not exist.
pub async fn register_servo<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    auth: AuthUser,
    Path(servo_id): Path<String>,
    Json(body): Json<RegisterServoRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let principal = auth.require_administrator()?;
    let servo_id = parse_instance_id(&servo_id)?;
    let servo = state.control.register_servo(&principal, servo_id, body).await?;

    Ok(Json(servo))
}

/// Remove a servo agent record.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator, the servo id is
/// malformed or the store fails.
pub async fn deregister_servo<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    auth: AuthUser,
    Path(servo_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let principal = auth.require_administrator()?;
    let servo_id = parse_instance_id(&servo_id)?;
    state.control.deregister_servo(&principal, &servo_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Record where a compute instance lives.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator or the instance
/// id or zone is malformed.
pub async fn put_instance<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    auth: AuthUser,
    Path(instance_id): Path<String>,
    Json(body): Json<InstanceLocationBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    auth.require_administrator()?;
    let instance_id = parse_instance_id(&instance_id)?;
    lbcp_core::validate_zone_name(&body.zone)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    state.inventory.insert(
        instance_id,
        InstanceLocation {
            ip_address: body.ip_address,
            zone: body.zone,
        },
    );

    Ok(StatusCode::NO_CONTENT)
}

/// Forget a compute instance.
///
/// # Errors
///
/// Returns an error if the caller is not an administrator or the instance
/// id is malformed.
pub async fn delete_instance<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    auth: AuthUser,
    Path(instance_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    auth.require_administrator()?;
    let instance_id = parse_instance_id(&instance_id)?;
    if !state.inventory.remove(&instance_id) {
        tracing::debug!(instance_id = %instance_id, "Removed unknown instance");
    }

    Ok(StatusCode::NO_CONTENT)
}
