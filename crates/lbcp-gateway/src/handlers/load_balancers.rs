//! Load balancer management endpoints.
//!
//! Every handler here authenticates the caller and forwards to the control
//! plane with the caller's principal.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use lbcp_auth::JwtValidator;
use lbcp_control::{
    ConfigureHealthCheckRequest, ControlPlane, CreateLoadBalancerRequest, HealthCheck,
    InstanceHealth, InstanceId, Listener, ListenerSpec, LoadBalancerDescription,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Comma-separated name filter for describe-load-balancers.
#[derive(Debug, Default, Deserialize)]
pub struct NamesQuery {
    /// Names to describe. `verbose` lists every account for administrators.
    #[serde(default)]
    pub names: Option<String>,
}

/// Comma-separated instance filter for describe-instance-health.
#[derive(Debug, Default, Deserialize)]
pub struct InstancesQuery {
    /// Instance ids to report on. Empty reports every registered target.
    #[serde(default)]
    pub instances: Option<String>,
}

/// Response for describe-load-balancers.
#[derive(Debug, Serialize)]
pub struct DescribeLoadBalancersResponse {
    /// Matching load balancers.
    pub load_balancers: Vec<LoadBalancerDescription>,
}

/// Request to add listeners.
#[derive(Debug, Deserialize)]
pub struct ListenersBody {
    /// Listeners to add.
    pub listeners: Vec<ListenerSpec>,
}

/// Response listing a balancer's listeners.
#[derive(Debug, Serialize)]
pub struct ListenersResponse {
    /// Every listener on the balancer.
    pub listeners: Vec<Listener>,
}

/// Request to remove listeners.
#[derive(Debug, Deserialize)]
pub struct PortsBody {
    /// Load balancer ports to remove.
    pub ports: Vec<u32>,
}

/// Request naming targets.
#[derive(Debug, Deserialize)]
pub struct InstancesBody {
    /// Target instance ids.
    pub instances: Vec<String>,
}

/// Response listing registered targets.
#[derive(Debug, Serialize)]
pub struct InstancesResponse {
    /// Every target registered after the change.
    pub instances: Vec<InstanceId>,
}

/// Response for describe-instance-health.
#[derive(Debug, Serialize)]
pub struct InstanceHealthResponse {
    /// Health of each selected target.
    pub instance_states: Vec<InstanceHealth>,
}

/// Request naming zones.
#[derive(Debug, Deserialize)]
pub struct ZonesBody {
    /// Zone names.
    pub zones: Vec<String>,
}

/// Response listing zones in service.
#[derive(Debug, Serialize)]
pub struct ZonesResponse {
    /// Zones in service after the change.
    pub zones: Vec<String>,
}

/// Response for configure-health-check.
#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    /// The stored policy.
    pub health_check: HealthCheck,
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a load balancer.
///
/// # Errors
///
/// Returns an error if validation fails, the account is at its limit, the
/// name is taken, or the data plane could not be notified.
pub async fn create_load_balancer<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Json(body): Json<CreateLoadBalancerRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let created = state
        .control
        .create_load_balancer(&user.principal(), body)
        .await?;

    Ok((StatusCode::CREATED, Json(created)))
}

/// Describe the caller's load balancers.
///
/// # Errors
///
/// Returns an error if the control plane operation fails.
pub async fn describe_load_balancers<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Query(query): Query<NamesQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let names = split_list(query.names.as_deref());
    let load_balancers = state
        .control
        .describe_load_balancers(&user.principal(), &names)
        .await?;

    Ok(Json(DescribeLoadBalancersResponse { load_balancers }))
}

/// Delete a load balancer. Deleting a missing balancer succeeds.
///
/// # Errors
///
/// Returns an error if the data plane could not be notified.
pub async fn delete_load_balancer<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    state
        .control
        .delete_load_balancer(&user.principal(), &name)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Add listeners to a load balancer.
///
/// # Errors
///
/// Returns an error if a listener is invalid or conflicts with an existing one.
pub async fn create_listeners<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<ListenersBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let listeners = state
        .control
        .create_listeners(&user.principal(), &name, body.listeners)
        .await?;

    Ok(Json(ListenersResponse { listeners }))
}

/// Remove listeners by port.
///
/// # Errors
///
/// Returns an error if a port is out of range or the balancer is not found.
pub async fn delete_listeners<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<PortsBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    state
        .control
        .delete_listeners(&user.principal(), &name, body.ports)
        .await?;

    Ok(Json(serde_json::json!({})))
}

/// Register targets with a load balancer.
///
/// # Errors
///
/// Returns an error if an instance id is malformed or the data plane could
/// not be notified.
pub async fn register_instances<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<InstancesBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let instances = state
        .control
        .register_instances(&user.principal(), &name, body.instances)
        .await?;

    Ok(Json(InstancesResponse { instances }))
}

/// Deregister targets from a load balancer.
///
/// # Errors
///
/// Returns an error if an instance id is malformed or the data plane could
/// not be notified.
pub async fn deregister_instances<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<InstancesBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let instances = state
        .control
        .deregister_instances(&user.principal(), &name, body.instances)
        .await?;

    Ok(Json(InstancesResponse { instances }))
}

/// Report target health.
///
/// # Errors
///
/// Returns an error if a requested instance is not registered.
pub async fn describe_instance_health<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Query(query): Query<InstancesQuery>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let instance_states = state
        .control
        .describe_instance_health(
            &user.principal(),
            &name,
            split_list(query.instances.as_deref()),
        )
        .await?;

    Ok(Json(InstanceHealthResponse { instance_states }))
}

/// Replace the health check policy.
///
/// # Errors
///
/// Returns an error naming the first missing or out-of-range field.
pub async fn configure_health_check<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<ConfigureHealthCheckRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let health_check = state
        .control
        .configure_health_check(&user.principal(), &name, body)
        .await?;

    Ok(Json(HealthCheckResponse { health_check }))
}

/// Put zones in service.
///
/// # Errors
///
/// Returns an error if a zone is unknown or the data plane could not be
/// notified.
pub async fn enable_zones<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<ZonesBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let zones = state
        .control
        .enable_zones(&user.principal(), &name, body.zones)
        .await?;

    Ok(Json(ZonesResponse { zones }))
}

/// Take zones out of service.
///
/// # Errors
///
/// Returns an error if a zone is unknown or the data plane could not be
/// notified.
pub async fn disable_zones<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    Json(body): Json<ZonesBody>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let zones = state
        .control
        .disable_zones(&user.principal(), &name, body.zones)
        .await?;

    Ok(Json(ZonesResponse { zones }))
}
