//! Agent-facing endpoints.
//!
//! Servo agents are not authenticated at the HTTP level. Every call is
//! checked by the control plane's identity gate against the claimed servo id
//! and the peer address of the connection. Refused calls look exactly like
//! calls for an agent with nothing assigned.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use lbcp_auth::JwtValidator;
use lbcp_control::{AssignedLoadBalancer, ControlPlane, InstanceId, ServoReport};

use crate::state::GatewayState;

/// Response for describe-assigned-load-balancer.
#[derive(Debug, Serialize)]
pub struct AssignedLoadBalancerResponse {
    /// The assignment, or `None` when the agent has nothing to serve.
    pub load_balancer: Option<AssignedLoadBalancer>,
}

/// Return the configuration the calling agent should apply.
pub async fn describe_assigned_load_balancer<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    Path(servo_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> impl IntoResponse
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let load_balancer = match (servo_id.parse::<InstanceId>(), connect_info) {
        (Ok(servo_id), Some(ConnectInfo(peer))) => {
            state
                .control
                .describe_assigned_load_balancer(&servo_id, peer.ip())
                .await
        }
        (Err(e), _) => {
            tracing::debug!(servo_id = %servo_id, error = %e, "Malformed servo id");
            None
        }
        (Ok(_), None) => {
            tracing::warn!(servo_id = %servo_id, "No peer address for agent request");
            None
        }
    };

    Json(AssignedLoadBalancerResponse { load_balancer })
}

/// Accept a state report from an agent.
///
/// Always answers `202 Accepted`; agents have no way to act on a refusal.
pub async fn report_state<C, V>(
    State(state): State<Arc<GatewayState<C, V>>>,
    Path(servo_id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Json(report): Json<ServoReport>,
) -> impl IntoResponse
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    match (servo_id.parse::<InstanceId>(), connect_info) {
        (Ok(servo_id), Some(ConnectInfo(peer))) => {
            let summary = state
                .control
                .report_state(&servo_id, peer.ip(), report)
                .await;
            tracing::debug!(
                servo_id = %servo_id,
                admitted = summary.admitted,
                applied = summary.applied,
                dropped = summary.dropped,
                "Processed agent report"
            );
        }
        _ => {
            tracing::warn!(servo_id = %servo_id, "Dropped report from unidentifiable agent");
        }
    }

    (StatusCode::ACCEPTED, Json(serde_json::json!({})))
}
