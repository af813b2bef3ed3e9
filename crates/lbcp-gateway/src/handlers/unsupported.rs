//! Commands the control plane accepts but does not act on.
//!
//! Policies, stickiness, certificates, subnets and security groups are
//! answered with an empty success so existing clients keep working.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::Json;

use lbcp_auth::JwtValidator;
use lbcp_control::ControlPlane;

use crate::auth::AuthUser;
use crate::state::GatewayState;

/// Answer an unsupported command with `200 {}`.
///
/// The caller must still authenticate.
pub async fn accept<C, V>(
    State(_state): State<Arc<GatewayState<C, V>>>,
    user: AuthUser,
    Path(name): Path<String>,
    uri: Uri,
) -> impl IntoResponse
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    tracing::debug!(
        account_id = %user.account_id,
        load_balancer = %name,
        path = %uri.path(),
        "Ignored unsupported command"
    );

    Json(serde_json::json!({}))
}
