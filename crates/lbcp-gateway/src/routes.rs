//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use lbcp_auth::JwtValidator;
use lbcp_control::ControlPlane;

use crate::handlers::{agents, health, internal, load_balancers, unsupported};
use crate::state::GatewayState;

const UNSUPPORTED_SURFACES: [&str; 5] = [
    "policies",
    "stickiness",
    "certificates",
    "subnets",
    "security-groups",
];

/// Create the gateway router with all routes and middleware.
///
/// Agent routes read the peer address through `ConnectInfo`, so the router
/// must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Load balancers (authenticated)
/// - `POST /v1/load-balancers` - Create load balancer
/// - `GET /v1/load-balancers?names=a,b` - Describe load balancers
/// - `DELETE /v1/load-balancers/:name` - Delete load balancer
/// - `POST /v1/load-balancers/:name/listeners` - Create listeners
/// - `POST /v1/load-balancers/:name/listeners/delete` - Delete listeners
/// - `POST /v1/load-balancers/:name/instances/register` - Register instances
/// - `POST /v1/load-balancers/:name/instances/deregister` - Deregister instances
/// - `GET /v1/load-balancers/:name/instance-health?instances=a,b` - Instance health
/// - `PUT /v1/load-balancers/:name/health-check` - Configure health check
/// - `POST /v1/load-balancers/:name/zones/enable` - Enable zones
/// - `POST /v1/load-balancers/:name/zones/disable` - Disable zones
/// - `POST /v1/load-balancers/:name/{policies,stickiness,certificates,subnets,security-groups}` - Accepted, no effect
///
/// ## Agents (identity gate)
/// - `GET /internal/v1/servos/:servo_id/load-balancer` - Assigned configuration
/// - `POST /internal/v1/servos/:servo_id/states` - Push state report
///
/// ## Internal (administrator token, except health)
/// - `GET /internal/v1/health` - Health check
/// - `PUT /internal/v1/servos/:servo_id` - Register servo
/// - `DELETE /internal/v1/servos/:servo_id` - Deregister servo
/// - `PUT /internal/v1/instances/:instance_id` - Record instance location
/// - `DELETE /internal/v1/instances/:instance_id` - Forget instance
pub fn create_router<C, V>(state: GatewayState<C, V>) -> Router
where
    C: ControlPlane + 'static,
    V: JwtValidator + 'static,
{
    let cors = build_cors_layer(&state.config.cors_origins);
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_bytes))
        .layer(TimeoutLayer::new(state.config.request_timeout()));

    let state = Arc::new(state);

    let mut router = Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // Load balancers
        .route(
            "/v1/load-balancers",
            get(load_balancers::describe_load_balancers::<C, V>)
                .post(load_balancers::create_load_balancer::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name",
            axum::routing::delete(load_balancers::delete_load_balancer::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/listeners",
            post(load_balancers::create_listeners::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/listeners/delete",
            post(load_balancers::delete_listeners::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/instances/register",
            post(load_balancers::register_instances::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/instances/deregister",
            post(load_balancers::deregister_instances::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/instance-health",
            get(load_balancers::describe_instance_health::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/health-check",
            put(load_balancers::configure_health_check::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/zones/enable",
            post(load_balancers::enable_zones::<C, V>),
        )
        .route(
            "/v1/load-balancers/:name/zones/disable",
            post(load_balancers::disable_zones::<C, V>),
        )
        // Agents
        .route(
            "/internal/v1/servos/:servo_id/load-balancer",
            get(agents::describe_assigned_load_balancer::<C, V>),
        )
        .route(
            "/internal/v1/servos/:servo_id/states",
            post(agents::report_state::<C, V>),
        )
        // Internal
        .route("/internal/v1/health", get(health::internal_health::<C, V>))
        .route(
            "/internal/v1/servos/:servo_id",
            put(internal::register_servo::<C, V>).delete(internal::deregister_servo::<C, V>),
        )
        .route(
            "/internal/v1/instances/:instance_id",
            put(internal::put_instance::<C, V>).delete(internal::delete_instance::<C, V>),
        );

    for surface in UNSUPPORTED_SURFACES {
        router = router.route(
            &format!("/v1/load-balancers/:name/{surface}"),
            post(unsupported::accept::<C, V>).delete(unsupported::accept::<C, V>),
        );
    }

    router.layer(middleware).with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
