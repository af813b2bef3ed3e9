//! lbcp gateway: HTTP API for the load balancer control plane.
//!
//! This is the main entry point for the gateway service. The control plane
//! runs embedded in the gateway process.
//!
//! # Dev Mode
//!
//! Build with `--features dev-mode` to use a mock JWT validator that needs
//! no signing secret. Use tokens in format: `test-token:<account-hex>[:admin]`
//!
//! # Event Dispatch
//!
//! Set `DISPATCH_URL` to notify the data plane of desired state changes.
//! If not set, events are logged and dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "dev-mode")]
use lbcp_auth::MockJwtValidator;
#[cfg(not(feature = "dev-mode"))]
use lbcp_auth::{AuthConfig, SharedSecretValidator};
use lbcp_control::{
    ControlConfig, EventDispatcher, HttpEventDispatcher, LoadBalancingService,
    NoopEventDispatcher, StaticInstanceResolver,
};
use lbcp_gateway::{create_router, GatewayConfig, GatewayState};
use lbcp_store::RocksStore;

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lbcp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting lbcp gateway");

    // Load configuration from environment
    let gateway_config = GatewayConfig::from_env()?;
    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/lbcp".into());
    let dispatch_url = std::env::var("DISPATCH_URL").ok();
    let auth_issuer = std::env::var("AUTH_ISSUER").unwrap_or_else(|_| "lbcp".into());
    let auth_audience = std::env::var("AUTH_AUDIENCE").unwrap_or_else(|_| "lbcp-api".into());

    let mut control_config = ControlConfig {
        available_zones: env_list("AVAILABLE_ZONES"),
        ..ControlConfig::default()
    };
    if let Ok(domain) = std::env::var("DNS_DOMAIN") {
        control_config.dns_domain = domain;
    }
    if let Ok(max) = std::env::var("MAX_LOAD_BALANCERS_PER_ACCOUNT") {
        control_config.max_load_balancers_per_account = max
            .parse()
            .map_err(|e| format!("invalid MAX_LOAD_BALANCERS_PER_ACCOUNT: {e}"))?;
    }

    tracing::info!(
        listen_addr = %gateway_config.listen_addr,
        cors_origins = ?gateway_config.cors_origins,
        data_dir = %data_dir,
        dispatch_url = ?dispatch_url,
        auth_issuer = %auth_issuer,
        auth_audience = %auth_audience,
        dns_domain = %control_config.dns_domain,
        available_zones = ?control_config.available_zones,
        max_load_balancers_per_account = control_config.max_load_balancers_per_account,
        "Gateway configuration loaded"
    );

    // Initialize RocksDB store
    tracing::info!(path = %data_dir, "Opening RocksDB store");
    let store = Arc::new(RocksStore::open(&data_dir)?);

    let dispatcher: Arc<dyn EventDispatcher> = if let Some(url) = dispatch_url {
        tracing::info!(dispatch_url = %url, "Event dispatch enabled");
        Arc::new(HttpEventDispatcher::new(url))
    } else {
        tracing::warn!("No DISPATCH_URL set - data plane events will be dropped");
        Arc::new(NoopEventDispatcher::new())
    };

    let inventory = Arc::new(StaticInstanceResolver::new());
    let control = Arc::new(
        LoadBalancingService::with_defaults(store, control_config)
            .with_dispatcher(dispatcher)
            .with_inventory(inventory.clone()),
    );
    tracing::info!("Control plane initialized");

    // Initialize JWT validator
    #[cfg(feature = "dev-mode")]
    let jwt_validator = {
        tracing::warn!(
            issuer = %auth_issuer,
            audience = %auth_audience,
            "DEV MODE ENABLED - using mock JWT validator"
        );
        tracing::warn!("Use tokens in format: test-token:<account-hex>[:admin]");
        Arc::new(MockJwtValidator)
    };

    #[cfg(not(feature = "dev-mode"))]
    let jwt_validator = {
        let secret = std::env::var("AUTH_SECRET").map_err(|_| "AUTH_SECRET must be set")?;
        Arc::new(SharedSecretValidator::new(AuthConfig {
            secret,
            issuer: auth_issuer,
            audience: auth_audience,
        }))
    };
    tracing::info!("JWT validator initialized");

    let listen_addr = gateway_config.listen_addr.clone();
    let state = GatewayState::new(control, jwt_validator, inventory, gateway_config);

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
