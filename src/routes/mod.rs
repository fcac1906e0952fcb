//! HTTP route handlers.
//!
//! Everything under `/_tunnel/` belongs to the gateway itself; every other
//! path falls through to [`crate::gateway::forward`]. Endpoint IDs never
//! contain `_`, so the reserved prefix cannot shadow an endpoint.

pub mod assets;
pub mod endpoints;
pub mod health;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::gateway;
use crate::state::GatewayState;
use crate::tunnel::relay;

/// Build the gateway router.
pub fn app(state: GatewayState) -> Router {
    Router::new()
        .route("/_tunnel/connect", get(relay::tunnel_connect))
        .route("/_tunnel/health", get(health::health))
        .route("/_tunnel/endpoints", get(endpoints::list_endpoints))
        .route("/_tunnel/demo", get(assets::demo_redirect))
        .route("/_tunnel/demo/", get(assets::demo_index))
        .route("/_tunnel/demo/{*path}", get(assets::demo_asset))
        .fallback(gateway::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
