//! Unauthenticated health-check endpoint.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::config::RoutingMode;
use crate::state::GatewayState;

/// `GET /_tunnel/health`: liveness probe.
///
/// Returns status, uptime, version, routing mode and the number of connected
/// endpoints. Suitable for load-balancer health checks.
pub async fn health(State(state): State<GatewayState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let endpoints = state.registry.len().await;
    let routing = match state.config.routing.mode {
        RoutingMode::Path => "path",
        RoutingMode::Subdomain => "subdomain",
    };

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "routing": routing,
        "base_url": state.config.routing.base_url.to_string(),
        "endpoints": endpoints,
    }))
}
