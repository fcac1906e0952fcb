use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::GatewayState;

/// `GET /_tunnel/endpoints`: connected endpoints, oldest first.
pub async fn list_endpoints(State(state): State<GatewayState>) -> Json<Value> {
    let endpoints = state.registry.endpoints().await;
    let mut list: Vec<Value> = Vec::with_capacity(endpoints.len());

    for endpoint in &endpoints {
        #[allow(clippy::cast_possible_truncation)]
        let connected_ms = endpoint.connected_since.elapsed().as_millis() as u64;
        list.push(json!({
            "id": endpoint.id,
            "url": endpoint.public_url,
            "pending_requests_count": endpoint.pending_count().await,
            "connected_since_ms": connected_ms,
        }));
    }

    Json(json!({"endpoints": list}))
}
