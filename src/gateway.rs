//! Catch-all handler: forwards every non-reserved request to a tunnel endpoint.
//!
//! Unmatched paths under `/_tunnel/` answer 404 here, whatever the routing
//! mode, so they never reach an endpoint.
//!
//! The request is routed by path or subdomain, resolved against the registry,
//! buffered in full, sent through the correlation engine, and the endpoint's
//! reply is returned as-is. Failures come back as [`GatewayError`] responses.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::config::NoTargetPolicy;
use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::tunnel::registry::TunnelEndpoint;
use crate::tunnel::router::{self, Target};
use crate::tunnel::{correlation, Headers, InboundRequest, OutboundResponse};

/// Fallback handler for everything outside `/_tunnel/`.
pub async fn forward(State(state): State<GatewayState>, request: Request) -> Response {
    match dispatch(&state, request).await {
        Ok(response) => into_http(response),
        Err(e) => {
            debug!(status = e.status().as_u16(), "Tunnel request failed: {e}");
            e.into_response()
        }
    }
}

async fn dispatch(
    state: &GatewayState,
    request: Request,
) -> Result<OutboundResponse, GatewayError> {
    let (parts, body) = request.into_parts();
    if router::is_reserved(parts.uri.path()) {
        return Err(GatewayError::ReservedPath);
    }
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()));

    let route = router::route(host, parts.uri.path(), &state.config.routing);
    let endpoint = resolve(state, &route.target).await?;

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| GatewayError::BodyRead(e.to_string()))?;

    let request = InboundRequest {
        method: parts.method.to_string(),
        path: route.path,
        query: parts.uri.query().map(ToString::to_string),
        headers: headers_to_map(&parts.headers),
        body: (!body.is_empty()).then_some(body),
    };

    correlation::send(&endpoint, &request, state.config.tunnel.request_timeout()).await
}

/// Turn a routing target into a connected endpoint.
async fn resolve(
    state: &GatewayState,
    target: &Target,
) -> Result<Arc<TunnelEndpoint>, GatewayError> {
    match target {
        Target::Endpoint(id) => state
            .registry
            .lookup(id)
            .await
            .ok_or_else(|| GatewayError::UnknownEndpoint(id.clone())),
        Target::Unspecified => match state.config.routing.no_target {
            NoTargetPolicy::Reject => Err(GatewayError::AmbiguousTarget),
            NoTargetPolicy::Fallback => state
                .registry
                .lookup_any()
                .await
                .ok_or(GatewayError::NoEndpointAvailable),
        },
    }
}

/// Flatten headers into a name → value map; repeated names are comma-joined.
fn headers_to_map(headers: &HeaderMap) -> Headers {
    let mut map = Headers::with_capacity(headers.keys_len());
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        if let Some(existing) = map.get_mut(name.as_str()) {
            existing.push_str(", ");
            existing.push_str(&value);
        } else {
            map.insert(name.as_str().to_string(), value.into_owned());
        }
    }
    map
}

/// Build the HTTP response from an endpoint's reply.
///
/// Framing headers are dropped because the body is re-sent in full; invalid
/// header names or values are skipped.
fn into_http(response: OutboundResponse) -> Response {
    let mut http = Response::new(Body::from(response.body.unwrap_or_default()));
    *http.status_mut() = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = http.headers_mut();
    for (name, value) in &response.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            debug!(header = %name, "Skipping invalid response header");
            continue;
        };
        if name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
            || name == header::CONNECTION
        {
            continue;
        }
        headers.append(name, value);
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;

    #[test]
    fn test_headers_to_map_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("x-one", HeaderValue::from_static("1"));
        headers.append("accept", HeaderValue::from_static("application/json"));

        let map = headers_to_map(&headers);
        assert_eq!(map["accept"], "text/html, application/json");
        assert_eq!(map["x-one"], "1");
    }

    #[tokio::test]
    async fn test_into_http_passes_reply_through() {
        let mut reply_headers = Headers::new();
        reply_headers.insert("X-Test".into(), "1".into());
        reply_headers.insert("Content-Length".into(), "999".into());
        reply_headers.insert("bad header".into(), "x".into());

        let response = into_http(OutboundResponse {
            status: 418,
            headers: reply_headers,
            body: Some(Bytes::from("payload")),
        });

        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(response.headers()["x-test"], "1");
        assert!(response.headers().get("bad header").is_none());
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, Bytes::from("payload"));
    }

    #[test]
    fn test_into_http_empty_body() {
        let response = into_http(OutboundResponse {
            status: 204,
            headers: Headers::new(),
            body: None,
        });
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}
