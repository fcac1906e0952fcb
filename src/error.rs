//! Failures a tunneled request can end in, and the HTTP status each maps to.
//!
//! None of these are fatal to the gateway: each becomes a plain-text response
//! to the original caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request named an endpoint ID that is not connected.
    #[error("No connected clients with ID: {0}")]
    UnknownEndpoint(String),
    /// The request named no endpoint and none is connected to fall back to.
    #[error("No connected clients")]
    NoEndpointAvailable,
    /// The request named no endpoint and the routing policy rejects that.
    #[error("No client ID provided")]
    AmbiguousTarget,
    /// The request frame could not be queued on the endpoint's socket.
    #[error("Failed to send request to tunnel endpoint")]
    SendFailure,
    #[error("Client timeout")]
    ReplyTimeout,
    /// The endpoint disconnected before replying.
    #[error("Tunnel endpoint disconnected")]
    EndpointDisconnected,
    #[error("Invalid response from tunnel endpoint: {0}")]
    InvalidReply(String),
    #[error("Failed to read request body: {0}")]
    BodyRead(String),
    /// The path is under the gateway's own prefix but matches no route.
    #[error("Not found")]
    ReservedPath,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownEndpoint(_) | Self::ReservedPath => StatusCode::NOT_FOUND,
            Self::NoEndpointAvailable | Self::EndpointDisconnected => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::AmbiguousTarget | Self::BodyRead(_) => StatusCode::BAD_REQUEST,
            Self::SendFailure => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ReplyTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidReply(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (GatewayError::UnknownEndpoint("x".into()), 404),
            (GatewayError::NoEndpointAvailable, 503),
            (GatewayError::AmbiguousTarget, 400),
            (GatewayError::SendFailure, 500),
            (GatewayError::ReplyTimeout, 504),
            (GatewayError::EndpointDisconnected, 503),
            (GatewayError::InvalidReply("bad".into()), 502),
            (GatewayError::ReservedPath, 404),
        ];
        for (err, status) in cases {
            assert_eq!(err.status().as_u16(), status, "{err}");
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            GatewayError::UnknownEndpoint("abc".into()).to_string(),
            "No connected clients with ID: abc"
        );
        assert_eq!(GatewayError::ReplyTimeout.to_string(), "Client timeout");
    }
}
