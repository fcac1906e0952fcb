//! Request/response correlation over a tunnel socket.
//!
//! [`send`] tags a request with a correlation ID, records it in the
//! endpoint's pending table, writes the request frame and waits. The request
//! settles through exactly one of:
//!
//! 1. a matching reply ([`complete`]),
//! 2. its deadline passing,
//! 3. the frame failing to send,
//! 4. the endpoint being removed ([`TunnelRegistry::remove`]).
//!
//! Whichever path removes the entry from the pending table owns the outcome;
//! every other path finds the entry gone and does nothing.
//!
//! [`TunnelRegistry::remove`]: super::registry::TunnelRegistry::remove

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use super::registry::{PendingRequest, Resolution, TunnelEndpoint};
use super::{Frame, InboundRequest, OutboundResponse, RequestFrame, ResponseFrame};
use crate::error::GatewayError;

/// Forward `request` to `endpoint` and wait up to `timeout` for its reply.
pub async fn send(
    endpoint: &TunnelEndpoint,
    request: &InboundRequest,
    timeout: Duration,
) -> Result<OutboundResponse, GatewayError> {
    let deadline = Instant::now() + timeout;
    let (complete, mut rx) = oneshot::channel();
    let request_id = endpoint
        .track(PendingRequest { deadline, complete })
        .await
        .ok_or(GatewayError::EndpointDisconnected)?;

    debug!(
        endpoint = %endpoint.id,
        request_id = %request_id,
        method = %request.method,
        url = %request.url(),
        "Forwarding request"
    );

    let frame = Frame::Request(RequestFrame::from_request(request_id.clone(), request));
    match timeout_at(deadline, endpoint.transmit(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => {
            if endpoint.take(&request_id).await.is_some() {
                warn!(endpoint = %endpoint.id, request_id = %request_id, "Failed to send request frame");
                return Err(GatewayError::SendFailure);
            }
            return settled(rx).await;
        }
        Err(_) => return expire(endpoint, &request_id, rx).await,
    }

    match timeout_at(deadline, &mut rx).await {
        Ok(resolution) => outcome(resolution),
        Err(_) => expire(endpoint, &request_id, rx).await,
    }
}

/// Deliver a reply frame to the request it answers.
///
/// Returns `false` if no request with that ID is pending (already settled,
/// or never sent); such frames are dropped.
pub async fn complete(endpoint: &TunnelEndpoint, frame: ResponseFrame) -> bool {
    let Some(pending) = endpoint.take(&frame.id).await else {
        warn!(
            endpoint = %endpoint.id,
            request_id = %frame.id,
            "Response arrived for timed-out or unknown request (dropped)"
        );
        return false;
    };
    let request_id = frame.id.clone();
    let resolution = match frame.into_response() {
        Ok(response) => Resolution::Reply(response),
        Err(e) => {
            warn!(endpoint = %endpoint.id, request_id = %request_id, "Undecodable response: {e}");
            Resolution::Malformed(e.to_string())
        }
    };
    if pending.complete.send(resolution).is_err() {
        debug!(endpoint = %endpoint.id, request_id = %request_id, "Caller went away before reply");
    }
    true
}

/// The deadline passed: claim the entry, or defer to whoever already did.
async fn expire(
    endpoint: &TunnelEndpoint,
    request_id: &str,
    rx: oneshot::Receiver<Resolution>,
) -> Result<OutboundResponse, GatewayError> {
    if endpoint.take(request_id).await.is_some() {
        debug!(endpoint = %endpoint.id, request_id, "Client timeout");
        return Err(GatewayError::ReplyTimeout);
    }
    settled(rx).await
}

/// Outcome chosen by another resolution path.
async fn settled(rx: oneshot::Receiver<Resolution>) -> Result<OutboundResponse, GatewayError> {
    outcome(rx.await)
}

fn outcome(
    resolution: Result<Resolution, oneshot::error::RecvError>,
) -> Result<OutboundResponse, GatewayError> {
    match resolution {
        Ok(Resolution::Reply(response)) => Ok(response),
        Ok(Resolution::Malformed(reason)) => Err(GatewayError::InvalidReply(reason)),
        Ok(Resolution::Expired) => Err(GatewayError::ReplyTimeout),
        Ok(Resolution::Disconnected) | Err(_) => Err(GatewayError::EndpointDisconnected),
    }
}
