//! Gateway side of the tunnel socket.
//!
//! For each endpoint that connects to `/_tunnel/connect` the relay:
//! 1. registers it and sends the `Register` frame with its ID and public URL
//! 2. spawns a writer that drains the endpoint's frame channel into the socket
//!    and pings at the heartbeat interval
//! 3. reads reply frames and hands them to the correlation engine
//! 4. removes the endpoint when the socket closes, failing whatever is pending

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::registry::TunnelEndpoint;
use super::{correlation, Frame, RegisterFrame};
use crate::state::GatewayState;

/// `GET /_tunnel/connect`: tunnel endpoint WS registration.
pub async fn tunnel_connect(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_tunnel_ws(socket, state))
}

async fn handle_tunnel_ws(socket: WebSocket, state: GatewayState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(state.config.tunnel.channel_capacity);

    let routing = &state.config.routing;
    let endpoint = state
        .registry
        .register(frame_tx, |id| routing.public_url(id))
        .await;
    let span = info_span!("tunnel_endpoint", endpoint = %endpoint.id);

    async move {
        info!(url = %endpoint.public_url, "Tunnel endpoint registered");

        // Registration goes out before anything queued on the channel.
        let register = Frame::Register(RegisterFrame::new(
            endpoint.id.clone(),
            endpoint.public_url.clone(),
        ));
        let sent = match register.to_text() {
            Ok(text) => ws_sink.send(Message::Text(text.into())).await.is_ok(),
            Err(e) => {
                warn!("Failed to encode registration: {e}");
                false
            }
        };
        if !sent {
            warn!("Tunnel endpoint disconnected before registration");
            state.registry.remove(&endpoint.id).await;
            return;
        }

        let heartbeat = state.config.tunnel.heartbeat_interval();
        let mut send_task = tokio::spawn(
            async move {
                let mut interval = tokio::time::interval(heartbeat);
                interval.tick().await;
                loop {
                    let msg = tokio::select! {
                        frame = frame_rx.recv() => {
                            let Some(frame) = frame else { break };
                            match frame.to_text() {
                                Ok(text) => Message::Text(text.into()),
                                Err(e) => {
                                    warn!("Failed to encode frame: {e}");
                                    continue;
                                }
                            }
                        }
                        _ = interval.tick() => Message::Ping(Vec::new().into()),
                    };
                    if ws_sink.send(msg).await.is_err() {
                        break;
                    }
                }
            }
            .in_current_span(),
        );

        loop {
            let msg = tokio::select! {
                msg = ws_stream.next() => match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!("Tunnel socket error: {e}");
                        break;
                    }
                    None => break,
                },
                _ = &mut send_task => {
                    debug!("Tunnel writer stopped");
                    break;
                }
            };
            match msg {
                Message::Text(text) => handle_frame(&endpoint, text.as_str()).await,
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_frame(&endpoint, text).await,
                    Err(_) => warn!(len = data.len(), "Discarding non-UTF-8 binary message"),
                },
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        state.registry.remove(&endpoint.id).await;
        send_task.abort();
        info!("Tunnel endpoint disconnected");
    }
    .instrument(span)
    .await;
}

/// Dispatch one inbound frame from an endpoint.
async fn handle_frame(endpoint: &TunnelEndpoint, text: &str) {
    match Frame::parse(text) {
        Ok(Frame::Response(frame)) => {
            correlation::complete(endpoint, frame).await;
        }
        Ok(Frame::Register(_)) => {
            warn!("Discarding registration frame sent mid-stream");
        }
        Ok(Frame::Request(frame)) => {
            warn!(request_id = %frame.id, "Discarding request frame sent by endpoint");
        }
        Err(e) => {
            warn!("Discarding malformed frame: {e}");
        }
    }
}
