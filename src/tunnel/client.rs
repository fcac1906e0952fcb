//! Tunnel endpoint written in Rust.
//!
//! Opens an outbound WebSocket to the gateway, waits for its assigned ID, then
//! answers every request frame by calling a [`RequestHandler`]. Requests are
//! handled concurrently and replies may go out in any order. [`spawn`] wraps
//! this in a reconnect loop with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{Frame, InboundRequest, OutboundResponse, ResponseFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("invalid frame: {0}")]
    Frame(#[from] serde_json::Error),
    #[error("connection closed before registration")]
    Closed,
    #[error("expected a registration frame first")]
    UnexpectedFrame,
}

impl From<tungstenite::Error> for ClientError {
    fn from(e: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(e))
    }
}

/// Produces the response for one tunneled request.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: InboundRequest) -> BoxFuture<'static, OutboundResponse>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(InboundRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = OutboundResponse> + Send + 'static,
{
    fn handle(&self, request: InboundRequest) -> BoxFuture<'static, OutboundResponse> {
        Box::pin(self(request))
    }
}

/// Replies `200 text/plain` naming the requested URL.
pub struct EchoHandler;

impl RequestHandler for EchoHandler {
    fn handle(&self, request: InboundRequest) -> BoxFuture<'static, OutboundResponse> {
        let body = format!("Hello from the tunnel! You requested: {}", request.url());
        Box::pin(async move { OutboundResponse::text(200, body) })
    }
}

/// What the gateway told us in its first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub endpoint_id: String,
    pub public_url: String,
}

/// A registered connection to the gateway.
pub struct TunnelClient {
    socket: WsStream,
    registration: Registration,
}

impl TunnelClient {
    /// Connect to `url` (e.g. `ws://host/_tunnel/connect`) and wait for the
    /// registration frame.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (mut socket, _response) = tokio_tungstenite::connect_async(url).await?;

        let registration = loop {
            let Some(msg) = socket.next().await else {
                return Err(ClientError::Closed);
            };
            match msg? {
                Message::Text(text) => match Frame::parse(text.as_str())? {
                    Frame::Register(reg) => {
                        break Registration {
                            endpoint_id: reg.endpoint_id,
                            public_url: reg.public_url,
                        }
                    }
                    _ => return Err(ClientError::UnexpectedFrame),
                },
                Message::Close(_) => return Err(ClientError::Closed),
                _ => {}
            }
        };

        Ok(Self {
            socket,
            registration,
        })
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }

    /// Answer requests until the gateway closes the socket.
    pub async fn serve<H>(self, handler: Arc<H>) -> Result<(), ClientError>
    where
        H: RequestHandler + ?Sized,
    {
        let (mut sink, mut stream) = self.socket.split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ResponseFrame>();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else { break };
                    match msg? {
                        Message::Text(text) => dispatch(text.as_str(), &handler, &reply_tx),
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(reply) = reply_rx.recv() => {
                    let text = Frame::Response(reply).to_text()?;
                    sink.send(Message::Text(text.into())).await?;
                }
            }
        }

        Ok(())
    }
}

/// Run one request frame through the handler on its own task.
///
/// A frame whose body cannot be decoded is answered with 400 right away.
fn dispatch<H>(text: &str, handler: &Arc<H>, replies: &mpsc::UnboundedSender<ResponseFrame>)
where
    H: RequestHandler + ?Sized,
{
    let frame = match Frame::parse(text) {
        Ok(Frame::Request(frame)) => frame,
        Ok(_) => {
            debug!("Ignoring non-request frame from gateway");
            return;
        }
        Err(e) => {
            warn!("Invalid frame from gateway: {e}");
            return;
        }
    };

    let id = frame.id.clone();
    let request = match frame.into_request() {
        Ok((_, request)) => request,
        Err(e) => {
            let reply = OutboundResponse::text(400, e.to_string());
            let _ = replies.send(ResponseFrame::from_response(id, &reply));
            return;
        }
    };

    let handler = Arc::clone(handler);
    let replies = replies.clone();
    tokio::spawn(async move {
        let response = handler.handle(request).await;
        let _ = replies.send(ResponseFrame::from_response(id, &response));
    });
}

/// Backoff between reconnect attempts. The delay doubles after each failure
/// up to `max_delay` and resets once a connection registers.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Spawn the endpoint task. Runs until aborted.
pub fn spawn<H>(url: String, handler: Arc<H>, policy: ReconnectPolicy) -> tokio::task::JoinHandle<()>
where
    H: RequestHandler + ?Sized,
{
    tokio::spawn(client_loop(url, handler, policy))
}

async fn client_loop<H>(url: String, handler: Arc<H>, policy: ReconnectPolicy)
where
    H: RequestHandler + ?Sized,
{
    let mut delay = policy.initial_delay;

    loop {
        info!("Tunnel: connecting to gateway at {url}");
        match TunnelClient::connect(&url).await {
            Ok(client) => {
                let reg = client.registration();
                info!(endpoint = %reg.endpoint_id, "Tunnel: registered, public URL {}", reg.public_url);
                delay = policy.initial_delay;
                match client.serve(Arc::clone(&handler)).await {
                    Ok(()) => info!("Tunnel: connection closed, reconnecting..."),
                    Err(e) => warn!(
                        "Tunnel: connection error: {e}, reconnecting in {}s",
                        delay.as_secs()
                    ),
                }
            }
            Err(e) => {
                warn!(
                    "Tunnel: connect failed: {e}, retrying in {}s",
                    delay.as_secs()
                );
            }
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::{Headers, RequestFrame};
    use axum::body::Bytes;

    fn request(path: &str, query: Option<&str>) -> InboundRequest {
        InboundRequest {
            method: "GET".into(),
            path: path.into(),
            query: query.map(Into::into),
            headers: Headers::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let response = EchoHandler.handle(request("/foo", Some("x=1"))).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.headers["content-type"], "text/plain");
        assert_eq!(
            response.body,
            Some(Bytes::from("Hello from the tunnel! You requested: /foo?x=1"))
        );
    }

    #[tokio::test]
    async fn test_dispatch_replies_with_request_id() {
        let handler = Arc::new(|req: InboundRequest| async move {
            OutboundResponse::text(201, req.method)
        });
        let (tx, mut rx) = mpsc::unbounded_channel();
        let frame = Frame::Request(RequestFrame::from_request("c1", &request("/", None)));

        dispatch(&frame.to_text().unwrap(), &handler, &tx);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, "c1");
        assert_eq!(reply.status, 201);
        assert_eq!(reply.body.as_deref(), Some("GET"));
    }

    #[tokio::test]
    async fn test_dispatch_bad_body_gets_400() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let text = r#"{"id":"c2","method":"POST","url":"/","body":"***","encoding":"base64"}"#;

        dispatch(text, &Arc::new(EchoHandler), &tx);

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.id, "c2");
        assert_eq!(reply.status, 400);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_other_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch(
            r#"{"type":"id","clientId":"a","clientUrl":"b"}"#,
            &Arc::new(EchoHandler),
            &tx,
        );
        dispatch("garbage", &Arc::new(EchoHandler), &tx);
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
