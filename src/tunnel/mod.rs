//! HTTP-over-WebSocket tunnel.
//!
//! A tunnel endpoint opens an outbound WebSocket to the gateway, is assigned an
//! ID, and from then on answers HTTP requests the gateway serializes onto that
//! socket. Three frame shapes travel over the socket as JSON text:
//!
//! ```text
//! Register  gateway → endpoint  {"type":"id","clientId":"..","clientUrl":".."}
//! Request   gateway → endpoint  {"id":"..","method":"GET","url":"/x?y=1","headers":{..},"body":".."}
//! Response  endpoint → gateway  {"id":"..","status":200,"headers":{..},"body":".."}
//! ```
//!
//! `body` is omitted when there is none. Bodies that are not valid UTF-8 are
//! base64-encoded and flagged with `"encoding":"base64"`.
//!
//! - [`relay`]: gateway side: accepts endpoint sockets and pumps frames
//! - [`registry`]: connected endpoints and their pending requests
//! - [`router`]: picks the target endpoint for an inbound request
//! - [`correlation`]: sends a request frame and awaits the matching reply
//! - [`client`]: endpoint side, for handlers written in Rust

pub mod client;
pub mod correlation;
pub mod id;
pub mod registry;
pub mod relay;
pub mod router;

use axum::body::Bytes;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Header name → value, in the order they were received.
pub type Headers = IndexMap<String, String>;

/// Errors turning a decoded frame into a request or response.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
    #[error("invalid base64 body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}

/// A message on the tunnel socket.
///
/// The wire format only tags `Register` explicitly; `Request` and `Response`
/// are told apart by their required fields (`method`/`url` vs `status`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Register(RegisterFrame),
    Response(ResponseFrame),
    Request(RequestFrame),
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Marker for the `"type": "id"` tag on registration frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterKind {
    #[serde(rename = "id")]
    Id,
}

/// First frame on every tunnel socket: the endpoint's assigned ID and the
/// public URL callers use to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterFrame {
    #[serde(rename = "type")]
    pub kind: RegisterKind,
    #[serde(rename = "clientId")]
    pub endpoint_id: String,
    #[serde(rename = "clientUrl")]
    pub public_url: String,
}

impl RegisterFrame {
    pub fn new(endpoint_id: impl Into<String>, public_url: impl Into<String>) -> Self {
        Self {
            kind: RegisterKind::Id,
            endpoint_id: endpoint_id.into(),
            public_url: public_url.into(),
        }
    }
}

/// How a frame's `body` string maps back to bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    Base64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation ID, echoed back in the matching [`ResponseFrame`].
    pub id: String,
    pub method: String,
    /// Path plus query string, already rewritten for the endpoint.
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyEncoding>,
}

impl RequestFrame {
    pub fn from_request(id: impl Into<String>, request: &InboundRequest) -> Self {
        let (body, encoding) = encode_body(request.body.as_ref());
        Self {
            id: id.into(),
            method: request.method.clone(),
            url: request.url(),
            headers: request.headers.clone(),
            body,
            encoding,
        }
    }

    /// Split into the correlation ID and the request it carries.
    pub fn into_request(self) -> Result<(String, InboundRequest), FrameError> {
        let body = decode_body(self.body, self.encoding)?;
        let (path, query) = match self.url.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (self.url, None),
        };
        Ok((
            self.id,
            InboundRequest {
                method: self.method,
                path,
                query,
                headers: self.headers,
                body,
            },
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<BodyEncoding>,
}

impl ResponseFrame {
    pub fn from_response(id: impl Into<String>, response: &OutboundResponse) -> Self {
        let (body, encoding) = encode_body(response.body.as_ref());
        Self {
            id: id.into(),
            status: response.status,
            headers: response.headers.clone(),
            body,
            encoding,
        }
    }

    pub fn into_response(self) -> Result<OutboundResponse, FrameError> {
        if !(100..=999).contains(&self.status) {
            return Err(FrameError::InvalidStatus(self.status));
        }
        Ok(OutboundResponse {
            status: self.status,
            headers: self.headers,
            body: decode_body(self.body, self.encoding)?,
        })
    }
}

/// An HTTP request as the gateway received it, with the path already
/// rewritten for the target endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl InboundRequest {
    /// Path and query string as sent on the wire.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{q}", self.path),
            None => self.path.clone(),
        }
    }
}

/// The response an endpoint produced for a tunneled request.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl OutboundResponse {
    /// A `text/plain` response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/plain".to_string());
        Self {
            status,
            headers,
            body: Some(Bytes::from(body.into())),
        }
    }
}

fn encode_body(body: Option<&Bytes>) -> (Option<String>, Option<BodyEncoding>) {
    match body {
        None => (None, None),
        Some(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => (Some(text.to_string()), None),
            Err(_) => (Some(BASE64.encode(bytes)), Some(BodyEncoding::Base64)),
        },
    }
}

fn decode_body(
    body: Option<String>,
    encoding: Option<BodyEncoding>,
) -> Result<Option<Bytes>, FrameError> {
    match (body, encoding) {
        (None, _) => Ok(None),
        (Some(text), None) => Ok(Some(Bytes::from(text))),
        (Some(text), Some(BodyEncoding::Base64)) => Ok(Some(Bytes::from(BASE64.decode(text)?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_parse_register_frame() {
        let text = r#"{"type":"id","clientId":"abc123","clientUrl":"http://localhost:3000/abc123"}"#;
        let Frame::Register(reg) = Frame::parse(text).unwrap() else {
            panic!("expected register frame");
        };
        assert_eq!(reg.endpoint_id, "abc123");
        assert_eq!(reg.public_url, "http://localhost:3000/abc123");
    }

    #[test]
    fn test_parse_response_frame_without_body() {
        let Frame::Response(resp) = Frame::parse(r#"{"id":"r1","status":204}"#).unwrap() else {
            panic!("expected response frame");
        };
        let out = resp.into_response().unwrap();
        assert_eq!(out.status, 204);
        assert!(out.headers.is_empty());
        assert!(out.body.is_none());
    }

    #[test]
    fn test_parse_request_frame() {
        let text = r#"{"id":"r2","method":"POST","url":"/a?b=1","headers":{"x-k":"v"},"body":"hi"}"#;
        let Frame::Request(req) = Frame::parse(text).unwrap() else {
            panic!("expected request frame");
        };
        let (id, req) = req.into_request().unwrap();
        assert_eq!(id, "r2");
        assert_eq!(req.path, "/a");
        assert_eq!(req.query.as_deref(), Some("b=1"));
        assert_eq!(req.headers["x-k"], "v");
        assert_eq!(req.body.as_deref(), Some(&b"hi"[..]));
    }

    #[test]
    fn test_parse_rejects_unknown_shapes() {
        assert!(Frame::parse(r#"{"type":"hello"}"#).is_err());
        assert!(Frame::parse(r#"{"status":200}"#).is_err());
        assert!(Frame::parse("not json").is_err());
    }

    #[test]
    fn test_request_frame_omits_missing_body() {
        let request = InboundRequest {
            method: "GET".into(),
            path: "/".into(),
            query: None,
            headers: Headers::new(),
            body: None,
        };
        let text = Frame::Request(RequestFrame::from_request("r3", &request))
            .to_text()
            .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"id": "r3", "method": "GET", "url": "/", "headers": {}})
        );
    }

    #[test]
    fn test_binary_body_uses_base64() {
        let response = OutboundResponse {
            status: 200,
            headers: Headers::new(),
            body: Some(Bytes::from_static(&[0xff, 0x00, 0xfe])),
        };
        let frame = ResponseFrame::from_response("r4", &response);
        assert_eq!(frame.encoding, Some(BodyEncoding::Base64));
        assert_eq!(frame.body.as_deref(), Some("/wD+"));
        assert_eq!(frame.into_response().unwrap(), response);
    }

    #[test]
    fn test_invalid_status_rejected() {
        let frame = ResponseFrame {
            id: "r5".into(),
            status: 42,
            headers: Headers::new(),
            body: None,
            encoding: None,
        };
        assert!(matches!(
            frame.into_response(),
            Err(FrameError::InvalidStatus(42))
        ));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let text = r#"{"id":"r6","status":200,"body":"***","encoding":"base64"}"#;
        let Frame::Response(resp) = Frame::parse(text).unwrap() else {
            panic!("expected response frame");
        };
        assert!(matches!(
            resp.into_response(),
            Err(FrameError::InvalidBody(_))
        ));
    }
}
