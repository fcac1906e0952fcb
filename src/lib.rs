#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! tunnelgate library: HTTP-over-WebSocket tunnel gateway.
//!
//! Processes behind NAT connect out to the gateway over a WebSocket and are
//! handed a public URL. HTTP requests to that URL are serialized onto the
//! socket, answered by the endpoint, and relayed back to the caller.
//!
//! - `tunnel`: wire frames, endpoint registry, routing, correlation, relay and client
//! - `gateway`: catch-all handler that forwards requests into the tunnel
//! - `routes`: router assembly plus the `/_tunnel/` control routes
//! - `config`: TOML + env-var configuration
//! - `error`: request failures and their HTTP status codes

pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod state;
pub mod tunnel;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use error::GatewayError;
pub use state::GatewayState;
pub use tunnel::registry::TunnelRegistry;
