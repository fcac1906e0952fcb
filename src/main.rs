#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # tunnelgate
//!
//! HTTP gateway that forwards requests to handlers running behind outbound
//! WebSocket connections.
//!
//! ## Subcommands
//!
//! - `tunnelgate serve` (default): run the gateway
//! - `tunnelgate connect <url>`: run a demo endpoint that echoes the requested URL
//!
//! ## HTTP surface
//!
//! | Method | Path                     | Description                              |
//! |--------|--------------------------|------------------------------------------|
//! | GET    | `/_tunnel/connect`       | Endpoint WebSocket registration          |
//! | GET    | `/_tunnel/health`        | Liveness probe                           |
//! | GET    | `/_tunnel/endpoints`     | Connected endpoints                      |
//! | GET    | `/_tunnel/demo/`         | Browser demo endpoint                    |
//! | any    | everything else          | Routed to an endpoint by path or subdomain |
//!
//! ## Architecture
//!
//! ```text
//! main.rs           : entry point, clap subcommands, graceful shutdown
//! config.rs         : TOML + env-var configuration
//! error.rs          : request failures and their status codes
//! gateway.rs        : catch-all forwarding handler
//! routes/
//!   health.rs       : GET /_tunnel/health
//!   endpoints.rs    : GET /_tunnel/endpoints
//!   assets.rs       : GET /_tunnel/demo/*
//! tunnel/
//!   mod.rs          : wire frames
//!   id.rs           : endpoint and request IDs
//!   registry.rs     : connected endpoints and pending requests
//!   router.rs       : path / subdomain target selection
//!   correlation.rs  : request/reply matching with deadlines
//!   relay.rs        : endpoint WebSocket pump
//!   client.rs       : endpoint side with reconnect
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tunnelgate::tunnel::client::{self, EchoHandler, ReconnectPolicy};
use tunnelgate::{routes, Config, GatewayState};

/// HTTP-over-WebSocket tunnel gateway.
#[derive(Parser)]
#[command(name = "tunnelgate", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Connect to a gateway as a demo endpoint.
    Connect {
        /// Gateway WebSocket URL, e.g. ws://localhost:3000/_tunnel/connect
        url: String,
        /// Log filter when RUST_LOG is unset.
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Connect { url, log_level }) => run_endpoint(url, &log_level).await,
        Some(Commands::Serve { config }) => run_gateway(config.as_deref()).await,
        None => run_gateway(None).await,
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_gateway(config_path: Option<&str>) -> ExitCode {
    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("tunnelgate: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging.level);

    info!("tunnelgate v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        routing = ?config.routing.mode,
        no_target = ?config.routing.no_target,
        "Public base URL: {}",
        config.routing.base_url
    );
    info!("Listening on {}", config.server.listen);

    let listener = match TcpListener::bind(&config.server.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {e}", config.server.listen);
            return ExitCode::FAILURE;
        }
    };

    let state = GatewayState::new(config);
    let app = routes::app(state.clone());

    info!("Gateway ready");

    // Periodic sweep: resolve requests whose caller stopped waiting
    let registry = state.registry.clone();
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            registry.sweep_expired().await;
        }
    });

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Cleanup
    info!("Shutting down...");
    sweep_task.abort();
    state.registry.drain_all().await;

    if let Err(e) = result {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }
    info!("Goodbye");
    ExitCode::SUCCESS
}

async fn run_endpoint(url: String, log_level: &str) -> ExitCode {
    init_tracing(log_level);

    let task = client::spawn(url, Arc::new(EchoHandler), ReconnectPolicy::default());
    shutdown_signal().await;
    task.abort();

    info!("Goodbye");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
