//! Shared gateway state passed to every handler via Axum's `State` extractor.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::routes::assets::{AssetProvider, DirAssets};
use crate::tunnel::registry::TunnelRegistry;

#[derive(Clone)]
pub struct GatewayState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Connected tunnel endpoints. Drained on shutdown.
    pub registry: TunnelRegistry,
    /// Source of the demo page and client script.
    pub assets: Arc<dyn AssetProvider>,
    /// Monotonic instant when the gateway started (for uptime calculation).
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(config: Config) -> Self {
        let assets = Arc::new(DirAssets::new(&config.assets.dir));
        Self::with_assets(config, assets)
    }

    pub fn with_assets(config: Config, assets: Arc<dyn AssetProvider>) -> Self {
        Self {
            config: Arc::new(config),
            registry: TunnelRegistry::new(),
            assets,
            start_time: Instant::now(),
        }
    }
}
