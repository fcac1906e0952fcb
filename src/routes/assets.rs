//! Static demo page and browser client script, served under `/_tunnel/demo/`.

use std::path::PathBuf;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use futures::future::BoxFuture;

use crate::state::GatewayState;

/// A static file and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub content: Bytes,
    pub content_type: &'static str,
}

/// Source of static assets. `None` means not found.
pub trait AssetProvider: Send + Sync {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Option<Asset>>;
}

/// Serves files from a directory on disk.
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a request path to a file under the root. Rejects `..` and
    /// backslashes so nothing outside the root is reachable.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let mut full = self.root.clone();
        for part in path.split('/') {
            match part {
                "" | "." => {}
                ".." => return None,
                p if p.contains('\\') => return None,
                p => full.push(p),
            }
        }
        (full != self.root).then_some(full)
    }
}

impl AssetProvider for DirAssets {
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Option<Asset>> {
        Box::pin(async move {
            let full = self.resolve(path)?;
            let content = tokio::fs::read(&full).await.ok()?;
            Some(Asset {
                content: Bytes::from(content),
                content_type: content_type(path),
            })
        })
    }
}

fn content_type(path: &str) -> &'static str {
    let ext = path.rsplit_once('.').map_or("", |(_, ext)| ext);
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// `GET /_tunnel/demo`: redirect so relative asset URLs resolve under the
/// demo directory.
pub async fn demo_redirect() -> Redirect {
    Redirect::permanent("/_tunnel/demo/")
}

/// `GET /_tunnel/demo/`: the demo page.
pub async fn demo_index(State(state): State<GatewayState>) -> Response {
    serve(&state, "index.html").await
}

/// `GET /_tunnel/demo/{*path}`: any other demo asset.
pub async fn demo_asset(State(state): State<GatewayState>, Path(path): Path<String>) -> Response {
    serve(&state, &path).await
}

async fn serve(state: &GatewayState, path: &str) -> Response {
    match state.assets.read(path).await {
        Some(asset) => ([(header::CONTENT_TYPE, asset.content_type)], asset.content).into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
