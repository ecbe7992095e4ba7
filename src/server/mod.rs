//! HTTP origin for the live stream.
//!
//! Serves the blocking-reload playlist, the init segment, parts and
//! segments from the live window, and the timestamp correlation feed.

mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::Router;
use partcast_media::{LivePlaylist, TimestampLedger};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppContext {
    pub playlist: Arc<LivePlaylist>,
    pub ledger: Arc<TimestampLedger>,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/playlist.m3u8", get(routes::playlist))
        .route("/live.m3u8", get(routes::playlist))
        .route("/init.mp4", get(routes::init_segment))
        .route("/timestamps.json", get(routes::timestamps))
        .route("/{name}", get(routes::media))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    ctx: AppContext,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("serving LL-HLS on http://{addr}/playlist.m3u8");
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")
}
