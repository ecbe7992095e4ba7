//! Route handlers for the LL-HLS origin.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::json;

use super::{AppContext, error::AppError};

const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const MP4_CONTENT_TYPE: &str = "video/mp4";
/// Ceiling on a blocking-reload wait so a stalled encoder can never
/// pin a request open indefinitely.
const MAX_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_WAIT: Duration = Duration::from_secs(6);

#[derive(Debug, Deserialize)]
pub struct PlaylistQuery {
    /// Block until the playlist version exceeds this.
    pub since: Option<u64>,
    /// Cap on the blocking wait in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// GET /playlist.m3u8 (alias /live.m3u8)
///
/// Plain requests return the current playlist immediately; requests
/// with `since` soft-block until a newer version is published or the
/// timeout elapses, then return whatever is current.
pub async fn playlist(
    State(ctx): State<AppContext>,
    Query(query): Query<PlaylistQuery>,
) -> Result<impl IntoResponse, AppError> {
    let wait = match (query.since, query.timeout_ms) {
        (_, Some(ms)) => Duration::from_millis(ms).min(MAX_WAIT),
        (Some(_), None) => DEFAULT_WAIT,
        (None, None) => Duration::ZERO,
    };
    let snapshot = ctx
        .playlist
        .playlist(query.since, wait)
        .await
        .ok_or(partcast_media::Error::NotReady)?;

    Ok((
        StatusCode::OK,
        [
            ("content-type", PLAYLIST_CONTENT_TYPE.to_string()),
            ("cache-control", "no-cache".to_string()),
            ("x-playlist-version", snapshot.version.to_string()),
        ],
        snapshot.body,
    ))
}

/// GET /init.mp4
pub async fn init_segment(
    State(ctx): State<AppContext>,
) -> Result<impl IntoResponse, AppError> {
    let init = ctx
        .playlist
        .init_segment()
        .ok_or(partcast_media::Error::NotReady)?;
    Ok((
        StatusCode::OK,
        [("content-type", MP4_CONTENT_TYPE)],
        init,
    ))
}

/// GET /{name}: parts and segments still inside the live window.
pub async fn media(
    State(ctx): State<AppContext>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.starts_with('.')
        || !name.ends_with(".m4s")
    {
        return Err(partcast_media::Error::invalid_stream("invalid media name").into());
    }
    let data = ctx
        .playlist
        .media(&name)
        .ok_or_else(|| partcast_media::Error::NotFound(name))?;
    Ok((
        StatusCode::OK,
        [
            ("content-type", MP4_CONTENT_TYPE),
            ("cache-control", "no-cache"),
        ],
        data,
    ))
}

/// GET /timestamps.json: segment and part production times for
/// latency measurement against the server clock.
pub async fn timestamps(State(ctx): State<AppContext>) -> impl IntoResponse {
    let snapshot = ctx.ledger.snapshot();
    (
        StatusCode::OK,
        [("cache-control", "no-cache")],
        axum::Json(json!({
            "segments": snapshot.segments,
            "parts": snapshot.parts,
            "timestamp": snapshot.now_ns,
        })),
    )
}
