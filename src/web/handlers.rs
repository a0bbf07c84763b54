use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Redirect, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use super::AppState;
use crate::playlist::rewrite_playlist;
use crate::sessions::session_hint;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub stream_id: String,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "portals": state.config.upstream.portals.len(),
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "portals": state.config.upstream.portals.len(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// `/playlist{K}.m3u8` entry point: send the player to the session route for
/// portal `K-1`.
pub fn portal_redirect(portal_idx: usize, Query(params): Query<StreamQuery>) -> Redirect {
    Redirect::temporary(&format!(
        "/stream/{}/{}/index.m3u8",
        portal_idx, params.stream_id
    ))
}

pub async fn playlist_default(query: Query<StreamQuery>) -> Redirect {
    portal_redirect(0, query)
}

/// Acquire a playlist for the stream, rewrite its segment URIs to local
/// paths, and (re)initialize the stream's session.
pub async fn stream_playlist(
    Path((portal_idx, sid)): Path<(usize, String)>,
    State(state): State<AppState>,
) -> Response {
    let session = state.sessions.begin(&sid, portal_idx).await;

    match state
        .acquirer
        .obtain_playlist(&sid, session.portal_idx())
        .await
    {
        Ok(acquired) => {
            session.adopt(&acquired);
            let text = String::from_utf8_lossy(&acquired.body);
            let rewritten = rewrite_playlist(&text, &acquired.base_url);
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
                .body(Body::from(rewritten))
                .unwrap()
        }
        Err(e) => {
            warn!("playlist acquisition failed for stream {}: {}", sid, e);
            (StatusCode::BAD_GATEWAY, format!("playlist error: {e}")).into_response()
        }
    }
}

/// Fetch `{proto}://{rest}` through the cache and pass body and status
/// through verbatim, then account the segment against its session.
pub async fn segment(
    Path((proto, rest)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let url = format!("{proto}://{rest}");
    let (body, status) = state
        .upstream
        .fetch(&url, state.config.upstream.segment_ttl())
        .await;

    state.sessions.record_segment(session_hint(&rest), status).await;

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "video/MP2T")
        .body(Body::from(body))
        .unwrap()
}
