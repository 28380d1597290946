//! Audio streaming. A token that names a `track` is self-describing and
//! bypasses the store lookup entirely: the embedded absolute path and size
//! are served with byte-range support. A playlist token instead walks the
//! named directory object and mints fresh single-track tokens for every
//! audio member it finds.

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _};
use tokio_util::io::ReaderStream;

use crate::api::{
    ApiState,
    error::{ApiError, accepts_html, apply_allow_origin, error_response, json_response},
    handlers::core::allow_origin_for,
};
use crate::store::{ContentStore, audio::find_audio};
use crate::token::{StreamClaims, TrackClaims, check_freshness, unix_now};

#[derive(Debug, Deserialize)]
pub(crate) struct StreamerQuery {
    token: Option<String>,
}

pub(crate) async fn streamer(
    State(state): State<ApiState>,
    UrlPath(hash): UrlPath<String>,
    Query(query): Query<StreamerQuery>,
    headers: HeaderMap,
) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    match run_streamer(&state, &hash, &query, &headers, &allow).await {
        Ok(resp) => resp,
        Err(err) => error_response(&allow, accepts_html(&headers), &err),
    }
}

async fn run_streamer(
    state: &ApiState,
    url_hash: &str,
    query: &StreamerQuery,
    headers: &HeaderMap,
    allow: &str,
) -> Result<Response, ApiError> {
    if !ContentStore::is_valid_hash(url_hash) {
        return Err(ApiError::MissingHash);
    }

    let payload = state.tokens.verify(query.token.as_deref())?;
    let claims = StreamClaims::from_payload(&payload)?;
    check_freshness(claims.time(), unix_now())?;

    match claims {
        StreamClaims::Track { track, size, .. } => {
            serve_track(headers, allow, &track, size).await
        }
        StreamClaims::Playlist { hash, .. } => {
            serve_playlist(state, &hash, url_hash, headers, allow).await
        }
    }
}

async fn serve_track(
    headers: &HeaderMap,
    allow: &str,
    track: &str,
    size: u64,
) -> Result<Response, ApiError> {
    let mut file = tokio::fs::File::open(track)
        .await
        .map_err(|_| ApiError::NotFound)?;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    let mut resp = match resolve_range(range_header, size) {
        // The whole file, ranged or not, goes out as a plain 200.
        None => {
            let mut resp =
                Response::new(axum::body::Body::from_stream(ReaderStream::new(file)));
            *resp.status_mut() = StatusCode::OK;
            resp.headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            resp
        }
        Some((start, end)) => {
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|err| ApiError::Internal(err.to_string()))?;
            let body = axum::body::Body::from_stream(ReaderStream::new(
                file.take(end - start + 1),
            ));
            let mut resp = Response::new(body);
            *resp.status_mut() = StatusCode::PARTIAL_CONTENT;
            let h = resp.headers_mut();
            h.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
            if let Ok(value) =
                HeaderValue::from_str(&format!("bytes {start}-{end}/{size}"))
            {
                h.insert(header::CONTENT_RANGE, value);
            }
            resp
        }
    };

    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("audio/mp3"));
    h.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    apply_allow_origin(&mut resp, allow);
    Ok(resp)
}

async fn serve_playlist(
    state: &ApiState,
    claim_hash: &str,
    url_hash: &str,
    headers: &HeaderMap,
    allow: &str,
) -> Result<Response, ApiError> {
    if !ContentStore::is_valid_hash(claim_hash) {
        return Err(ApiError::MissingHash);
    }

    let dir = state.store.object_path(claim_hash);
    let files = find_audio(&dir).await?;

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let now = unix_now();

    let mut tracks = Vec::with_capacity(files.len());
    for file in files {
        let token = state
            .tokens
            .issue(&TrackClaims {
                time: now,
                size: file.size,
                track: file.path.display().to_string(),
            })
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        tracks.push(serde_json::json!({
            "name": file.name,
            "url": format!(
                "http://{host}/streamer/{url_hash}?token={}",
                urlencoding::encode(&token)
            ),
        }));
    }

    Ok(json_response(
        allow,
        &serde_json::json!({"success": true, "tracks": tracks}),
    ))
}

/// Resolve a `Range` header against the claimed size. `None` means "answer
/// with the whole file as a plain 200": no header, an unusable header, or a
/// range that covers everything anyway. A `-N` suffix reads as the last N
/// bytes.
fn resolve_range(header: Option<&str>, size: u64) -> Option<(u64, u64)> {
    if size == 0 {
        return None;
    }
    let (unit, spec) = header?.split_once('=')?;
    if unit.trim() != "bytes" {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;
    let (start_s, end_s) = (start_s.trim(), end_s.trim());

    let (start, end) = if start_s.is_empty() {
        let suffix: u64 = end_s.parse().ok()?;
        (size.saturating_sub(suffix), size - 1)
    } else if end_s.is_empty() {
        (start_s.parse().ok()?, size - 1)
    } else {
        (start_s.parse().ok()?, end_s.parse().ok()?)
    };

    if start == 0 && end == size - 1 {
        return None;
    }
    if start > end || end >= size {
        return None;
    }
    Some((start, end))
}
