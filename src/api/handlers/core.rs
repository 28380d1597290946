use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, header},
    response::Response,
};

use crate::api::{
    ApiState,
    cors::derive_allow_origin,
    error::{ApiError, accepts_html, apply_allow_origin, error_response, json_response},
};

pub(crate) fn allow_origin_for(headers: &HeaderMap, tracker_url: &str) -> String {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok());
    derive_allow_origin(origin, tracker_url)
}

pub(crate) async fn ping(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    json_response(&allow, &serde_json::json!({"success": "ok"}))
}

/// CORS preflight acknowledgment; any path gets the same answer.
pub(crate) async fn preflight(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    let mut resp = Response::new(axum::body::Body::empty());
    *resp.status_mut() = StatusCode::OK;
    apply_allow_origin(&mut resp, &allow);
    resp
}

pub(crate) async fn missing_hash(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    error_response(&allow, accepts_html(&headers), &ApiError::MissingHash)
}

pub(crate) async fn fallback(
    State(state): State<ApiState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if method == Method::OPTIONS {
        return preflight(State(state), headers).await;
    }
    let allow = allow_origin_for(&headers, &state.tracker_url);
    error_response(
        &allow,
        accepts_html(&headers),
        &ApiError::Internal("unknown error".to_string()),
    )
}
