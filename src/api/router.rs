use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

use crate::api::{
    ApiState,
    handlers::{download, fallback, missing_hash, ping, preflight, streamer, upload},
};

pub(crate) fn build_app(state: ApiState) -> Router<()> {
    Router::new()
        .route("/ping", get(ping).options(preflight))
        .route("/download", get(missing_hash).options(preflight))
        .route("/download/:hash", get(download).options(preflight))
        .route("/streamer", get(missing_hash).options(preflight))
        .route("/streamer/:hash", get(streamer).options(preflight))
        .route(
            "/",
            get(missing_hash).post(upload).options(preflight),
        )
        .fallback(fallback)
        // Uploads are whole objects; the multipart stream is staged to disk,
        // not buffered, so no in-memory limit applies.
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
