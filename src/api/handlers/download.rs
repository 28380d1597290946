//! Token-gated retrieval. Flat objects stream verbatim with a length;
//! directory objects are tarred on the fly, so the length is unknowable and
//! the header is simply omitted.

use axum::{
    extract::{Path as UrlPath, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::api::{
    ApiState,
    error::{ApiError, accepts_html, error_response, json_response},
    handlers::core::allow_origin_for,
};
use crate::store::ContentStore;
use crate::token::{DownloadClaims, check_freshness, unix_now};

#[derive(Debug, Deserialize)]
pub(crate) struct DownloadQuery {
    token: Option<String>,
    exists: Option<String>,
}

pub(crate) async fn download(
    State(state): State<ApiState>,
    UrlPath(hash): UrlPath<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    match run_download(&state, &hash, &query, &allow).await {
        Ok(resp) => resp,
        Err(err) => error_response(&allow, accepts_html(&headers), &err),
    }
}

async fn run_download(
    state: &ApiState,
    hash: &str,
    query: &DownloadQuery,
    allow: &str,
) -> Result<Response, ApiError> {
    if !ContentStore::is_valid_hash(hash) {
        return Err(ApiError::MissingHash);
    }

    let payload = state.tokens.verify(query.token.as_deref())?;
    let claims = DownloadClaims::from_payload(&payload)?;
    check_freshness(claims.time, unix_now())?;

    let path = state.store.object_path(hash);
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|_| ApiError::NotFound)?;

    // Directory "size" is meaningless, so only flat objects are checked
    // against the claim.
    if meta.is_file() && meta.len() != claims.size {
        return Err(ApiError::SizeMismatch);
    }

    // Replication probes before committing to a transfer; acknowledge
    // without moving any bytes.
    if query.exists.as_deref().is_some_and(|v| !v.is_empty()) {
        return Ok(json_response(allow, &serde_json::json!({"success": "ok"})));
    }

    if meta.is_file() {
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|_| ApiError::NotFound)?;
        let mut resp = Response::new(axum::body::Body::from_stream(ReaderStream::new(file)));
        *resp.status_mut() = StatusCode::OK;
        let headers = resp.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(
            header::CONTENT_DISPOSITION,
            attachment_disposition(&claims.filename),
        );
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
        return Ok(resp);
    }

    serve_directory_as_tar(state, &path, &claims.filename)
}

fn serve_directory_as_tar(
    state: &ApiState,
    dir: &std::path::Path,
    filename: &str,
) -> Result<Response, ApiError> {
    let mut child = state.tools.synthesize_tar(dir)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ApiError::Internal("tar stdout unavailable".to_string()))?;

    // The response may already be in flight when tar fails; reap the child
    // and log, never abort the stream.
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => {
                tracing::warn!(code = ?status.code(), "tar synthesis exited with failure");
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed waiting on tar synthesis");
            }
            Ok(_) => {}
        }
    });

    let mut resp = Response::new(axum::body::Body::from_stream(ReaderStream::new(stdout)));
    *resp.status_mut() = StatusCode::OK;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&format!("{filename}.tar")),
    );
    Ok(resp)
}

pub(crate) fn attachment_disposition(filename: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename.replace('"', "'")))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_quotes_the_filename() {
        assert_eq!(
            attachment_disposition("a b.bin"),
            "attachment; filename=\"a b.bin\""
        );
    }

    #[test]
    fn disposition_survives_hostile_filenames() {
        let value = attachment_disposition("we\"ird\nname");
        assert_eq!(value, "attachment");
    }
}
