//! Multipart ingestion. The file part is staged to the store's scratch area
//! while its SHA-1 is computed, then handed to the store for materialization
//! under the resulting hash. The caller gets a signed receipt appended to its
//! `return` URL: a 301 for plain form posts, a JSON `{location}` body for
//! scripted uploads.

use axum::{
    extract::{Multipart, State, multipart::Field},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::Serialize;
use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt as _;

use crate::api::{
    ApiState,
    error::{ApiError, accepts_html, error_response, json_response},
    handlers::core::allow_origin_for,
};
use crate::store::StoreError;
use crate::token::hex_lower;

#[derive(Debug, Serialize)]
struct UploadReceipt {
    hash: String,
    size: u64,
    filename: String,
    streaming: bool,
    server: String,
    tags: Vec<String>,
    sig: String,
}

struct UploadOutcome {
    location: String,
    is_js: bool,
}

#[derive(Default)]
struct UploadForm {
    token: Option<String>,
    return_url: String,
    is_js: bool,
    tags: Vec<String>,
    staged: Option<StagedFile>,
}

struct StagedFile {
    path: PathBuf,
    filename: String,
    size: u64,
    hash: String,
}

pub(crate) async fn upload(
    State(state): State<ApiState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Response {
    let allow = allow_origin_for(&headers, &state.tracker_url);
    match run_upload(&state, multipart).await {
        Ok(UploadOutcome {
            location,
            is_js: true,
        }) => json_response(&allow, &serde_json::json!({ "location": location })),
        Ok(UploadOutcome {
            location,
            is_js: false,
        }) => redirect(&location),
        Err(err) => error_response(&allow, accepts_html(&headers), &err),
    }
}

async fn run_upload(state: &ApiState, multipart: Multipart) -> Result<UploadOutcome, ApiError> {
    let mut form = UploadForm::default();
    if let Err(err) = parse_form(state, &mut form, multipart).await {
        if let Some(staged) = form.staged.take() {
            discard(&staged.path).await;
        }
        return Err(err);
    }

    let staged = form.staged.take().ok_or(ApiError::NoFile)?;
    if staged.size == 0 {
        discard(&staged.path).await;
        return Err(ApiError::NoFile);
    }

    // The payload carries no required fields and no freshness window on this
    // path; a validly signed token is the whole capability.
    if let Err(err) = state.tokens.verify(form.token.as_deref()) {
        discard(&staged.path).await;
        return Err(err.into());
    }

    let outcome = match state
        .store
        .ingest(&state.tools, &staged.path, &staged.hash, &staged.filename)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            discard(&staged.path).await;
            return Err(err.into());
        }
    };

    tracing::info!(
        hash = %staged.hash,
        size = staged.size,
        filename = %staged.filename,
        streaming = outcome.streaming,
        deduplicated = outcome.deduplicated,
        "ingested upload"
    );

    let receipt = UploadReceipt {
        sig: state.tokens.receipt_sig(staged.size, &staged.hash),
        hash: staged.hash,
        size: staged.size,
        filename: staged.filename,
        streaming: outcome.streaming,
        server: state.server_id.clone(),
        tags: form.tags,
    };
    let json =
        serde_json::to_string(&receipt).map_err(|err| ApiError::Internal(err.to_string()))?;
    let query = urlencoding::encode(&BASE64.encode(json)).into_owned();

    Ok(UploadOutcome {
        location: format!("{}?{query}", form.return_url),
        is_js: form.is_js,
    })
}

async fn parse_form(
    state: &ApiState,
    form: &mut UploadForm,
    mut multipart: Multipart,
) -> Result<(), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
    {
        match field.name().unwrap_or("") {
            "token" => form.token = Some(field_text(field).await?),
            "tags" | "tags[]" => form.tags.push(field_text(field).await?),
            "return" => form.return_url = field_text(field).await?,
            "is_js" => form.is_js = !field_text(field).await?.is_empty(),
            "file" => {
                if let Some(previous) = form.staged.take() {
                    discard(&previous.path).await;
                }
                form.staged = Some(stage_file(state, field).await?);
            }
            _ => {
                // Unknown parts are drained and ignored.
                let _ = field_text(field).await;
            }
        }
    }
    Ok(())
}

/// Stream the file part to a unique scratch path, hashing as it goes.
async fn stage_file(state: &ApiState, mut field: Field<'_>) -> Result<StagedFile, ApiError> {
    let filename = field
        .file_name()
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.bin")
        .to_string();

    let path = state.store.stage_path()?;
    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|source| StoreError::WriteStage {
            path: path.clone(),
            source,
        })?;

    let mut sha = Sha1::new();
    let mut size: u64 = 0;

    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                sha.update(&chunk);
                size += chunk.len() as u64;
                if let Err(source) = file.write_all(&chunk).await {
                    discard(&path).await;
                    return Err(StoreError::WriteStage { path, source }.into());
                }
            }
            Ok(None) => break,
            Err(err) => {
                discard(&path).await;
                return Err(ApiError::Internal(err.to_string()));
            }
        }
    }

    if let Err(source) = file.flush().await {
        discard(&path).await;
        return Err(StoreError::WriteStage { path, source }.into());
    }

    Ok(StagedFile {
        path,
        filename,
        size,
        hash: hex_lower(&sha.finalize()),
    })
}

async fn field_text(field: Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))
}

fn redirect(location: &str) -> Response {
    let mut resp = Response::new(axum::body::Body::empty());
    *resp.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = HeaderValue::from_str(location) {
        resp.headers_mut().insert(header::LOCATION, value);
    }
    resp
}

async fn discard(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove staged upload");
        }
    }
}
