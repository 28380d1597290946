//! The node's wire contract for failures: every request-path error renders as
//! a JSON `{"error": …}` body with HTTP status 200. Peer clients sniff the
//! `text/javascript` content type to tell an error body apart from object
//! bytes, so the status code only frames success/redirect/partial-content.

use crate::store::StoreError;
use crate::token::{MissingField, TokenError};
use axum::{
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};

#[derive(Debug)]
pub(crate) enum ApiError {
    Token(TokenError),
    Claims(MissingField),
    MissingHash,
    NoFile,
    /// Object absent (or a track path that cannot be opened).
    NotFound,
    SizeMismatch,
    Store(StoreError),
    Internal(String),
}

impl ApiError {
    pub(crate) fn message(&self) -> String {
        match self {
            Self::Token(err) => err.to_string(),
            Self::Claims(err) => err.to_string(),
            Self::MissingHash => "missing hash".to_string(),
            Self::NoFile => "no file".to_string(),
            Self::NotFound => "unable to find file".to_string(),
            Self::SizeMismatch => "size does not match".to_string(),
            Self::Store(err) => err.to_string(),
            Self::Internal(msg) => msg.clone(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(value: TokenError) -> Self {
        Self::Token(value)
    }
}

impl From<MissingField> for ApiError {
    fn from(value: MissingField) -> Self {
        Self::Claims(value)
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub(crate) const TEXT_JAVASCRIPT: &str = "text/javascript";

/// JSON response in the node's envelope: 200, `text/javascript`, derived
/// allow-origin header.
pub(crate) fn json_response(allow_origin: &str, body: &serde_json::Value) -> Response {
    let mut resp = Response::new(axum::body::Body::from(body.to_string()));
    *resp.status_mut() = StatusCode::OK;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TEXT_JAVASCRIPT),
    );
    apply_allow_origin(&mut resp, allow_origin);
    resp
}

/// Browsers land on these endpoints directly (redirect targets, bare links);
/// give them a readable page instead of the JSON envelope.
pub(crate) fn accepts_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|accept| accept.split(',').any(|part| part.trim() == "text/html"))
        .unwrap_or(false)
}

pub(crate) fn error_response(allow_origin: &str, wants_html: bool, err: &ApiError) -> Response {
    let message = err.message();
    tracing::debug!(error = %message, "request failed");
    if wants_html {
        let mut resp = Response::new(axum::body::Body::from(format!(
            "<html><body><h1>Error</h1><p>{message}</p></body></html>"
        )));
        *resp.status_mut() = StatusCode::OK;
        resp.headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
        return resp;
    }
    json_response(allow_origin, &serde_json::json!({ "error": message }))
}

pub(crate) fn apply_allow_origin(resp: &mut Response, allow_origin: &str) {
    let value = HeaderValue::from_str(allow_origin)
        .unwrap_or_else(|_| HeaderValue::from_static("null"));
    resp.headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_match_the_wire_contract() {
        assert_eq!(
            ApiError::Token(TokenError::Missing).message(),
            "token is required"
        );
        assert_eq!(
            ApiError::Token(TokenError::Expired).message(),
            "token is expired"
        );
        assert_eq!(
            ApiError::Claims(MissingField("filename")).message(),
            "filename is missing"
        );
        assert_eq!(ApiError::NotFound.message(), "unable to find file");
        assert_eq!(ApiError::SizeMismatch.message(), "size does not match");
        assert_eq!(ApiError::NoFile.message(), "no file");
    }

    #[test]
    fn error_envelope_is_a_200_with_text_javascript() {
        let resp = error_response("http://tracker.example.com", false, &ApiError::MissingHash);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            TEXT_JAVASCRIPT
        );
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://tracker.example.com"
        );
    }

    #[test]
    fn browsers_get_an_html_error_page() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        );
        assert!(accepts_html(&headers));

        let resp = error_response("http://tracker.example.com", true, &ApiError::NotFound);
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "text/html");
    }

    #[test]
    fn non_browser_clients_stay_on_the_json_envelope() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
        assert!(!accepts_html(&headers));
        assert!(!accepts_html(&HeaderMap::new()));
    }
}
