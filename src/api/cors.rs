//! The one CORS rule this node needs: browser uploads arrive from pages the
//! tracker serves, so the allowed origin is always the tracker's host, but
//! carrying the request's scheme, so an https page is answered with an https
//! allow-origin even when the node only knows the tracker's http URL.

pub(crate) fn derive_allow_origin(origin: Option<&str>, tracker_url: &str) -> String {
    let tracker = tracker_url.trim_end_matches('/');
    let Some(origin) = origin else {
        return tracker.to_string();
    };

    let Some((origin_scheme, _)) = origin.split_once("://") else {
        return tracker.to_string();
    };
    let tracker_rest = tracker
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(tracker);

    format!("{origin_scheme}://{tracker_rest}")
}
