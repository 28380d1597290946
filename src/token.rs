//! Capability tokens: signed, self-contained claims that both name and
//! authorize an operation. A token is `base64("<hex sig>:<json payload>")`
//! where the signature is HMAC-SHA1 over the payload bytes with the node's
//! shared secret. Possession equals permission; there is no server-side
//! session or revocation.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Download and streaming tokens must have been minted within this window.
/// Upload tokens are deliberately not time-boxed.
pub const FRESHNESS_WINDOW_SECS: f64 = 600.0;

pub type Result<T> = std::result::Result<T, TokenError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Missing,
    Malformed,
    Invalid,
    Expired,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "token is required"),
            Self::Malformed => write!(f, "malformed token"),
            Self::Invalid => write!(f, "invalid token"),
            Self::Expired => write!(f, "token is expired"),
        }
    }
}

impl std::error::Error for TokenError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingField(pub &'static str);

impl std::fmt::Display for MissingField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is missing", self.0)
    }
}

impl std::error::Error for MissingField {}

/// Signs and verifies capability tokens with the node's shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: String,
}

impl TokenCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Serialize the claims, sign them, and wrap both into an opaque token.
    /// Struct field order makes the serialization deterministic.
    pub fn issue<T: Serialize>(&self, claims: &T) -> serde_json::Result<String> {
        let json = serde_json::to_string(claims)?;
        let sig = self.sign_hex(json.as_bytes());
        Ok(BASE64.encode(format!("{sig}:{json}")))
    }

    /// Decode and authenticate a token, returning the raw payload. Freshness
    /// is a separate caller-side concern, see [`check_freshness`].
    pub fn verify(&self, token: Option<&str>) -> Result<Value> {
        let token = token.filter(|t| !t.is_empty()).ok_or(TokenError::Missing)?;
        let decoded = BASE64.decode(token).map_err(|_| TokenError::Malformed)?;
        let text = String::from_utf8(decoded).map_err(|_| TokenError::Malformed)?;
        let (sig, payload) = text.split_once(':').ok_or(TokenError::Malformed)?;
        if sig.is_empty() || payload.is_empty() {
            return Err(TokenError::Malformed);
        }
        // Plain equality on the hex strings, matching what peer nodes and the
        // tracker observe today. Constant-time comparison would alter timing
        // behavior only.
        if self.sign_hex(payload.as_bytes()) != sig {
            return Err(TokenError::Invalid);
        }
        serde_json::from_str(payload).map_err(|_| TokenError::Malformed)
    }

    /// Content-binding signature placed in upload receipts so the tracker can
    /// later verify the upload was produced by a node holding the secret.
    /// Distinct from the token signature: a bare SHA-1 over
    /// `secret || size || hash`.
    pub fn receipt_sig(&self, size: u64, hash: &str) -> String {
        let mut sha = Sha1::new();
        sha.update(self.secret.as_bytes());
        sha.update(size.to_string().as_bytes());
        sha.update(hash.as_bytes());
        hex_lower(&sha.finalize())
    }

    fn sign_hex(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha1::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(payload);
        hex_lower(&mac.finalize().into_bytes())
    }
}

pub fn hex_lower(b: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(b.len() * 2);
    for v in b {
        let _ = write!(&mut out, "{v:02x}");
    }
    out
}

pub fn unix_now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

pub fn check_freshness(minted_at: f64, now: f64) -> Result<()> {
    if now - minted_at > FRESHNESS_WINDOW_SECS {
        return Err(TokenError::Expired);
    }
    Ok(())
}

/// Claims required to fetch a stored object. All three fields are required;
/// zero or empty values count as absent.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadClaims {
    pub filename: String,
    pub time: f64,
    pub size: u64,
}

impl DownloadClaims {
    pub fn from_payload(payload: &Value) -> std::result::Result<Self, MissingField> {
        let filename = require_string(payload, "filename")?;
        let time = require_time(payload, "time")?;
        let size = require_size(payload, "size")?;
        Ok(Self {
            filename,
            time,
            size,
        })
    }
}

/// Claims minted for the streamer endpoint. A `track` field marks a
/// self-describing single-track token that bypasses the store lookup; a
/// payload without one is a playlist request for a directory object.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamClaims {
    Track { track: String, size: u64, time: f64 },
    Playlist { hash: String, time: f64 },
}

impl StreamClaims {
    pub fn from_payload(payload: &Value) -> std::result::Result<Self, MissingField> {
        if payload.get("track").is_some() {
            let track = require_string(payload, "track")?;
            let size = require_size(payload, "size")?;
            let time = require_time(payload, "time")?;
            return Ok(Self::Track { track, size, time });
        }
        let hash = require_string(payload, "hash")?;
        let time = require_time(payload, "time")?;
        Ok(Self::Playlist { hash, time })
    }

    pub fn time(&self) -> f64 {
        match self {
            Self::Track { time, .. } | Self::Playlist { time, .. } => *time,
        }
    }
}

/// Single-track claims as minted by the playlist handler. Field order is the
/// wire order.
#[derive(Debug, Clone, Serialize)]
pub struct TrackClaims {
    pub time: f64,
    pub size: u64,
    pub track: String,
}

fn require_string(
    payload: &Value,
    field: &'static str,
) -> std::result::Result<String, MissingField> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(MissingField(field))
}

fn require_size(payload: &Value, field: &'static str) -> std::result::Result<u64, MissingField> {
    payload
        .get(field)
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)))
        .filter(|n| *n != 0)
        .ok_or(MissingField(field))
}

fn require_time(payload: &Value, field: &'static str) -> std::result::Result<f64, MissingField> {
    payload
        .get(field)
        .and_then(Value::as_f64)
        .filter(|t| *t != 0.0)
        .ok_or(MissingField(field))
}
