//! The tracker is consumed as exactly two endpoints: "what should this node
//! be holding" and "who currently holds this download". Both are
//! authenticated with the shared secret in an `X-Server-Auth` header.

use crate::sync::errors::SyncError;
use serde::Deserialize;

pub type Result<T> = std::result::Result<T, SyncError>;

const AUTH_HEADER: &str = "X-Server-Auth";

/// One download this node subscribes to, as reported by the tracker.
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadDescriptor {
    /// Tracker-side record id, opaque to us; some deployments emit it as a
    /// JSON number.
    #[serde(deserialize_with = "id_from_json")]
    pub id: String,
    pub hash: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub size: u64,
    /// Directory object: the peer serves it as a tar stream that must be
    /// unpacked on arrival.
    #[serde(default)]
    pub streaming: bool,
}

/// One candidate source for a download, with the capability token that peer
/// will accept.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerDescriptor {
    #[serde(deserialize_with = "id_from_json")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    pub token: String,
}

fn id_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct DownloadsEnvelope {
    downloads: Vec<DownloadDescriptor>,
}

#[derive(Debug, Deserialize)]
struct ServersEnvelope {
    servers: Vec<PeerDescriptor>,
}

#[derive(Clone)]
pub struct TrackerClient {
    http: reqwest::Client,
    base_url: String,
    secret: String,
}

impl TrackerClient {
    pub fn new(base_url: &str, secret: &str, server_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("server-{server_id}"))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    /// Shared client so peer fetches carry the same user agent.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// `GET /api/my/downloads`: the set of downloads this node subscribes to.
    pub async fn my_downloads(&self) -> Result<Vec<DownloadDescriptor>> {
        let endpoint = "/api/my/downloads";
        let resp = self
            .http
            .get(format!("{}{endpoint}", self.base_url))
            .header(AUTH_HEADER, &self.secret)
            .send()
            .await?;
        let envelope: DownloadsEnvelope =
            resp.json()
                .await
                .map_err(|err| SyncError::TrackerResponse {
                    endpoint: "/api/my/downloads",
                    detail: err.to_string(),
                })?;
        Ok(envelope.downloads)
    }

    /// `GET /api/upload/:id/servers`: ordered candidate peers for one
    /// download.
    pub async fn peers_for(&self, download_id: &str) -> Result<Vec<PeerDescriptor>> {
        let resp = self
            .http
            .get(format!(
                "{}/api/upload/{download_id}/servers",
                self.base_url
            ))
            .header(AUTH_HEADER, &self.secret)
            .send()
            .await?;
        let envelope: ServersEnvelope =
            resp.json()
                .await
                .map_err(|err| SyncError::TrackerResponse {
                    endpoint: "/api/upload/:id/servers",
                    detail: err.to_string(),
                })?;
        Ok(envelope.servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_fields_beyond_the_identity_are_optional() {
        let d: DownloadDescriptor =
            serde_json::from_str(r#"{"id": 17, "hash": "abc123"}"#).expect("parse");
        assert_eq!(d.id, "17");
        assert_eq!(d.hash, "abc123");
        assert_eq!(d.size, 0);
        assert!(!d.streaming);
        assert!(d.filename.is_empty());
    }

    #[test]
    fn peer_descriptor_requires_url_and_token() {
        let err = serde_json::from_str::<PeerDescriptor>(r#"{"id": "2", "name": "n"}"#);
        assert!(err.is_err());
    }
}
