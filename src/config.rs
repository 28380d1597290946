use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

fn default_server_id() -> String {
    "node-1".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8044
}
fn default_secret() -> String {
    "".to_string()
}
fn default_tracker_url() -> String {
    "http://127.0.0.1:3000".to_string()
}
fn default_data_root() -> String {
    "data".to_string()
}
fn default_tar_cmd() -> String {
    "tar".to_string()
}
fn default_unzip_cmd() -> Option<String> {
    Some("unzip".to_string())
}
fn default_unrar_cmd() -> Option<String> {
    Some("unrar".to_string())
}
fn default_sync_max_jobs() -> usize {
    3
}
fn default_sync_poll_every_secs() -> u64 {
    600
}
fn default_sync_drain_every_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tracker: TrackerConfig,
    pub storage: StorageConfig,
    pub archive: ArchiveConfig,
    pub sync: SyncConfig,
    pub general: GeneralConfig,
}

impl Config {
    pub async fn persist(&self) -> anyhow::Result<()> {
        let path = "config.toml";
        let tmp_path = format!("{}.tmp", path);
        let toml = toml::to_string_pretty(self)?;

        tokio::fs::write(&tmp_path, toml).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity this node reports to the tracker and to sibling nodes.
    /// Must match the id the tracker has on file for this node.
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for capability-token signatures and tracker auth.
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the content-addressed namespace. A `tmp/` subdirectory is
    /// created under it for upload and replication staging.
    pub data_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// `tar` is required: directory objects are served as synthesized tar
    /// streams and replicated ones are untarred back into directories.
    pub tar: String,
    /// Optional expanders. When absent, `.zip`/`.rar` uploads are stored as
    /// flat files like any other upload.
    pub unzip: Option<String>,
    pub unrar: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_jobs: usize,
    pub poll_every_secs: u64,
    pub drain_every_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            id: default_server_id(),
            host: default_host(),
            port: default_port(),
            secret: default_secret(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            url: default_tracker_url(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            tar: default_tar_cmd(),
            unzip: default_unzip_cmd(),
            unrar: default_unrar_cmd(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_jobs: default_sync_max_jobs(),
            poll_every_secs: default_sync_poll_every_secs(),
            drain_every_secs: default_sync_drain_every_secs(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

pub fn init_tracing(config: &Config) {
    // Priority order:
    // 1) RUST_LOG (standard in Rust ecosystem)
    // 2) general.log_level from config.toml
    // 3) default (info)

    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| Some(config.general.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());

    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let back: Config = toml::from_str(&text).expect("parse");
        assert_eq!(back.server.port, cfg.server.port);
        assert_eq!(back.sync.max_jobs, 3);
        assert_eq!(back.archive.tar, "tar");
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            id = "alpha"
            secret = "s3cret"

            [tracker]
            url = "https://tracker.example.com"
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.server.id, "alpha");
        assert_eq!(cfg.server.port, 8044);
        assert_eq!(cfg.tracker.url, "https://tracker.example.com");
        assert_eq!(cfg.sync.poll_every_secs, 600);
        assert_eq!(cfg.storage.data_root, "data");
    }
}
