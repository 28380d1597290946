//! Multi-peer fallback fetch: try each candidate in order until one of them
//! streams the object, then materialize it into the store. Peer attempts are
//! strictly sequential; the drain loop bounds how many of these run at once.

use crate::logging::redact_token;
use crate::store::{ArchiveTools, ContentStore, StoreError};
use crate::sync::errors::SyncError;
use crate::sync::tracker::{DownloadDescriptor, PeerDescriptor};
use futures_util::StreamExt as _;
use std::path::Path;
use tokio::io::AsyncWriteExt as _;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Walk the candidate list front to back. A peer that answers with an error
/// body (recognized by content type, not status) or fails at the transport
/// level is skipped in favor of the next one. A materialization failure is
/// terminal for the whole attempt; further peers would only re-fetch the same
/// bytes into the same failing step.
pub async fn fetch_from_peers(
    http: &reqwest::Client,
    store: &ContentStore,
    tools: &ArchiveTools,
    own_id: &str,
    download: &DownloadDescriptor,
    peers: Vec<PeerDescriptor>,
) -> Result<()> {
    for peer in peers {
        if peer.id == own_id {
            tracing::debug!(hash = %download.hash, "skipping ourselves in the peer list");
            continue;
        }

        tracing::info!(
            hash = %download.hash,
            peer = %peer.name,
            token = %redact_token(&peer.token),
            "attempting download"
        );

        let url = format!(
            "{}/download/{}?token={}",
            peer.url.trim_end_matches('/'),
            download.hash,
            urlencoding::encode(&peer.token)
        );

        let resp = match http.get(&url).send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::warn!(peer = %peer.name, error = %err, "peer request failed");
                continue;
            }
        };

        // Peers signal application errors with a 200 JSON body; only the
        // content type tells an error apart from object bytes.
        if is_error_body(&resp) {
            tracing::info!(peer = %peer.name, hash = %download.hash, "peer did not have the object");
            continue;
        }

        let temp = store.tmp_dir().join(&download.hash);
        if let Err(err) = stream_to_file(resp, &temp).await {
            tracing::warn!(peer = %peer.name, hash = %download.hash, error = %err, "stream failed mid-download");
            remove_quietly(&temp).await;
            continue;
        }

        let result = materialize(store, tools, download, &temp).await;
        remove_quietly(&temp).await;
        return match result {
            Ok(()) => {
                tracing::info!(hash = %download.hash, peer = %peer.name, "finished download");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(hash = %download.hash, error = %err, "failed to materialize download");
                Err(err)
            }
        };
    }

    Err(SyncError::ExhaustedPeers {
        hash: download.hash.clone(),
    })
}

fn is_error_body(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("text/javascript"))
        .unwrap_or(false)
}

async fn stream_to_file(resp: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|source| SyncError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|source| SyncError::Io {
                path: path.to_path_buf(),
                source,
            })?;
    }
    file.flush().await.map_err(|source| SyncError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

/// Turn the fetched stream into a finished object: directory objects arrive
/// as tar streams and are unpacked, flat objects are renamed into place.
async fn materialize(
    store: &ContentStore,
    tools: &ArchiveTools,
    download: &DownloadDescriptor,
    temp: &Path,
) -> Result<()> {
    // An upload can land the same hash while we were fetching; existing
    // bytes always win.
    if store.exists(&download.hash).await {
        tracing::debug!(hash = %download.hash, "object appeared while fetching; keeping existing bytes");
        return Ok(());
    }

    let dest = store.object_path(&download.hash);
    if download.streaming {
        tokio::fs::create_dir(&dest)
            .await
            .map_err(|source| StoreError::Mkdir {
                path: dest.clone(),
                source,
            })?;
        tools.untar_into(temp, &dest).await?;
        return Ok(());
    }
    tokio::fs::rename(temp, &dest)
        .await
        .map_err(|source| StoreError::Rename {
            from: temp.to_path_buf(),
            to: dest,
            source,
        })?;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArchiveConfig;
    use axum::{Router, http::header, routing::get};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    const HASH: &str = "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12";

    fn temp_store(tag: &str) -> ContentStore {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("peerstash-fetch-{tag}-{nanos}"));
        ContentStore::new(p)
    }

    fn tools() -> ArchiveTools {
        ArchiveTools::from_config(&ArchiveConfig::default())
    }

    fn descriptor(hash: &str, streaming: bool) -> DownloadDescriptor {
        serde_json::from_value(serde_json::json!({
            "id": "1",
            "hash": hash,
            "filename": "f.bin",
            "size": 11,
            "streaming": streaming,
        }))
        .expect("descriptor")
    }

    fn peer(id: &str, name: &str, url: String) -> PeerDescriptor {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": name,
            "url": url,
            "token": "t0ken",
        }))
        .expect("peer")
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn reserve_closed_port() -> u16 {
        // Bind and immediately drop so the port is (almost certainly) refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    }

    fn counting_error_peer(hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/download/:hash",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async {
                    (
                        [(header::CONTENT_TYPE, "text/javascript")],
                        r#"{"error":"unable to find file"}"#.to_string(),
                    )
                }
            }),
        )
    }

    fn serving_peer(hits: Arc<AtomicUsize>, body: Vec<u8>) -> Router {
        Router::new().route(
            "/download/:hash",
            get(move || {
                hits.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                async move { ([(header::CONTENT_TYPE, "application/octet-stream")], body) }
            }),
        )
    }

    #[tokio::test]
    async fn falls_through_dead_and_empty_peers_and_skips_itself() {
        let store = temp_store("order");
        store.init().await.expect("init");

        let b_hits = Arc::new(AtomicUsize::new(0));
        let self_hits = Arc::new(AtomicUsize::new(0));
        let c_hits = Arc::new(AtomicUsize::new(0));

        let a_url = format!("http://127.0.0.1:{}", reserve_closed_port());
        let b_url = serve(counting_error_peer(b_hits.clone())).await;
        let self_url = serve(serving_peer(self_hits.clone(), b"WRONG BYTES".to_vec())).await;
        let c_url = serve(serving_peer(c_hits.clone(), b"hello bytes".to_vec())).await;

        let peers = vec![
            peer("a", "peer-a", a_url),
            peer("b", "peer-b", b_url),
            peer("me", "peer-me", self_url),
            peer("c", "peer-c", c_url),
        ];

        let http = reqwest::Client::new();
        fetch_from_peers(&http, &store, &tools(), "me", &descriptor(HASH, false), peers)
            .await
            .expect("fetch succeeds via peer c");

        assert_eq!(b_hits.load(Ordering::SeqCst), 1);
        assert_eq!(self_hits.load(Ordering::SeqCst), 0, "own id must be skipped");
        assert_eq!(c_hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            tokio::fs::read(store.object_path(HASH)).await.expect("read"),
            b"hello bytes"
        );

        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }

    #[tokio::test]
    async fn exhausting_the_candidate_list_reports_it() {
        let store = temp_store("exhaust");
        store.init().await.expect("init");

        let hits = Arc::new(AtomicUsize::new(0));
        let b_url = serve(counting_error_peer(hits.clone())).await;
        let peers = vec![peer("b", "peer-b", b_url), peer("me", "peer-me", "http://127.0.0.1:1".to_string())];

        let http = reqwest::Client::new();
        let err = fetch_from_peers(&http, &store, &tools(), "me", &descriptor(HASH, false), peers)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ExhaustedPeers { .. }));
        assert!(!store.exists(HASH).await);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }

    #[tokio::test]
    async fn streaming_download_is_untarred_into_a_directory_object() {
        let store = temp_store("streaming");
        store.init().await.expect("init");

        // Build a tar stream the way a sibling node would serve one.
        let source = store.root().join("source-dir");
        tokio::fs::create_dir_all(&source).await.expect("mkdir");
        tokio::fs::write(source.join("track.mp3"), b"audio!")
            .await
            .expect("write");
        let mut child = tools().synthesize_tar(&source).expect("tar");
        let mut stdout = child.stdout.take().expect("stdout");
        let mut tar_bytes = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stdout, &mut tar_bytes)
            .await
            .expect("read tar");
        assert!(child.wait().await.expect("wait").success());

        let hits = Arc::new(AtomicUsize::new(0));
        let url = serve(serving_peer(hits.clone(), tar_bytes)).await;
        let peers = vec![peer("c", "peer-c", url)];

        let http = reqwest::Client::new();
        fetch_from_peers(&http, &store, &tools(), "me", &descriptor(HASH, true), peers)
            .await
            .expect("fetch");

        let dest = store.object_path(HASH);
        assert!(dest.is_dir());
        assert_eq!(
            tokio::fs::read(dest.join("track.mp3")).await.expect("read"),
            b"audio!"
        );
        assert!(!store.tmp_dir().join(HASH).exists(), "staging file cleaned up");

        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }
}
