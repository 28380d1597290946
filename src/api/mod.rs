use std::net::SocketAddr;

use crate::store::{ArchiveTools, ContentStore};
use crate::token::TokenCodec;

pub mod cors;
pub mod error;
pub mod handlers;
pub mod router;

/// Everything a request handler needs: the store, the archive tools, the
/// token codec, and the two config-derived strings that shape responses.
#[derive(Clone)]
pub struct ApiState {
    pub store: ContentStore,
    pub tools: ArchiveTools,
    pub tokens: TokenCodec,
    pub tracker_url: String,
    pub server_id: String,
}

pub async fn serve(host: &str, port: u16, state: ApiState) -> anyhow::Result<()> {
    let bind_ip: std::net::IpAddr = host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server.host '{host}': {e}"))?;
    let addr = SocketAddr::new(bind_ip, port);

    let app = router::build_app(state);

    tracing::info!(addr = %addr, "node listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
