use crate::{
    api::{self, ApiState},
    store::{ArchiveTools, ContentStore},
    sync::{self, SyncServiceConfig, TrackerClient},
    token::TokenCodec,
};
use anyhow::Context;

pub async fn run(config: crate::config::Config) -> anyhow::Result<()> {
    tracing::info!(
        id = %config.server.id,
        data_root = %config.storage.data_root,
        tracker = %config.tracker.url,
        "starting node"
    );

    if config.server.secret.is_empty() {
        tracing::warn!(
            "server.secret is empty; tokens signed with an empty secret are forgeable by anyone"
        );
    }

    let store = ContentStore::new(&config.storage.data_root);
    store
        .init()
        .await
        .context("failed to prepare the data root")?;

    let tools = ArchiveTools::from_config(&config.archive);
    let tokens = TokenCodec::new(config.server.secret.clone());

    let tracker = TrackerClient::new(
        &config.tracker.url,
        &config.server.secret,
        &config.server.id,
    )
    .context("failed to build the tracker client")?;

    let (mut sync_status_rx, sync_join) = sync::start_service(
        SyncServiceConfig::from_config(&config.sync),
        store.clone(),
        tools.clone(),
        tracker,
        config.server.id.clone(),
    );

    let state = ApiState {
        store,
        tools,
        tokens,
        tracker_url: config.tracker.url.clone(),
        server_id: config.server.id.clone(),
    };

    tokio::select! {
        res = api::serve(&config.server.host, config.server.port, state) => {
            res.context("http server exited")?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("received Ctrl+C");
        }
        _ = watch_sync_status(&mut sync_status_rx) => {}
    }

    // No drain step: in-flight jobs and their staging files are abandoned,
    // and the next poll cycle after restart picks the work back up.
    sync_join.abort();
    tracing::info!("shutting down gracefully");
    Ok(())
}

async fn watch_sync_status(rx: &mut tokio::sync::watch::Receiver<sync::SyncStatus>) {
    loop {
        if rx.changed().await.is_err() {
            return;
        }
        let status = *rx.borrow();
        tracing::debug!(
            backlog = status.backlog_len,
            active_jobs = status.active_jobs,
            "sync status"
        );
    }
}
