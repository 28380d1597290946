//! Replication service: keeps this node's content set synchronized with its
//! tracker subscriptions. One task owns all of the state (backlog plus the
//! active-job set) and multiplexes the poll timer, the drain timer, and job
//! completions, so every queue decision is made without races. Actual
//! transfers run as spawned jobs, at most `max_jobs` at a time.

pub mod errors;
pub mod fetch;
pub mod tracker;

pub use errors::SyncError;
pub use tracker::{DownloadDescriptor, PeerDescriptor, TrackerClient};

use crate::logging::warn_throttled;
use crate::store::{ArchiveTools, ContentStore};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub backlog_len: usize,
    pub active_jobs: usize,
}

#[derive(Debug, Clone)]
pub struct SyncServiceConfig {
    pub poll_every: Duration,
    pub drain_every: Duration,
    pub max_jobs: usize,
}

impl SyncServiceConfig {
    pub fn from_config(cfg: &crate::config::SyncConfig) -> Self {
        Self {
            poll_every: Duration::from_secs(cfg.poll_every_secs.max(1)),
            drain_every: Duration::from_secs(cfg.drain_every_secs.max(1)),
            max_jobs: cfg.max_jobs.max(1),
        }
    }
}

struct SyncState {
    backlog: VecDeque<DownloadDescriptor>,
    jobs: HashSet<String>,
    max_jobs: usize,
}

impl SyncState {
    fn new(max_jobs: usize) -> Self {
        Self {
            backlog: VecDeque::new(),
            jobs: HashSet::new(),
            max_jobs,
        }
    }

    fn has_capacity(&self) -> bool {
        self.jobs.len() < self.max_jobs
    }

    fn job_active(&self, hash: &str) -> bool {
        self.jobs.contains(hash)
    }

    /// Claim the job slot for a hash. Refuses a duplicate so a hash can
    /// never occupy two slots.
    fn register(&mut self, hash: &str) -> bool {
        if self.jobs.contains(hash) {
            return false;
        }
        self.jobs.insert(hash.to_string());
        true
    }

    fn release(&mut self, hash: &str) {
        self.jobs.remove(hash);
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            backlog_len: self.backlog.len(),
            active_jobs: self.jobs.len(),
        }
    }
}

pub fn start_service(
    cfg: SyncServiceConfig,
    store: ContentStore,
    tools: ArchiveTools,
    tracker: TrackerClient,
    own_id: String,
) -> (watch::Receiver<SyncStatus>, tokio::task::JoinHandle<()>) {
    let (status_tx, status_rx) = watch::channel(SyncStatus {
        backlog_len: 0,
        active_jobs: 0,
    });
    let join = tokio::spawn(run_service(cfg, store, tools, tracker, own_id, status_tx));
    (status_rx, join)
}

async fn run_service(
    cfg: SyncServiceConfig,
    store: ContentStore,
    tools: ArchiveTools,
    tracker: TrackerClient,
    own_id: String,
    status_tx: watch::Sender<SyncStatus>,
) {
    let mut state = SyncState::new(cfg.max_jobs);
    let (done_tx, mut done_rx) = mpsc::channel::<String>(cfg.max_jobs.max(1));

    // First poll fires immediately so a fresh node starts catching up right
    // away instead of idling a full interval.
    let mut poll = tokio::time::interval(cfg.poll_every);
    let mut drain = tokio::time::interval(cfg.drain_every);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    drain.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                poll_tick(&tracker, &store, &mut state).await;
            }
            _ = drain.tick() => {
                drain_tick(&store, &tools, &tracker, &own_id, &mut state, &done_tx).await;
            }
            Some(hash) = done_rx.recv() => {
                state.release(&hash);
            }
        }
        let _ = status_tx.send(state.status());
    }
}

/// Ask the tracker what this node should hold and backlog everything that is
/// neither on disk nor already being fetched. A bad poll skips the cycle and
/// leaves the backlog untouched.
async fn poll_tick(tracker: &TrackerClient, store: &ContentStore, state: &mut SyncState) {
    let downloads = match tracker.my_downloads().await {
        Ok(downloads) => downloads,
        Err(err) => {
            if warn_throttled("sync_poll_failed", Duration::from_secs(60)) {
                tracing::warn!(error = %err, "tracker poll failed; skipping cycle");
            }
            return;
        }
    };

    for download in downloads {
        if !ContentStore::is_valid_hash(&download.hash) {
            tracing::warn!(hash = %download.hash, "ignoring download with unusable hash");
            continue;
        }
        if store.exists(&download.hash).await || state.job_active(&download.hash) {
            continue;
        }
        tracing::info!(hash = %download.hash, "enqueued");
        state.backlog.push_back(download);
    }
}

/// Promote one backlog entry to a running job if a slot is free. Entries for
/// objects that appeared on disk (or got a job) since they were enqueued are
/// dropped; the poll loop will rediscover anything genuinely missing.
async fn drain_tick(
    store: &ContentStore,
    tools: &ArchiveTools,
    tracker: &TrackerClient,
    own_id: &str,
    state: &mut SyncState,
    done_tx: &mpsc::Sender<String>,
) {
    if state.backlog.is_empty() || !state.has_capacity() {
        return;
    }
    let Some(download) = state.backlog.pop_front() else {
        return;
    };

    if store.exists(&download.hash).await {
        return;
    }
    // No awaits between the existence check above and the claim below: the
    // at-most-one-job-per-hash invariant depends on it.
    if !state.register(&download.hash) {
        return;
    }

    let store = store.clone();
    let tools = tools.clone();
    let tracker = tracker.clone();
    let own_id = own_id.to_string();
    let done_tx = done_tx.clone();
    tokio::spawn(async move {
        run_job(&store, &tools, &tracker, &own_id, &download).await;
        // The service task is the only writer of the job set; it removes the
        // entry when this message arrives.
        let _ = done_tx.send(download.hash).await;
    });
}

async fn run_job(
    store: &ContentStore,
    tools: &ArchiveTools,
    tracker: &TrackerClient,
    own_id: &str,
    download: &DownloadDescriptor,
) {
    let peers = match tracker.peers_for(&download.id).await {
        Ok(peers) => peers,
        Err(err) => {
            if warn_throttled("sync_servers_failed", Duration::from_secs(60)) {
                tracing::warn!(
                    download_id = %download.id,
                    error = %err,
                    "failed to fetch peer list; releasing job"
                );
            }
            return;
        }
    };

    if let Err(err) =
        fetch::fetch_from_peers(tracker.http(), store, tools, own_id, download, peers).await
    {
        tracing::warn!(hash = %download.hash, error = %err, "download attempt gave up");
    }
}
