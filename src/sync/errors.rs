use crate::store::StoreError;

#[derive(Debug)]
pub enum SyncError {
    /// The tracker answered, but not with the document we asked for.
    TrackerResponse {
        endpoint: &'static str,
        detail: String,
    },
    /// The tracker or a peer could not be reached, or a transfer broke
    /// mid-stream.
    Transport { source: reqwest::Error },
    /// Every candidate peer was tried (or skipped) without producing the
    /// object.
    ExhaustedPeers { hash: String },
    /// Materialization of a fetched stream failed.
    Store(StoreError),
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TrackerResponse { endpoint, detail } => {
                write!(f, "unusable tracker response from {endpoint}: {detail}")
            }
            Self::Transport { source } => write!(f, "transport error: {source}"),
            Self::ExhaustedPeers { hash } => {
                write!(f, "no peer could provide {hash}")
            }
            Self::Store(source) => write!(f, "{source}"),
            Self::Io { path, source } => {
                write!(f, "io error at '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source } => Some(source),
            Self::Store(source) => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::TrackerResponse { .. } | Self::ExhaustedPeers { .. } => None,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(source: reqwest::Error) -> Self {
        Self::Transport { source }
    }
}
