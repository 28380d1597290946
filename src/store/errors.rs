use std::path::PathBuf;

#[derive(Debug)]
pub enum StoreError {
    EnsureDir {
        path: PathBuf,
        source: std::io::Error,
    },
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    WriteStage {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    Mkdir {
        path: PathBuf,
        source: std::io::Error,
    },
    ToolSpawn {
        tool: String,
        source: std::io::Error,
    },
    ToolFailed {
        tool: String,
        code: Option<i32>,
    },
    ToolMissing {
        tool: &'static str,
    },
    Entropy {
        source: getrandom::Error,
    },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnsureDir { path, source } => {
                write!(
                    f,
                    "failed to ensure directory '{}': {source}",
                    path.display()
                )
            }
            Self::Stat { path, source } => {
                write!(f, "failed to stat '{}': {source}", path.display())
            }
            Self::ReadDir { path, source } => {
                write!(f, "failed to read directory '{}': {source}", path.display())
            }
            Self::WriteStage { path, source } => {
                write!(
                    f,
                    "failed to write staging file '{}': {source}",
                    path.display()
                )
            }
            Self::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename '{}' to '{}': {source}",
                    from.display(),
                    to.display()
                )
            }
            Self::Mkdir { path, source } => {
                write!(
                    f,
                    "failed to create directory '{}': {source}",
                    path.display()
                )
            }
            Self::ToolSpawn { tool, source } => {
                write!(f, "failed to spawn '{tool}': {source}")
            }
            Self::ToolFailed { tool, code } => match code {
                Some(code) => write!(f, "'{tool}' exited with status {code}"),
                None => write!(f, "'{tool}' was terminated by a signal"),
            },
            Self::ToolMissing { tool } => {
                write!(f, "no '{tool}' command is configured")
            }
            Self::Entropy { source } => {
                write!(f, "failed to gather staging-name entropy: {source}")
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::EnsureDir { source, .. }
            | Self::Stat { source, .. }
            | Self::ReadDir { source, .. }
            | Self::WriteStage { source, .. }
            | Self::Rename { source, .. }
            | Self::Mkdir { source, .. }
            | Self::ToolSpawn { source, .. } => Some(source),
            Self::ToolFailed { .. } | Self::ToolMissing { .. } => None,
            Self::Entropy { source } => Some(source),
        }
    }
}
