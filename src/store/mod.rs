//! Content-addressed object store. Identity is the lowercase hex SHA-1 of
//! the ingested byte stream; an object is either a flat file or a directory
//! of expanded archive members, both named by hash directly under the data
//! root. Objects are created atomically and never mutated or overwritten.

pub mod archive;
pub mod audio;
pub mod errors;

pub use archive::ArchiveTools;
pub use errors::StoreError;

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOutcome {
    /// True when the object is a directory of members (expanded archive),
    /// meaning downloads of it are served as a synthesized tar stream.
    pub streaming: bool,
    /// True when the hash was already present and the upload was discarded.
    pub deduplicated: bool,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn init(&self) -> Result<()> {
        for dir in [self.root.clone(), self.tmp_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| StoreError::EnsureDir { path: dir, source })?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    /// Hashes arrive from URLs and tracker responses; only hex digests are
    /// ever valid, and anything else must not be allowed to name a path.
    pub fn is_valid_hash(hash: &str) -> bool {
        !hash.is_empty() && hash.chars().all(|c| c.is_ascii_hexdigit())
    }

    pub async fn exists(&self, hash: &str) -> bool {
        tokio::fs::metadata(self.object_path(hash)).await.is_ok()
    }

    /// Fresh unique path under `tmp/` for staging an incoming byte stream.
    pub fn stage_path(&self) -> Result<PathBuf> {
        let mut raw = [0u8; 8];
        getrandom::getrandom(&mut raw).map_err(|source| StoreError::Entropy { source })?;
        Ok(self
            .tmp_dir()
            .join(format!("upload-{}", crate::token::hex_lower(&raw))))
    }

    /// Materialize a staged upload under its content hash. Idempotent on
    /// content: an existing object wins and the staged bytes are discarded.
    /// Archive uploads are expanded into a directory object when the matching
    /// tool is configured; everything else becomes a flat file via an atomic
    /// rename. On error the staged file is left for the caller to clean up.
    pub async fn ingest(
        &self,
        tools: &ArchiveTools,
        staged: &Path,
        hash: &str,
        filename: &str,
    ) -> Result<IngestOutcome> {
        let dest = self.object_path(hash);

        if let Ok(meta) = tokio::fs::metadata(&dest).await {
            discard_staged(staged).await;
            return Ok(IngestOutcome {
                streaming: meta.is_dir(),
                deduplicated: true,
            });
        }

        if has_extension(filename, "zip") && tools.can_expand_zip() {
            tools.expand_zip(staged, &dest).await?;
            discard_staged(staged).await;
            return Ok(IngestOutcome {
                streaming: true,
                deduplicated: false,
            });
        }

        if has_extension(filename, "rar") && tools.can_extract_rar() {
            tokio::fs::create_dir(&dest)
                .await
                .map_err(|source| StoreError::Mkdir {
                    path: dest.clone(),
                    source,
                })?;
            tools.extract_rar(staged, &dest).await?;
            discard_staged(staged).await;
            return Ok(IngestOutcome {
                streaming: true,
                deduplicated: false,
            });
        }

        tokio::fs::rename(staged, &dest)
            .await
            .map_err(|source| StoreError::Rename {
                from: staged.to_path_buf(),
                to: dest,
                source,
            })?;
        Ok(IngestOutcome {
            streaming: false,
            deduplicated: false,
        })
    }
}

fn has_extension(filename: &str, ext: &str) -> bool {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

async fn discard_staged(staged: &Path) {
    if let Err(err) = tokio::fs::remove_file(staged).await {
        // Non-fatal: the object is already in place, the leftover only
        // wastes scratch space.
        tracing::warn!(path = %staged.display(), error = %err, "failed to remove staged upload");
    }
}
