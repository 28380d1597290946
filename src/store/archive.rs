//! Archive handling behind a small capability surface: expand an uploaded
//! archive into a directory object, untar a replicated directory object, or
//! synthesize a tar stream from one. Callers never assume a particular tool
//! beyond what the config names.

use crate::config::ArchiveConfig;
use crate::store::errors::StoreError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct ArchiveTools {
    tar: String,
    unzip: Option<String>,
    unrar: Option<String>,
}

impl ArchiveTools {
    pub fn from_config(cfg: &ArchiveConfig) -> Self {
        Self {
            tar: cfg.tar.clone(),
            unzip: cfg.unzip.clone(),
            unrar: cfg.unrar.clone(),
        }
    }

    pub fn can_expand_zip(&self) -> bool {
        self.unzip.is_some()
    }

    pub fn can_extract_rar(&self) -> bool {
        self.unrar.is_some()
    }

    /// `unzip <archive> -d <dest>`; the tool creates the destination.
    pub async fn expand_zip(&self, archive: &Path, dest: &Path) -> Result<()> {
        let unzip = self
            .unzip
            .as_deref()
            .ok_or(StoreError::ToolMissing { tool: "unzip" })?;
        run_quiet(Command::new(unzip).arg(archive).arg("-d").arg(dest), unzip).await
    }

    /// `unrar x <archive> <dest>`; the destination must already exist.
    pub async fn extract_rar(&self, archive: &Path, dest: &Path) -> Result<()> {
        let unrar = self
            .unrar
            .as_deref()
            .ok_or(StoreError::ToolMissing { tool: "unrar" })?;
        run_quiet(
            Command::new(unrar).arg("x").arg(archive).arg(dest),
            unrar,
        )
        .await
    }

    /// `tar -xf <archive>` with the destination directory as cwd.
    pub async fn untar_into(&self, archive: &Path, dest: &Path) -> Result<()> {
        run_quiet(
            Command::new(&self.tar)
                .arg("-xf")
                .arg(archive)
                .current_dir(dest),
            &self.tar,
        )
        .await
    }

    /// `tar -cf - .` with the directory as cwd, stdout piped so the caller
    /// can stream the archive as it is produced. The caller owns the child.
    pub fn synthesize_tar(&self, dir: &Path) -> Result<Child> {
        Command::new(&self.tar)
            .args(["-cf", "-", "."])
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| StoreError::ToolSpawn {
                tool: self.tar.clone(),
                source,
            })
    }
}

async fn run_quiet(cmd: &mut Command, tool: &str) -> Result<()> {
    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|source| StoreError::ToolSpawn {
            tool: tool.to_string(),
            source,
        })?;
    if !status.success() {
        return Err(StoreError::ToolFailed {
            tool: tool.to_string(),
            code: status.code(),
        });
    }
    Ok(())
}
