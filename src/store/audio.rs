//! Audio discovery for the playlist endpoint: walk a directory object and
//! collect every playable member, however deep. The walk is an explicit
//! stack, so archive depth never translates into call-stack depth.

use crate::store::errors::StoreError;
use std::path::{Path, PathBuf};

const AUDIO_EXTENSIONS: [&str; 4] = ["mp3", "aac", "mp4", "ogg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFile {
    pub path: PathBuf,
    /// File name with the audio extension stripped.
    pub name: String,
    pub size: u64,
}

/// Depth-unbounded scan for audio members under `dir`. Dot-files are skipped.
/// Any readdir/stat failure fails the whole walk; playlists are all or
/// nothing.
pub async fn find_audio(dir: &Path) -> Result<Vec<AudioFile>, StoreError> {
    let mut stack = vec![dir.to_path_buf()];
    let mut found = Vec::new();

    while let Some(current) = stack.pop() {
        let mut rd = tokio::fs::read_dir(&current)
            .await
            .map_err(|source| StoreError::ReadDir {
                path: current.clone(),
                source,
            })?;

        while let Some(entry) = rd
            .next_entry()
            .await
            .map_err(|source| StoreError::ReadDir {
                path: current.clone(),
                source,
            })?
        {
            let path = entry.path();
            let meta = tokio::fs::metadata(&path)
                .await
                .map_err(|source| StoreError::Stat {
                    path: path.clone(),
                    source,
                })?;

            if meta.is_dir() {
                stack.push(path);
                continue;
            }

            if let Some(name) = audio_name(&path) {
                found.push(AudioFile {
                    name,
                    size: meta.len(),
                    path,
                });
            }
        }
    }

    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}

fn audio_name(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    if file_name.starts_with('.') {
        return None;
    }
    let ext = path.extension()?.to_str()?;
    if !AUDIO_EXTENSIONS
        .iter()
        .any(|a| ext.eq_ignore_ascii_case(a))
    {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    Some(stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("peerstash-audio-{tag}-{nanos}"));
        p
    }

    #[tokio::test]
    async fn finds_nested_audio_and_skips_everything_else() {
        let root = temp_dir("walk");
        tokio::fs::create_dir_all(root.join("disc1/deep"))
            .await
            .expect("mkdir");
        tokio::fs::write(root.join("01 intro.mp3"), vec![0u8; 100])
            .await
            .expect("write");
        tokio::fs::write(root.join("disc1/02 song.OGG"), vec![0u8; 200])
            .await
            .expect("write");
        tokio::fs::write(root.join("disc1/deep/03.aac"), vec![0u8; 300])
            .await
            .expect("write");
        tokio::fs::write(root.join("cover.jpg"), vec![0u8; 50])
            .await
            .expect("write");
        tokio::fs::write(root.join(".hidden.mp3"), vec![0u8; 10])
            .await
            .expect("write");

        let files = find_audio(&root).await.expect("walk");
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["01 intro", "02 song", "03"]);
        assert_eq!(files[0].size, 100);
        assert_eq!(files[1].size, 200);

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn multi_dot_names_keep_their_inner_dots() {
        let root = temp_dir("dots");
        tokio::fs::create_dir_all(&root).await.expect("mkdir");
        tokio::fs::write(root.join("feat. someone.mp3"), vec![0u8; 10])
            .await
            .expect("write");

        let files = find_audio(&root).await.expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "feat. someone");

        let _ = tokio::fs::remove_dir_all(&root).await;
    }

    #[tokio::test]
    async fn missing_directory_fails_the_walk() {
        let root = temp_dir("missing");
        assert!(find_audio(&root).await.is_err());
    }
}
