//! Local disk backend
//!
//! Paths are absolute host paths. Directories in listings end with the
//! platform separator.

use std::io::Write;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use super::{Backend, StorageError, StorageResult};
use crate::cache::Metadata;
use crate::path::join_paths;

#[derive(Debug, Clone, Default)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Immediate children of `dir` as (absolute path, is directory)
    async fn entries(&self, dir: &str) -> StorageResult<Vec<(String, bool)>> {
        let mut read_dir = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| StorageError::from_io(dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            entries.push((join_paths(MAIN_SEPARATOR_STR, &[dir, name.as_str()]), is_dir));
        }
        Ok(entries)
    }

    async fn require_dir(&self, path: &str) -> StorageResult<()> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(path.to_string()));
        }
        Ok(())
    }
}

/// Write through a temp file in the target's directory, then rename
fn write_atomic(target: &Path, data: &[u8]) -> anyhow::Result<()> {
    let parent = target
        .parent()
        .with_context(|| format!("No parent directory for {:?}", target))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {:?}", parent))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .context("Failed to create temp file")?;
    tmp.write_all(data).context("Failed to write temp file")?;
    tmp.persist(target)
        .with_context(|| format!("Failed to persist file: {:?}", target))?;
    Ok(())
}

#[async_trait]
impl Backend for LocalBackend {
    fn separator(&self) -> &str {
        MAIN_SEPARATOR_STR
    }

    fn uri(&self, path: &str) -> String {
        format!("file://{}", path)
    }

    async fn path_exists(&self, path: &str) -> StorageResult<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn is_file(&self, path: &str) -> StorageResult<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch_size(&self, path: &str) -> StorageResult<u64> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(StorageError::InvalidFile(path.to_string()));
        }
        Ok(meta.len())
    }

    async fn fetch_metadata(&self, path: &str) -> StorageResult<Metadata> {
        if !self.is_file(path).await? {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(Metadata::new())
    }

    async fn list(&self, dir_path: &str, recursively: bool) -> StorageResult<Vec<String>> {
        self.require_dir(dir_path).await?;

        let mut listing = Vec::new();
        let mut stack = vec![dir_path.to_string()];

        while let Some(dir) = stack.pop() {
            for (path, is_dir) in self.entries(&dir).await? {
                if !is_dir {
                    listing.push(path);
                    continue;
                }
                listing.push(format!("{}{}", path, MAIN_SEPARATOR_STR));
                if recursively {
                    stack.push(path);
                }
            }
        }

        debug!(dir = %dir_path, recursively, entries = listing.len(), "Listed local directory");
        Ok(listing)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| StorageError::from_io(path, e))
    }

    async fn write(&self, path: &str, data: &[u8], metadata: Option<&Metadata>) -> StorageResult<()> {
        if path.ends_with(MAIN_SEPARATOR_STR) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        if metadata.is_some_and(|m| !m.is_empty()) {
            debug!(path = %path, "Local files carry no metadata, keeping it in the cache only");
        }

        let target = PathBuf::from(path);
        let data = data.to_vec();
        let size = data.len();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(anyhow::Error::from)??;

        debug!(path = %path, size, "Wrote local file");
        Ok(())
    }
}
