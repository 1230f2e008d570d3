//! In-memory backend for tests. Counts the calls a cache should absorb.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use super::{Backend, StorageError, StorageResult};
use crate::cache::Metadata;

#[derive(Default)]
pub(crate) struct MemoryBackend {
    pub(crate) files: BTreeMap<String, Vec<u8>>,
    pub(crate) metadata: BTreeMap<String, Metadata>,
    pub(crate) lists: AtomicUsize,
    pub(crate) sizes: AtomicUsize,
    pub(crate) metadata_fetches: AtomicUsize,
    /// Shared so it can be read after the backend is dropped
    pub(crate) closes: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Files whose content is their own path
    pub(crate) fn with_files(paths: &[&str]) -> Self {
        let mut backend = Self::default();
        for path in paths {
            backend.files.insert(path.to_string(), path.as_bytes().to_vec());
        }
        backend
    }

    pub(crate) fn with_metadata(mut self, path: &str, metadata: Metadata) -> Self {
        self.metadata.insert(path.to_string(), metadata);
        self
    }

    pub(crate) fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub(crate) fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn separator(&self) -> &str {
        "/"
    }

    fn uri(&self, path: &str) -> String {
        format!("mem://{}", path)
    }

    async fn close(&mut self) -> StorageResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> StorageResult<bool> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self.files.contains_key(path) || self.files.keys().any(|f| f.starts_with(&prefix)))
    }

    async fn is_file(&self, path: &str) -> StorageResult<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn fetch_size(&self, path: &str) -> StorageResult<u64> {
        self.sizes.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn fetch_metadata(&self, path: &str) -> StorageResult<Metadata> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.get(path).cloned().unwrap_or_default())
    }

    async fn list(&self, dir_path: &str, recursively: bool) -> StorageResult<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let prefix = format!("{}/", dir_path.trim_end_matches('/'));

        let mut listing = BTreeSet::new();
        for path in self.files.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((child, _)) if !recursively => {
                    listing.insert(format!("{}{}/", prefix, child));
                }
                _ => {
                    listing.insert(path.clone());
                }
            }
        }

        if listing.is_empty() && prefix != "/" {
            return Err(StorageError::NotFound(dir_path.to_string()));
        }
        // Reverse order, so callers must not rely on backend ordering
        Ok(listing.into_iter().rev().collect())
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn write(&self, _path: &str, _data: &[u8], _metadata: Option<&Metadata>) -> StorageResult<()> {
        Ok(())
    }
}
