//! Directory facade
//!
//! A [`Directory`] pins a storage client to one directory path. Paths
//! passed to its methods may be absolute or relative to that directory.
//! File metadata set through the facade lives in per-file shared handles,
//! so every [`File`] obtained for a path sees later updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::file::File;
use super::{replace_metadata, MetadataHandle};
use crate::cache::Metadata;
use crate::path::{infer_separator, join_paths};
use crate::storage::{Backend, StorageClient, StorageError, StorageResult};

pub struct Directory<B: Backend> {
    client: StorageClient<B>,
    /// Absolute path, always ending with the separator
    path: String,
    /// Last path segment, `None` for the root
    name: Option<String>,
    /// Metadata handles keyed by path relative to this directory
    metadata: HashMap<String, MetadataHandle>,
}

impl<B: Backend> Directory<B> {
    /// Open `client` and point it at the directory `path`.
    ///
    /// `path` may be written with any recognised separator; it is rewritten
    /// with the backend's own.
    pub async fn open(mut client: StorageClient<B>, path: &str) -> StorageResult<Self> {
        let sep = client.separator().to_string();
        let inferred = infer_separator(path);
        let path = if inferred == sep {
            path.to_string()
        } else {
            path.replace(inferred, &sep)
        };
        let trimmed = path.trim_end_matches(sep.as_str());
        let target = if trimmed.is_empty() { sep.as_str() } else { trimmed };

        client.open().await?;

        if client.is_file(target).await? {
            return Err(StorageError::NotADirectory(path));
        }
        if !client.path_exists(target).await? {
            return Err(StorageError::NotFound(path));
        }

        let name = trimmed
            .rsplit(sep.as_str())
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        debug!(uri = %client.backend().uri(trimmed), "Opened directory");

        Ok(Self {
            client,
            path: format!("{}{}", trimmed, sep),
            name,
            metadata: HashMap::new(),
        })
    }

    /// Close the underlying client
    pub async fn close(mut self) -> StorageResult<()> {
        self.client.close().await
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn uri(&self) -> String {
        self.client.backend().uri(&self.path)
    }

    pub fn separator(&self) -> &str {
        self.client.separator()
    }

    pub fn client(&self) -> &StorageClient<B> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut StorageClient<B> {
        &mut self.client
    }

    pub fn is_cacheable(&self) -> bool {
        self.client.is_cacheable()
    }

    /// Path relative to this directory
    fn to_relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.path.as_str())
            .unwrap_or(path)
            .trim_start_matches(self.separator())
    }

    /// Absolute path under this directory
    fn to_absolute(&self, path: &str) -> String {
        join_paths(self.separator(), &[self.path.as_str(), self.to_relative(path)])
    }

    pub async fn path_exists(&self, path: &str) -> StorageResult<bool> {
        self.client.path_exists(&self.to_absolute(path)).await
    }

    pub async fn is_file(&self, path: &str) -> StorageResult<bool> {
        self.client.is_file(&self.to_absolute(path)).await
    }

    /// Absolute path of an existing file, `InvalidFile` otherwise
    async fn require_file(&self, path: &str) -> StorageResult<String> {
        let absolute = self.to_absolute(path);
        if !self.client.is_file(&absolute).await? {
            return Err(StorageError::InvalidFile(path.to_string()));
        }
        Ok(absolute)
    }

    /// Iterate this directory's contents, subdirectories included unless
    /// walking recursively
    pub async fn traverse(
        &mut self,
        recursively: bool,
        show_abs_path: bool,
    ) -> StorageResult<std::vec::IntoIter<String>> {
        let paths = self
            .client
            .traverse_dir(&self.path, recursively, true, show_abs_path)
            .await?;
        Ok(paths.into_iter())
    }

    /// Same as [`Directory::traverse`], collected
    pub async fn get_contents(
        &mut self,
        recursively: bool,
        show_abs_path: bool,
    ) -> StorageResult<Vec<String>> {
        Ok(self.traverse(recursively, show_abs_path).await?.collect())
    }

    /// Number of entries [`Directory::traverse`] yields
    pub async fn count(&mut self, recursively: bool) -> StorageResult<usize> {
        Ok(self.traverse(recursively, true).await?.count())
    }

    /// Total size in bytes of the files in this directory
    pub async fn size(&mut self, recursively: bool) -> StorageResult<u64> {
        let files = self
            .client
            .traverse_dir(&self.path, recursively, false, true)
            .await?;

        let mut total = 0;
        for file in &files {
            total += self.client.get_size(file).await?;
        }
        Ok(total)
    }

    /// Shared metadata handle for a file, seeded from the backend the
    /// first time it is requested
    pub async fn metadata_handle(&mut self, path: &str) -> StorageResult<MetadataHandle> {
        let absolute = self.require_file(path).await?;
        self.handle_for(&absolute).await
    }

    /// Handle for a path already known to be a file
    async fn handle_for(&mut self, absolute: &str) -> StorageResult<MetadataHandle> {
        let relative = self.to_relative(absolute).to_string();

        if let Some(handle) = self.metadata.get(&relative) {
            return Ok(Arc::clone(handle));
        }

        let stored = self.client.get_metadata(absolute).await?;
        let handle = Arc::new(RwLock::new(stored));
        self.metadata.insert(relative, Arc::clone(&handle));
        Ok(handle)
    }

    /// Load the stored metadata of every file in this directory,
    /// overwriting anything set through [`Directory::set_metadata`]
    pub async fn load_metadata(&mut self, recursively: bool) -> StorageResult<()> {
        let files = self
            .client
            .traverse_dir(&self.path, recursively, false, true)
            .await?;

        for absolute in &files {
            let stored = self.client.get_metadata(absolute).await?;
            let relative = self.to_relative(absolute).to_string();
            match self.metadata.get(&relative) {
                Some(handle) => replace_metadata(&mut *handle.write().await, &stored),
                None => {
                    self.metadata.insert(relative, Arc::new(RwLock::new(stored)));
                }
            }
        }

        debug!(dir = %self.path, files = files.len(), recursively, "Loaded file metadata");
        Ok(())
    }

    /// A copy of a file's metadata
    pub async fn get_metadata(&mut self, path: &str) -> StorageResult<Metadata> {
        let handle = self.metadata_handle(path).await?;
        let metadata = handle.read().await.clone();
        Ok(metadata)
    }

    /// Replace a file's metadata. The path must point to an existing file.
    pub async fn set_metadata(&mut self, path: &str, metadata: &Metadata) -> StorageResult<()> {
        let handle = self.metadata_handle(path).await?;
        replace_metadata(&mut *handle.write().await, metadata);
        Ok(())
    }

    /// A file in this directory
    pub async fn get_file(&mut self, path: &str) -> StorageResult<File> {
        let absolute = self.require_file(path).await?;
        self.file_for(absolute).await
    }

    async fn file_for(&mut self, absolute: String) -> StorageResult<File> {
        let handle = self.handle_for(&absolute).await?;
        let name = absolute
            .rsplit(self.separator())
            .next()
            .unwrap_or_default()
            .to_string();
        let uri = self.client.backend().uri(&absolute);
        Ok(File::new(absolute, name, uri, handle))
    }

    /// The files in this directory as [`File`] handles, in path order
    pub async fn traverse_files(
        &mut self,
        recursively: bool,
    ) -> StorageResult<std::vec::IntoIter<File>> {
        let paths = self
            .client
            .traverse_dir(&self.path, recursively, false, true)
            .await?;

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(self.file_for(path).await?);
        }
        Ok(files.into_iter())
    }

    /// The files in this directory keyed by their absolute or relative path
    pub async fn get_files(
        &mut self,
        recursively: bool,
        show_abs_path: bool,
    ) -> StorageResult<BTreeMap<String, File>> {
        let mut files = BTreeMap::new();
        for file in self.traverse_files(recursively).await? {
            let key = if show_abs_path {
                file.path().to_string()
            } else {
                self.to_relative(file.path()).to_string()
            };
            files.insert(key, file);
        }
        Ok(files)
    }

    /// Write a file under this directory along with any metadata the
    /// facade holds for it
    pub async fn write_file(&mut self, path: &str, data: &[u8]) -> StorageResult<()> {
        let absolute = self.to_absolute(path);
        let relative = self.to_relative(&absolute).to_string();

        let metadata = match self.metadata.get(&relative) {
            Some(handle) => Some(handle.read().await.clone()),
            None => None,
        };
        self.client.write(&absolute, data, metadata.as_ref()).await
    }

    /// Drop the client's cached state; metadata handles are kept
    pub fn purge(&mut self) {
        self.client.purge();
    }
}
