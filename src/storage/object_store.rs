//! Backblaze B2 backend
//!
//! Paths handed to this backend are absolute (`/photos/cats/a.jpg`); the
//! object key is the path without its leading separator. B2 has no real
//! directories, so a directory exists when some key lives under its prefix.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Backend, StorageError, StorageResult};
use crate::b2::{B2Client, FileInfo};
use crate::cache::Metadata;

const SEPARATOR: &str = "/";

/// Let B2 pick the content type from the file name
const AUTO_CONTENT_TYPE: &str = "b2/x-auto";

pub struct B2Backend {
    key_id: String,
    key: String,
    bucket: String,
    /// Authorized client, present between `open()` and `close()`
    client: Option<B2Client>,
}

impl B2Backend {
    pub fn new(key_id: &str, key: &str, bucket: &str) -> Self {
        Self {
            key_id: key_id.to_string(),
            key: key.to_string(),
            bucket: bucket.to_string(),
            client: None,
        }
    }

    fn client(&self) -> StorageResult<&B2Client> {
        self.client
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.uri("")))
    }

    async fn file_info(&self, path: &str) -> StorageResult<FileInfo> {
        self.client()?
            .get_file_info(object_key(path))
            .await
            .map_err(|e| StorageError::from_b2(path, e))
    }

    /// Info for a live file at `path`; directories and hidden files are
    /// reported as not found
    async fn live_file(&self, path: &str) -> StorageResult<FileInfo> {
        let info = self.file_info(path).await?;
        if info.is_directory() || info.is_hidden() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        Ok(info)
    }
}

/// Object key for an absolute path
fn object_key(path: &str) -> &str {
    path.trim_start_matches(SEPARATOR)
}

/// Listing prefix for a directory path: empty for the bucket root,
/// otherwise the key with a trailing separator
fn dir_prefix(dir_path: &str) -> String {
    let key = object_key(dir_path);
    if key.is_empty() || key.ends_with(SEPARATOR) {
        key.to_string()
    } else {
        format!("{}{}", key, SEPARATOR)
    }
}

#[async_trait]
impl Backend for B2Backend {
    fn separator(&self) -> &str {
        SEPARATOR
    }

    fn uri(&self, path: &str) -> String {
        format!("b2://{}/{}", self.bucket, object_key(path))
    }

    async fn open(&mut self) -> StorageResult<()> {
        let client = B2Client::authorize(&self.key_id, &self.key, &self.bucket)
            .await
            .map_err(|e| StorageError::from_b2(&self.bucket, e))?;
        info!(bucket = %self.bucket, "Connected to B2");
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> StorageResult<()> {
        if self.client.take().is_some() {
            info!(bucket = %self.bucket, "Disconnected from B2");
        }
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> StorageResult<bool> {
        let prefix = dir_prefix(path);
        if prefix.is_empty() {
            return Ok(true);
        }
        if self.is_file(path).await? {
            return Ok(true);
        }
        self.client()?
            .prefix_exists(&prefix)
            .await
            .map_err(|e| StorageError::from_b2(path, e))
    }

    async fn is_file(&self, path: &str) -> StorageResult<bool> {
        if path.ends_with(SEPARATOR) {
            return Ok(false);
        }
        match self.live_file(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn fetch_size(&self, path: &str) -> StorageResult<u64> {
        Ok(self.live_file(path).await?.content_length)
    }

    async fn fetch_metadata(&self, path: &str) -> StorageResult<Metadata> {
        Ok(self.live_file(path).await?.file_info)
    }

    async fn list(&self, dir_path: &str, recursively: bool) -> StorageResult<Vec<String>> {
        let prefix = dir_prefix(dir_path);
        let delimiter = if recursively { None } else { Some(SEPARATOR) };

        let files = self
            .client()?
            .list_file_names((!prefix.is_empty()).then_some(prefix.as_str()), delimiter)
            .await
            .map_err(|e| StorageError::from_b2(dir_path, e))?;

        if files.is_empty() && !prefix.is_empty() {
            return Err(StorageError::NotFound(dir_path.to_string()));
        }

        let listing: Vec<String> = files
            .into_iter()
            .filter(|f| !f.is_hidden() && f.file_name != prefix)
            .map(|f| format!("{}{}", SEPARATOR, f.file_name))
            .collect();

        debug!(dir = %dir_path, recursively, entries = listing.len(), "Listed B2 prefix");
        Ok(listing)
    }

    async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.client()?
            .download_file(object_key(path))
            .await
            .map_err(|e| StorageError::from_b2(path, e))
    }

    async fn write(&self, path: &str, data: &[u8], metadata: Option<&Metadata>) -> StorageResult<()> {
        let key = object_key(path);
        if key.is_empty() || key.ends_with(SEPARATOR) {
            return Err(StorageError::InvalidPath(path.to_string()));
        }

        let empty = Metadata::new();
        self.client()?
            .upload_file(key, data, AUTO_CONTENT_TYPE, metadata.unwrap_or(&empty))
            .await
            .map_err(|e| StorageError::from_b2(path, e))?;
        Ok(())
    }
}
