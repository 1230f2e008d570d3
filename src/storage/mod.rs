//! Storage backends and the read-through client in front of them

pub mod client;
pub mod errors;
pub mod local;
#[cfg(test)]
pub(crate) mod memory;
pub mod object_store;
pub mod uri;

use async_trait::async_trait;

use crate::cache::Metadata;

pub use client::{ClientOptions, StorageClient};
pub use errors::StorageError;
pub use local::LocalBackend;
pub use object_store::B2Backend;
pub use uri::StorageUri;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Remote side of a storage client.
///
/// Implementations talk to one backend (local disk, an object store) and
/// know nothing about caching. Paths are absolute in the backend's own
/// namespace and use [`Backend::separator`]; directory paths end with it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Separator used by this backend's paths
    fn separator(&self) -> &str;

    /// Display URI for a path, used in logs and by the facade
    fn uri(&self, path: &str) -> String;

    /// Establish any connection the backend needs
    async fn open(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Release connections opened by [`Backend::open`]
    async fn close(&mut self) -> StorageResult<()> {
        Ok(())
    }

    async fn path_exists(&self, path: &str) -> StorageResult<bool>;

    async fn is_file(&self, path: &str) -> StorageResult<bool>;

    /// Classify a path returned by [`Backend::list`] without a round trip
    fn is_file_entry(&self, listed_path: &str) -> bool {
        !listed_path.ends_with(self.separator())
    }

    /// Size of a file in bytes
    async fn fetch_size(&self, path: &str) -> StorageResult<u64>;

    /// Metadata stored with a file
    async fn fetch_metadata(&self, path: &str) -> StorageResult<Metadata>;

    /// List a directory as absolute paths.
    ///
    /// Non-recursive listings return the immediate children, directories
    /// suffixed with the separator. Recursive listings return every file
    /// below the directory and may include directory markers. No ordering
    /// is promised.
    async fn list(&self, dir_path: &str, recursively: bool) -> StorageResult<Vec<String>>;

    /// Read a whole file
    async fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Write a whole file, creating parents as needed
    async fn write(&self, path: &str, data: &[u8], metadata: Option<&Metadata>) -> StorageResult<()>;
}
