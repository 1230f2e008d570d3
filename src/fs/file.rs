//! File handle returned by [`Directory::get_file`]

use super::directory::Directory;
use super::{replace_metadata, MetadataHandle};
use crate::cache::Metadata;
use crate::storage::{Backend, StorageResult};

/// A file inside a [`Directory`]
///
/// Holds no connection of its own; size and content go through the
/// directory's client. The metadata handle is shared with the directory.
#[derive(Debug, Clone)]
pub struct File {
    path: String,
    name: String,
    uri: String,
    metadata: MetadataHandle,
}

impl File {
    pub(crate) fn new(path: String, name: String, uri: String, metadata: MetadataHandle) -> Self {
        Self {
            path,
            name,
            uri,
            metadata,
        }
    }

    /// Absolute path
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend URI, e.g. `b2://bucket/photos/a.jpg`
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub async fn get_metadata(&self) -> Metadata {
        self.metadata.read().await.clone()
    }

    pub async fn set_metadata(&self, metadata: &Metadata) {
        replace_metadata(&mut *self.metadata.write().await, metadata);
    }

    pub async fn size<B: Backend>(&self, dir: &mut Directory<B>) -> StorageResult<u64> {
        dir.client_mut().get_size(&self.path).await
    }

    pub async fn read<B: Backend>(&self, dir: &Directory<B>) -> StorageResult<Vec<u8>> {
        dir.client().read(&self.path).await
    }
}
