//! Cached knowledge about a single file

use std::collections::HashMap;

/// User metadata attached to a stored file
pub type Metadata = HashMap<String, String>;

/// Size and metadata of one file, each absent until fetched
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileEntry {
    size: Option<u64>,
    metadata: Option<Metadata>,
}

impl FileEntry {
    /// Create an entry with nothing cached yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached size in bytes, if any
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn set_size(&mut self, size: u64) {
        self.size = Some(size);
    }

    /// Cached metadata, if any.
    ///
    /// Returns a copy; changing it does not touch the cache.
    pub fn metadata(&self) -> Option<Metadata> {
        self.metadata.clone()
    }

    /// Replace the cached metadata with a copy of `metadata`
    pub fn set_metadata(&mut self, metadata: &Metadata) {
        self.metadata = Some(metadata.clone());
    }
}
