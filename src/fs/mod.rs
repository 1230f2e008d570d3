//! Directory and file facade over a storage client

pub mod directory;
pub mod file;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::cache::Metadata;

pub use directory::Directory;
pub use file::File;

/// Metadata shared between a directory and the files it hands out
pub type MetadataHandle = Arc<RwLock<Metadata>>;

/// Replace the contents in place, so every holder of the handle sees them
pub(crate) fn replace_metadata(target: &mut Metadata, source: &Metadata) {
    target.clear();
    target.extend(source.iter().map(|(k, v)| (k.clone(), v.clone())));
}
