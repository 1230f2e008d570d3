//! Path cache
//!
//! In-memory, path-keyed cache of file sizes, file metadata and directory
//! listings. It lives as long as the storage client that owns it; there
//! is no eviction and no expiry, only an explicit purge.

pub mod entry;
pub mod manager;
pub mod tree;

pub use entry::{FileEntry, Metadata};
pub use manager::CacheManager;
pub use tree::{ContentIter, TraversalState};
