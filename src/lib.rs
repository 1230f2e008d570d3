//! cloudstore - local disk and Backblaze B2 behind one directory facade,
//! with a read-through cache of sizes, metadata and listings.

pub mod b2;
pub mod cache;
pub mod fs;
pub mod path;
pub mod storage;

pub use cache::{CacheManager, Metadata};
pub use fs::{Directory, File};
pub use storage::{Backend, ClientOptions, StorageClient, StorageError, StorageResult, StorageUri};
