//! Read-through storage client
//!
//! Wraps a [`Backend`] and, unless caching is switched off, answers size,
//! metadata and listing requests from a [`CacheManager`] first. Misses go
//! to the backend and are stored before returning. Listings are always
//! re-read from the cache after absorbing a fresh backend listing, so a
//! fresh answer and a cached answer are identical.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Backend, StorageResult};
use crate::cache::{CacheManager, Metadata};
use crate::path::relativize;

/// Per-client settings
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClientOptions {
    /// Cache sizes, metadata and listings fetched from the backend
    pub cache: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self { cache: true }
    }
}

impl ClientOptions {
    /// Options with caching switched off
    pub fn uncached() -> Self {
        Self { cache: false }
    }
}

/// A backend plus its optional path cache
pub struct StorageClient<B: Backend> {
    backend: B,
    /// `None` when caching is disabled
    cache: Option<CacheManager>,
    /// Whether `open()` succeeded without a matching `close()`
    open: bool,
}

impl<B: Backend> StorageClient<B> {
    /// Create a client; call [`StorageClient::open`] before use
    pub fn new(backend: B, options: ClientOptions) -> Self {
        let cache = options
            .cache
            .then(|| CacheManager::with_separator(backend.separator()));

        Self {
            backend,
            cache,
            open: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn separator(&self) -> &str {
        self.backend.separator()
    }

    /// Whether this client caches what it fetches
    pub fn is_cacheable(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cache(&self) -> Option<&CacheManager> {
        self.cache.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Open the backend's connections. Opening twice is a no-op.
    pub async fn open(&mut self) -> StorageResult<()> {
        if self.open {
            return Ok(());
        }
        self.backend.open().await?;
        self.open = true;
        info!(uri = %self.backend.uri(""), cached = self.is_cacheable(), "Storage client opened");
        Ok(())
    }

    /// Close the backend's connections. Closing twice is a no-op.
    pub async fn close(&mut self) -> StorageResult<()> {
        if !self.open {
            return Ok(());
        }
        self.backend.close().await?;
        self.open = false;
        if let Some(cache) = &self.cache {
            cache.log_metrics();
        }
        info!(uri = %self.backend.uri(""), "Storage client closed");
        Ok(())
    }

    /// Forget everything cached so far
    pub fn purge(&mut self) {
        if let Some(cache) = self.cache.as_mut() {
            cache.purge();
        }
    }

    /// Size of a file in bytes
    pub async fn get_size(&mut self, path: &str) -> StorageResult<u64> {
        if let Some(size) = self.cache.as_ref().and_then(|cache| cache.get_size(path)) {
            return Ok(size);
        }

        let size = self.backend.fetch_size(path).await?;
        if let Some(cache) = self.cache.as_mut() {
            cache.cache_size(path, size);
        }
        Ok(size)
    }

    /// Metadata stored with a file
    pub async fn get_metadata(&mut self, path: &str) -> StorageResult<Metadata> {
        if let Some(metadata) = self.cache.as_ref().and_then(|cache| cache.get_metadata(path)) {
            return Ok(metadata);
        }

        let metadata = self.backend.fetch_metadata(path).await?;
        if let Some(cache) = self.cache.as_mut() {
            cache.cache_metadata(path, &metadata);
        }
        Ok(metadata)
    }

    /// List a directory.
    ///
    /// Recursive listings contain files only. Non-recursive listings
    /// contain the immediate children, directories included when
    /// `include_dirs` is set. Paths come back in lexicographic order,
    /// absolute or relative to `dir_path` depending on `show_abs_path`.
    pub async fn traverse_dir(
        &mut self,
        dir_path: &str,
        recursively: bool,
        include_dirs: bool,
        show_abs_path: bool,
    ) -> StorageResult<Vec<String>> {
        let backend = &self.backend;

        let paths: Vec<String> = match self.cache.as_mut() {
            Some(cache) => {
                let hit: Option<Vec<String>> = cache
                    .get_content_iterator(dir_path, recursively, include_dirs)
                    .map(Iterator::collect);
                match hit {
                    Some(paths) => paths,
                    None => {
                        let listing = backend.list(dir_path, recursively).await?;
                        debug!(dir = %dir_path, entries = listing.len(), "Fetched listing from backend");
                        cache.cache_contents(dir_path, listing, recursively, |path| {
                            backend.is_file_entry(path)
                        });
                        cache
                            .contents(dir_path, recursively, include_dirs)
                            .map(Iterator::collect)
                            .unwrap_or_default()
                    }
                }
            }
            None => {
                let mut listing: Vec<String> = backend
                    .list(dir_path, recursively)
                    .await?
                    .into_iter()
                    .filter(|path| {
                        backend.is_file_entry(path) || (include_dirs && !recursively)
                    })
                    .collect();
                listing.sort();
                listing
            }
        };

        if show_abs_path {
            return Ok(paths);
        }

        let sep = backend.separator();
        Ok(paths
            .iter()
            .map(|path| relativize(dir_path, path, sep))
            .collect())
    }

    pub async fn path_exists(&self, path: &str) -> StorageResult<bool> {
        self.backend.path_exists(path).await
    }

    pub async fn is_file(&self, path: &str) -> StorageResult<bool> {
        self.backend.is_file(path).await
    }

    /// Read a whole file
    pub async fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.backend.read(path).await
    }

    /// Write a whole file and record its size (and metadata, if given)
    pub async fn write(
        &mut self,
        path: &str,
        data: &[u8],
        metadata: Option<&Metadata>,
    ) -> StorageResult<()> {
        self.backend.write(path, data, metadata).await?;

        if let Some(cache) = self.cache.as_mut() {
            cache.cache_size(path, data.len() as u64);
            if let Some(metadata) = metadata {
                cache.cache_metadata(path, metadata);
            }
        }
        Ok(())
    }
}

impl<B: Backend> Drop for StorageClient<B> {
    fn drop(&mut self) {
        if self.open {
            warn!(
                uri = %self.backend.uri(""),
                "Storage client dropped while open, call close() to release its connections"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;
    use crate::storage::memory::MemoryBackend;

    /// Counts WARN events
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    const FILES: [&str; 5] = [
        "/data/a.csv",
        "/data/b.csv",
        "/data/sub/c.csv",
        "/data/sub/deeper/d.csv",
        "/data/other/e.csv",
    ];

    fn client(options: ClientOptions) -> StorageClient<MemoryBackend> {
        StorageClient::new(MemoryBackend::with_files(&FILES), options)
    }

    #[tokio::test]
    async fn test_listing_is_served_from_cache() {
        let mut client = client(ClientOptions::default());

        let first = client.traverse_dir("/data", false, true, false).await.unwrap();
        let second = client.traverse_dir("/data", false, true, false).await.unwrap();

        assert_eq!(first, vec!["a.csv", "b.csv", "other/", "sub/"]);
        assert_eq!(first, second);
        assert_eq!(client.backend().lists(), 1);
    }

    #[tokio::test]
    async fn test_shallow_cache_does_not_answer_recursive_walks() {
        let mut client = client(ClientOptions::default());

        client.traverse_dir("/data", false, false, true).await.unwrap();
        let files = client.traverse_dir("/data", true, false, true).await.unwrap();
        assert_eq!(client.backend().lists(), 2);
        assert_eq!(
            files,
            vec![
                "/data/a.csv",
                "/data/b.csv",
                "/data/other/e.csv",
                "/data/sub/c.csv",
                "/data/sub/deeper/d.csv",
            ]
        );

        // Everything below a deep listing is answerable
        client.traverse_dir("/data", false, true, true).await.unwrap();
        let sub = client.traverse_dir("/data/sub", true, false, false).await.unwrap();
        let deeper = client.traverse_dir("/data/sub/deeper/", false, true, false).await.unwrap();
        assert_eq!(sub, vec!["c.csv", "deeper/d.csv"]);
        assert_eq!(deeper, vec!["d.csv"]);
        assert_eq!(client.backend().lists(), 2);
    }

    #[tokio::test]
    async fn test_cached_and_uncached_listings_agree() {
        let mut cached = client(ClientOptions::default());
        let mut uncached = client(ClientOptions::uncached());
        assert!(!uncached.is_cacheable());

        for dir in ["/data", "/data/sub/", "/"] {
            for recursively in [false, true] {
                for include_dirs in [false, true] {
                    for show_abs_path in [false, true] {
                        let expected = uncached
                            .traverse_dir(dir, recursively, include_dirs, show_abs_path)
                            .await
                            .unwrap();
                        let actual = cached
                            .traverse_dir(dir, recursively, include_dirs, show_abs_path)
                            .await
                            .unwrap();
                        assert_eq!(actual, expected, "{} r={} d={}", dir, recursively, include_dirs);
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_uncached_client_always_hits_backend() {
        let mut client = client(ClientOptions::uncached());

        client.traverse_dir("/data", false, true, false).await.unwrap();
        client.traverse_dir("/data", false, true, false).await.unwrap();
        client.get_size("/data/a.csv").await.unwrap();
        client.get_size("/data/a.csv").await.unwrap();

        assert_eq!(client.backend().lists(), 2);
        assert_eq!(client.backend().sizes.load(Ordering::SeqCst), 2);
        assert!(client.cache().is_none());
    }

    #[tokio::test]
    async fn test_size_and_metadata_are_cached() {
        let mut backend = MemoryBackend::with_files(&FILES);
        let stored = Metadata::from([("owner".to_string(), "alice".to_string())]);
        backend.metadata.insert("/data/a.csv".to_string(), stored.clone());
        let mut client = StorageClient::new(backend, ClientOptions::default());

        assert_eq!(client.get_size("/data/a.csv").await.unwrap(), 11);
        assert_eq!(client.get_size("/data/a.csv").await.unwrap(), 11);
        assert_eq!(client.get_metadata("/data/a.csv").await.unwrap(), stored);
        assert_eq!(client.get_metadata("/data/a.csv").await.unwrap(), stored);

        assert_eq!(client.backend().sizes.load(Ordering::SeqCst), 1);
        assert_eq!(client.backend().metadata_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_records_size_and_metadata() {
        let mut client = client(ClientOptions::default());
        let metadata = Metadata::from([("k".to_string(), "v".to_string())]);

        client.write("/data/new.bin", b"123", Some(&metadata)).await.unwrap();

        assert_eq!(client.get_size("/data/new.bin").await.unwrap(), 3);
        assert_eq!(client.get_metadata("/data/new.bin").await.unwrap(), metadata);
        assert_eq!(client.backend().sizes.load(Ordering::SeqCst), 0);
        assert_eq!(client.backend().metadata_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_purge_forces_refetch() {
        let mut client = client(ClientOptions::default());

        client.traverse_dir("/data", true, false, false).await.unwrap();
        client.get_size("/data/a.csv").await.unwrap();
        client.purge();
        client.traverse_dir("/data", true, false, false).await.unwrap();
        client.get_size("/data/a.csv").await.unwrap();

        assert_eq!(client.backend().lists(), 2);
        assert_eq!(client.backend().sizes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_cached() {
        let mut client = client(ClientOptions::default());

        let result = client.traverse_dir("/nowhere", false, true, false).await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(
            client.cache().map(|cache| cache.state("/nowhere")),
            Some(crate::cache::TraversalState::Unexplored)
        );
    }

    #[tokio::test]
    async fn test_open_and_close_are_idempotent() {
        let mut client = client(ClientOptions::default());
        assert!(!client.is_open());

        client.open().await.unwrap();
        client.open().await.unwrap();
        assert!(client.is_open());

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(!client.is_open());
        assert_eq!(client.backend().closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_while_open_warns() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut open = client(ClientOptions::default());
        open.open().await.unwrap();
        drop(open);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        let mut closed = client(ClientOptions::default());
        let closes = Arc::clone(&closed.backend().closes);
        closed.open().await.unwrap();
        closed.close().await.unwrap();
        assert!(!closed.is_open());
        drop(closed);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(warnings.load(Ordering::SeqCst), 1);

        // Never opened
        drop(client(ClientOptions::default()));
        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listing_miss_counts_once() {
        let mut client = client(ClientOptions::default());

        client.traverse_dir("/data", false, true, false).await.unwrap();
        let (hits, misses, _) = client.cache().unwrap().stats();
        assert_eq!((hits, misses), (0, 1));

        client.traverse_dir("/data", false, true, false).await.unwrap();
        let (hits, misses, _) = client.cache().unwrap().stats();
        assert_eq!((hits, misses), (1, 1));
    }

    #[test]
    fn test_options_deserialize() {
        let options: ClientOptions = serde_json::from_str("{}").unwrap();
        assert!(options.cache);
        let options: ClientOptions = serde_json::from_str(r#"{"cache": false}"#).unwrap();
        assert_eq!(options, ClientOptions::uncached());
    }
}
