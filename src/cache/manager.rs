//! Cache Manager
//!
//! Translates absolute paths into lookups and insertions on the path tree,
//! absorbs listings fetched by a backend, and rebuilds traversal iterators
//! from what has been absorbed.
//!
//! Nothing here performs I/O or locks. Mutations take `&mut self`; a
//! manager belongs to exactly one storage client.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace};

use super::entry::Metadata;
use super::tree::{dir_segments, file_segments, ContentIter, DirNode, TraversalState};
use crate::path::DEFAULT_SEPARATOR;

/// Read-through cache of file sizes, metadata and directory listings
#[derive(Debug)]
pub struct CacheManager {
    /// Separator used by every path handed to this manager
    separator: String,
    /// Implicit root of the backend's namespace
    root: DirNode,
    /// Cache hit counter
    hits: AtomicU64,
    /// Cache miss counter
    misses: AtomicU64,
}

impl CacheManager {
    /// Create an empty cache for `/`-separated paths
    pub fn new() -> Self {
        Self::with_separator(DEFAULT_SEPARATOR)
    }

    /// Create an empty cache for paths using `separator`
    pub fn with_separator(separator: &str) -> Self {
        Self {
            separator: separator.to_string(),
            root: DirNode::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Get a file's cached size
    pub fn get_size(&self, path: &str) -> Option<u64> {
        let size = self.entry_size(path);
        self.record(size.is_some(), "size", path);
        size
    }

    /// Cache a file's size, creating its entry if needed
    pub fn cache_size(&mut self, path: &str, size: u64) {
        let sep = self.separator.as_str();
        let Some((parents, name)) = file_segments(path, sep) else {
            debug!(path = %path, "Not a file path, size not cached");
            return;
        };
        if let Some(entry) = self.root.file_mut(&parents, name, sep, true) {
            entry.set_size(size);
            debug!(path = %path, size = size, "Cached file size");
        }
    }

    /// Get a copy of a file's cached metadata
    pub fn get_metadata(&self, path: &str) -> Option<Metadata> {
        let metadata = self.entry_metadata(path);
        self.record(metadata.is_some(), "metadata", path);
        metadata
    }

    /// Cache a copy of a file's metadata, creating its entry if needed
    pub fn cache_metadata(&mut self, path: &str, metadata: &Metadata) {
        let sep = self.separator.as_str();
        let Some((parents, name)) = file_segments(path, sep) else {
            debug!(path = %path, "Not a file path, metadata not cached");
            return;
        };
        if let Some(entry) = self.root.file_mut(&parents, name, sep, true) {
            entry.set_metadata(metadata);
            debug!(path = %path, keys = metadata.len(), "Cached file metadata");
        }
    }

    /// Traversal state of a directory; unknown directories are unexplored
    pub fn state(&self, dir_path: &str) -> TraversalState {
        self.root
            .dir(&dir_segments(dir_path, &self.separator), &self.separator)
            .map(DirNode::state)
            .unwrap_or_default()
    }

    /// Iterate a directory's cached contents.
    ///
    /// Returns `None` when the cache cannot answer: the directory is
    /// unexplored, or only its top level is known and a recursive walk was
    /// requested. Yielded paths are `dir_path` joined with each entry.
    pub fn get_content_iterator(
        &self,
        dir_path: &str,
        recursively: bool,
        include_dirs: bool,
    ) -> Option<ContentIter<'_>> {
        let contents = self.contents(dir_path, recursively, include_dirs);
        self.record(contents.is_some(), "listing", dir_path);
        contents
    }

    /// Same as [`CacheManager::get_content_iterator`] but leaves the
    /// hit/miss counters alone. Used to read back a listing right after
    /// absorbing it.
    pub fn contents(
        &self,
        dir_path: &str,
        recursively: bool,
        include_dirs: bool,
    ) -> Option<ContentIter<'_>> {
        let sep = self.separator.as_str();
        self.root
            .dir(&dir_segments(dir_path, sep), sep)
            .filter(|dir| match dir.state() {
                TraversalState::DeepExplored => true,
                TraversalState::ShallowExplored => !recursively,
                TraversalState::Unexplored => false,
            })
            .map(|dir| dir.iter(self.dir_prefix(dir_path), recursively, include_dirs))
    }

    /// Absorb a listing fetched for `dir_path`.
    ///
    /// The listing holds absolute paths. It is sorted before insertion so
    /// that every backend ends up with the same canonical order.
    /// `is_file` tells files from directories. An empty listing still
    /// counts as a traversal.
    ///
    /// After a recursive listing the directory and every directory below it
    /// are deep explored, including directories that hold no files at any
    /// depth and so never appear as a prefix in the listing.
    pub fn cache_contents<I, F>(&mut self, dir_path: &str, listing: I, recursively: bool, is_file: F)
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: Fn(&str) -> bool,
    {
        let mut paths: Vec<String> = listing.into_iter().map(Into::into).collect();
        paths.sort();

        let sep = self.separator.as_str();
        for path in &paths {
            if is_file(path) {
                if let Some((parents, name)) = file_segments(path, sep) {
                    self.root.file_mut(&parents, name, sep, true);
                }
            } else {
                self.root.dir_mut(&dir_segments(path, sep), sep, true);
            }
        }

        let Some(dir) = self.root.dir_mut(&dir_segments(dir_path, sep), sep, true) else {
            return;
        };
        if recursively {
            dir.mark_deep();
        } else {
            dir.advance(TraversalState::ShallowExplored);
        }

        debug!(
            dir = %dir_path,
            entries = paths.len(),
            recursively = recursively,
            state = ?dir.state(),
            "Cached directory listing"
        );
    }

    /// Drop everything, leaving a single unexplored root
    pub fn purge(&mut self) {
        self.root = DirNode::new();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!("Purged path cache");
    }

    /// Get cache statistics
    ///
    /// Returns (hits, misses, hit_rate)
    pub fn stats(&self) -> (u64, u64, f64) {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        (hits, misses, hit_rate)
    }

    /// Log current cache metrics
    pub fn log_metrics(&self) {
        let (hits, misses, hit_rate) = self.stats();
        let (files, dirs) = self.root.count();

        debug!(
            hits = hits,
            misses = misses,
            hit_rate = format!("{:.1}%", hit_rate),
            file_entries = files,
            dir_entries = dirs,
            "Cache metrics"
        );
    }

    fn entry_size(&self, path: &str) -> Option<u64> {
        let (parents, name) = file_segments(path, &self.separator)?;
        self.root.file(&parents, name, &self.separator)?.size()
    }

    fn entry_metadata(&self, path: &str) -> Option<Metadata> {
        let (parents, name) = file_segments(path, &self.separator)?;
        self.root.file(&parents, name, &self.separator)?.metadata()
    }

    fn dir_prefix(&self, dir_path: &str) -> String {
        if dir_path.is_empty() || dir_path.ends_with(self.separator.as_str()) {
            dir_path.to_string()
        } else {
            format!("{}{}", dir_path, self.separator)
        }
    }

    fn record(&self, hit: bool, kind: &str, path: &str) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(path = %path, kind = kind, "Cache HIT");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(path = %path, kind = kind, "Cache MISS");
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_file(path: &str) -> bool {
        !path.ends_with('/')
    }

    fn listing(cache: &CacheManager, dir: &str, recursively: bool, include_dirs: bool) -> Option<Vec<String>> {
        cache
            .get_content_iterator(dir, recursively, include_dirs)
            .map(|iter| iter.collect())
    }

    fn metadata(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_size_round_trip() {
        let mut cache = CacheManager::new();
        assert_eq!(cache.get_size("/data/x.txt"), None);

        cache.cache_size("/data/x.txt", 42);
        assert_eq!(cache.get_size("/data/x.txt"), Some(42));
        assert_eq!(cache.get_size("/data/y.txt"), None);

        let (hits, misses, _) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 2);
    }

    #[test]
    fn test_metadata_round_trip_returns_copy() {
        let mut cache = CacheManager::new();
        cache.cache_metadata("/data/x.txt", &metadata(&[("owner", "alice")]));

        let mut fetched = cache.get_metadata("/data/x.txt").unwrap();
        fetched.insert("owner".to_string(), "mallory".to_string());

        assert_eq!(
            cache.get_metadata("/data/x.txt"),
            Some(metadata(&[("owner", "alice")]))
        );
    }

    #[test]
    fn test_size_and_metadata_share_entry() {
        let mut cache = CacheManager::new();
        cache.cache_size("/x.txt", 1);
        assert_eq!(cache.get_metadata("/x.txt"), None);
        cache.cache_metadata("/x.txt", &Metadata::new());
        assert_eq!(cache.get_size("/x.txt"), Some(1));
        assert_eq!(cache.get_metadata("/x.txt"), Some(Metadata::new()));
    }

    #[test]
    fn test_leading_separator_is_optional() {
        let mut cache = CacheManager::new();
        cache.cache_size("data/x.txt", 5);
        assert_eq!(cache.get_size("/data/x.txt"), Some(5));
    }

    #[test]
    fn test_directory_path_is_not_a_file() {
        let mut cache = CacheManager::new();
        cache.cache_size("/data/", 5);
        assert_eq!(cache.get_size("/data/"), None);
        assert_eq!(cache.state("/data/"), TraversalState::Unexplored);
    }

    #[test]
    fn test_miss_on_unexplored_directory() {
        let mut cache = CacheManager::new();
        assert!(listing(&cache, "/d/", false, true).is_none());
        assert!(listing(&cache, "/d/", true, false).is_none());

        // Creating entries below a directory does not explore it.
        cache.cache_size("/d/x.txt", 1);
        assert!(listing(&cache, "/d/", false, true).is_none());
        assert!(listing(&cache, "/d/", true, false).is_none());
    }

    #[test]
    fn test_lexicographic_ordering() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/b.txt", "/d/a.txt", "/d/c/"], false, is_file);

        assert_eq!(
            listing(&cache, "/d/", false, true).unwrap(),
            vec!["/d/a.txt", "/d/b.txt", "/d/c/"]
        );
        assert_eq!(
            listing(&cache, "/d/", false, false).unwrap(),
            vec!["/d/a.txt", "/d/b.txt"]
        );
    }

    #[test]
    fn test_shallow_listing_does_not_serve_recursive() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/a.txt", "/d/c/"], false, is_file);

        assert_eq!(cache.state("/d/"), TraversalState::ShallowExplored);
        assert_eq!(cache.state("/d/c/"), TraversalState::Unexplored);
        assert!(listing(&cache, "/d/", true, false).is_none());
        assert!(listing(&cache, "/d/c/", false, true).is_none());
    }

    #[test]
    fn test_idempotent_absorption() {
        let mut cache = CacheManager::new();
        let files = ["/d/b.txt", "/d/a.txt", "/d/c/"];
        cache.cache_contents("/d/", files, false, is_file);
        cache.cache_size("/d/a.txt", 9);
        let before = listing(&cache, "/d/", false, true);

        cache.cache_contents("/d/", files, false, is_file);
        assert_eq!(listing(&cache, "/d/", false, true), before);
        assert_eq!(cache.get_size("/d/a.txt"), Some(9));
        assert_eq!(cache.state("/d/"), TraversalState::ShallowExplored);
    }

    #[test]
    fn test_shallow_then_deep() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/a.txt", "/d/sub/"], false, is_file);
        let shallow = listing(&cache, "/d/", false, true).unwrap();

        cache.cache_contents("/d/", ["/d/a.txt", "/d/sub/b.txt"], true, is_file);

        assert_eq!(cache.state("/d/"), TraversalState::DeepExplored);
        assert_eq!(listing(&cache, "/d/", false, true).unwrap(), shallow);
        assert_eq!(
            listing(&cache, "/d/", true, false).unwrap(),
            vec!["/d/a.txt", "/d/sub/b.txt"]
        );
    }

    #[test]
    fn test_deep_state_survives_shallow_absorption() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/a.txt"], true, is_file);
        cache.cache_contents("/d/", ["/d/a.txt"], false, is_file);
        assert_eq!(cache.state("/d/"), TraversalState::DeepExplored);
    }

    #[test]
    fn test_non_recursive_excludes_nested_files() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/a.txt", "/d/sub/b.txt"], true, is_file);

        assert_eq!(listing(&cache, "/d/", false, false).unwrap(), vec!["/d/a.txt"]);
        assert_eq!(
            listing(&cache, "/d/", false, true).unwrap(),
            vec!["/d/a.txt", "/d/sub/"]
        );
    }

    #[test]
    fn test_recursive_scenario_order() {
        let mut cache = CacheManager::new();
        cache.cache_contents(
            "/data/",
            ["/data/x.txt", "/data/sub/z.txt", "/data/sub/y.txt"],
            true,
            is_file,
        );

        assert_eq!(cache.state("/data/"), TraversalState::DeepExplored);
        assert_eq!(cache.state("/data/sub/"), TraversalState::DeepExplored);
        assert_eq!(cache.state("/"), TraversalState::Unexplored);
        assert_eq!(
            listing(&cache, "/data/", true, false).unwrap(),
            vec!["/data/sub/y.txt", "/data/sub/z.txt", "/data/x.txt"]
        );
        assert_eq!(
            listing(&cache, "/data/sub/", false, false).unwrap(),
            vec!["/data/sub/y.txt", "/data/sub/z.txt"]
        );
    }

    #[test]
    fn test_recursive_marks_directories_without_files() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/outer/"], false, is_file);
        cache.cache_contents("/d/outer/", ["/d/outer/inner/"], false, is_file);

        cache.cache_contents("/d/", ["/d/a.txt"], true, is_file);

        assert_eq!(cache.state("/d/outer/"), TraversalState::DeepExplored);
        assert_eq!(cache.state("/d/outer/inner/"), TraversalState::DeepExplored);
        assert_eq!(
            listing(&cache, "/d/outer/inner/", true, false).unwrap(),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_recursive_directory_markers() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", ["/d/empty/", "/d/a.txt"], true, is_file);

        assert_eq!(cache.state("/d/empty/"), TraversalState::DeepExplored);
        assert_eq!(
            listing(&cache, "/d/", false, true).unwrap(),
            vec!["/d/a.txt", "/d/empty/"]
        );
        assert_eq!(listing(&cache, "/d/", true, true).unwrap(), vec!["/d/a.txt"]);
    }

    #[test]
    fn test_empty_listing_is_cached() {
        let mut cache = CacheManager::new();
        cache.cache_contents("/d/", Vec::<String>::new(), false, is_file);
        assert_eq!(listing(&cache, "/d/", false, true).unwrap(), Vec::<String>::new());
        assert!(listing(&cache, "/d/", true, false).is_none());

        cache.cache_contents("/d/", Vec::<String>::new(), true, is_file);
        assert_eq!(listing(&cache, "/d/", true, false).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_root_directory() {
        let mut cache = CacheManager::new();
        cache.cache_contents("", ["b.txt", "a/"], false, is_file);
        assert_eq!(listing(&cache, "", false, true).unwrap(), vec!["a/", "b.txt"]);

        cache.cache_contents("/", ["/c.txt"], false, is_file);
        assert_eq!(
            listing(&cache, "/", false, true).unwrap(),
            vec!["/a/", "/b.txt", "/c.txt"]
        );
    }

    #[test]
    fn test_custom_separator() {
        let mut cache = CacheManager::with_separator(">");
        cache.cache_contents(
            ">d>",
            [">d>b", ">d>a>x"],
            true,
            |path: &str| !path.ends_with('>'),
        );
        assert_eq!(
            listing(&cache, ">d>", true, false).unwrap(),
            vec![">d>a>x", ">d>b"]
        );
        assert_eq!(listing(&cache, ">d", false, true).unwrap(), vec![">d>a>", ">d>b"]);
    }

    #[test]
    fn test_purge_resets_everything() {
        let mut cache = CacheManager::new();
        cache.cache_size("/d/a.txt", 1);
        cache.cache_metadata("/d/a.txt", &metadata(&[("k", "v")]));
        cache.cache_contents("/d/", ["/d/a.txt", "/d/sub/b.txt"], true, is_file);
        cache.cache_contents("/e/", ["/e/c.txt"], false, is_file);

        cache.purge();

        assert_eq!(cache.get_size("/d/a.txt"), None);
        assert_eq!(cache.get_metadata("/d/a.txt"), None);
        assert!(listing(&cache, "/d/", true, false).is_none());
        assert!(listing(&cache, "/d/", false, true).is_none());
        assert!(listing(&cache, "/e/", false, true).is_none());
        assert_eq!(cache.state("/d/sub/"), TraversalState::Unexplored);
    }

    #[test]
    fn test_contents_does_not_touch_stats() {
        let mut cache = CacheManager::new();
        assert!(listing(&cache, "/d/", false, true).is_none());
        cache.cache_contents("/d/", ["/d/a.txt"], false, is_file);

        let contents: Vec<String> = cache.contents("/d/", false, true).unwrap().collect();
        assert_eq!(contents, vec!["/d/a.txt"]);
        assert!(cache.contents("/d/", true, false).is_none());
        assert_eq!(cache.stats(), (0, 1, 0.0));

        assert!(listing(&cache, "/d/", false, true).is_some());
        assert_eq!(cache.stats(), (1, 1, 50.0));
    }
}
