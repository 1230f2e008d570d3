//! Path-segment keyed tree behind the cache manager
//!
//! Interior nodes are directories carrying a traversal state; leaves are
//! [`FileEntry`] records. Directory keys keep their trailing separator
//! (`"sub/"`), file keys never contain one (`"x.txt"`), so a file and a
//! directory with the same name never collide.

use std::collections::btree_map::{self, BTreeMap};

use super::entry::FileEntry;

/// How much of a directory's contents the cache has seen
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraversalState {
    /// No listing cached yet
    #[default]
    Unexplored,
    /// Immediate children cached
    ShallowExplored,
    /// Whole subtree cached
    DeepExplored,
}

/// A tree entry: either a file leaf or a directory
#[derive(Clone, Debug)]
pub enum Node {
    File(FileEntry),
    Dir(DirNode),
}

/// A directory and everything cached beneath it
#[derive(Clone, Debug, Default)]
pub struct DirNode {
    state: TraversalState,
    children: BTreeMap<String, Node>,
}

impl DirNode {
    /// Create an unexplored directory with no children
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TraversalState {
        self.state
    }

    /// Move to `state` unless the directory is already further along
    pub fn advance(&mut self, state: TraversalState) {
        if state > self.state {
            self.state = state;
        }
    }

    /// Children keyed by segment, in lexicographic key order
    pub fn children(&self) -> &BTreeMap<String, Node> {
        &self.children
    }

    /// Mark this directory and every directory below it as deep explored
    pub fn mark_deep(&mut self) {
        self.state = TraversalState::DeepExplored;
        for child in self.children.values_mut() {
            if let Node::Dir(dir) = child {
                dir.mark_deep();
            }
        }
    }

    /// Look up a descendant directory by its segments
    pub fn dir(&self, segments: &[&str], sep: &str) -> Option<&DirNode> {
        let mut node = self;
        for segment in segments {
            match node.children.get(&dir_key(segment, sep)) {
                Some(Node::Dir(dir)) => node = dir,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Look up a descendant directory, creating missing ones when `create` is set
    pub fn dir_mut(&mut self, segments: &[&str], sep: &str, create: bool) -> Option<&mut DirNode> {
        let mut node = self;
        for segment in segments {
            let key = dir_key(segment, sep);
            let child = if create {
                Some(
                    node.children
                        .entry(key)
                        .or_insert_with(|| Node::Dir(DirNode::new())),
                )
            } else {
                node.children.get_mut(&key)
            };
            match child {
                Some(Node::Dir(dir)) => node = dir,
                _ => return None,
            }
        }
        Some(node)
    }

    /// Look up a file leaf below this directory
    pub fn file(&self, parents: &[&str], name: &str, sep: &str) -> Option<&FileEntry> {
        match self.dir(parents, sep)?.children.get(name) {
            Some(Node::File(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Look up a file leaf, creating it and its parents when `create` is set
    pub fn file_mut(
        &mut self,
        parents: &[&str],
        name: &str,
        sep: &str,
        create: bool,
    ) -> Option<&mut FileEntry> {
        let dir = self.dir_mut(parents, sep, create)?;
        let child = if create {
            Some(
                dir.children
                    .entry(name.to_string())
                    .or_insert_with(|| Node::File(FileEntry::new())),
            )
        } else {
            dir.children.get_mut(name)
        };
        match child {
            Some(Node::File(entry)) => Some(entry),
            _ => None,
        }
    }

    /// Iterate the contents of this directory.
    ///
    /// `prefix` is prepended to every yielded key and should end with the
    /// separator (or be empty for a root without one).
    pub fn iter(&self, prefix: String, recursive: bool, include_dirs: bool) -> ContentIter<'_> {
        ContentIter {
            stack: vec![(prefix, self.children.iter())],
            recursive,
            include_dirs,
        }
    }

    /// Number of (files, directories) below this directory
    pub fn count(&self) -> (usize, usize) {
        self.children
            .values()
            .fold((0, 0), |(files, dirs), child| match child {
                Node::File(_) => (files + 1, dirs),
                Node::Dir(dir) => {
                    let (sub_files, sub_dirs) = dir.count();
                    (files + sub_files, dirs + sub_dirs + 1)
                }
            })
    }
}

/// Lazy walk over a cached directory.
///
/// Non-recursive walks yield the immediate children, directories only when
/// asked for. Recursive walks go depth-first in key order and yield file
/// leaves only. Clone a fresh iterator to restart it.
#[derive(Clone, Debug)]
pub struct ContentIter<'a> {
    stack: Vec<(String, btree_map::Iter<'a, String, Node>)>,
    recursive: bool,
    include_dirs: bool,
}

impl<'a> Iterator for ContentIter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let (prefix, children) = self.stack.last_mut()?;
            let Some((key, node)) = children.next() else {
                self.stack.pop();
                continue;
            };
            let path = format!("{}{}", prefix, key);

            match node {
                Node::File(_) => return Some(path),
                Node::Dir(dir) => {
                    if self.recursive {
                        self.stack.push((path, dir.children.iter()));
                    } else if self.include_dirs {
                        return Some(path);
                    }
                }
            }
        }
    }
}

fn dir_key(segment: &str, sep: &str) -> String {
    format!("{}{}", segment, sep)
}

/// Split an absolute directory path into its segments.
///
/// The empty path and a bare separator both denote the root.
pub(crate) fn dir_segments<'p>(path: &'p str, sep: &str) -> Vec<&'p str> {
    path.split(sep).filter(|segment| !segment.is_empty()).collect()
}

/// Split an absolute file path into parent segments and the file name.
///
/// Paths ending with the separator name directories and yield `None`.
pub(crate) fn file_segments<'p>(path: &'p str, sep: &str) -> Option<(Vec<&'p str>, &'p str)> {
    let trimmed = path.trim_start_matches(sep);
    if trimmed.is_empty() || trimmed.ends_with(sep) {
        return None;
    }
    match trimmed.rsplit_once(sep) {
        Some((parent, name)) => Some((dir_segments(parent, sep), name)),
        None => Some((Vec::new(), trimmed)),
    }
}
