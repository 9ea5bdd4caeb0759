//! core::index
//!
//! Sorted path table for ancestor/descendant queries.
//!
//! # Architecture
//!
//! [`RelPath`] orders segment-wise, so every descendant of `p` sorts in one
//! contiguous run directly after `p`. That makes:
//!
//! - exact lookup: O(log n)
//! - ancestor lookup: O(depth · log n), one probe per proper prefix
//! - "any descendant?" and descendant listing: one range scan starting at `p`
//!
//! The tree keeps two of these: one over every node, one over explicitly
//! locked nodes only. Lock checks consult the second, so their cost depends
//! on the number of locks rather than the size of the subtree.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::types::{NodeId, RelPath};

/// Map from path to node id with prefix range queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: BTreeMap<RelPath, NodeId>,
}

impl PathIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, path: RelPath, id: NodeId) -> Option<NodeId> {
        self.entries.insert(path, id)
    }

    /// Remove one entry.
    pub fn remove(&mut self, path: &RelPath) -> Option<NodeId> {
        self.entries.remove(path)
    }

    /// Exact lookup.
    pub fn get(&self, path: &RelPath) -> Option<NodeId> {
        self.entries.get(path).copied()
    }

    /// Check if a path is indexed.
    pub fn contains(&self, path: &RelPath) -> bool {
        self.entries.contains_key(path)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexed proper ancestors of `path`, closest to the root first.
    pub fn ancestors(&self, path: &RelPath) -> Vec<(RelPath, NodeId)> {
        path.ancestors()
            .filter_map(|p| self.get(&p).map(|id| (p, id)))
            .collect()
    }

    /// Indexed proper descendants of `path`, in path order.
    pub fn descendants<'a>(
        &'a self,
        path: &'a RelPath,
    ) -> impl Iterator<Item = (&'a RelPath, NodeId)> + 'a {
        self.entries
            .range((Bound::Excluded(path), Bound::Unbounded))
            .take_while(move |(p, _)| path.is_ancestor_of(p))
            .map(|(p, id)| (p, *id))
    }

    /// Check if any proper descendant of `path` is indexed.
    pub fn has_descendant(&self, path: &RelPath) -> bool {
        self.descendants(path).next().is_some()
    }

    /// Remove `path` and all its descendants, returning what was removed.
    pub fn remove_subtree(&mut self, path: &RelPath) -> Vec<(RelPath, NodeId)> {
        let keys: Vec<RelPath> = self
            .entries
            .range(path..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect();
        keys.into_iter()
            .filter_map(|k| self.entries.remove(&k).map(|id| (k, id)))
            .collect()
    }

    /// Re-key `from` and all its descendants under `to`.
    pub fn rebase(&mut self, from: &RelPath, to: &RelPath) {
        for (path, id) in self.remove_subtree(from) {
            if let Some(rest) = path.strip_prefix(from) {
                self.entries.insert(to.join_path(&rest), id);
            }
        }
    }

    /// Iterate all entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&RelPath, NodeId)> {
        self.entries.iter().map(|(p, id)| (p, *id))
    }
}
