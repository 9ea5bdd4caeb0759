//! engine::lock
//!
//! Optimistic per-node locking on the Preview tier.
//!
//! # Rules
//!
//! A user may write a node when:
//!
//! - neither the node nor any ancestor is explicitly locked by someone else
//! - no descendant is explicitly locked by someone else (only for writes to
//!   the node itself; adding a child does not look down)
//! - the caller's expected version stamp matches, unless the caller already
//!   owns the node (explicitly or through an ancestor)
//!
//! An explicit lock on a node implicitly locks its whole subtree for other
//! users. When the caller already holds an ancestor, acquisition succeeds
//! without placing a lock of its own: the node is *covered*.
//!
//! Kinds that cannot carry a lock (see [`crate::core::types::Capabilities`])
//! are locked through their nearest lockable ancestor.
//!
//! Ancestor and descendant lookups go through the tree's lock index, so the
//! cost is proportional to tree depth and number of locks, not subtree size.

use serde::{Deserialize, Serialize};

use super::errors::StagingError;
use super::journal::{Journal, StepKind};
use crate::core::tree::Tree;
use crate::core::types::{Lock, NodeId, RelPath, UserId, VersionStamp};

/// Result of a successful acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// An explicit lock was placed or refreshed on `node`.
    Acquired { node: NodeId, stamp: VersionStamp },
    /// The caller already holds the ancestor `holder`.
    Covered { holder: NodeId },
}

impl LockOutcome {
    /// The node whose lock now protects the request.
    pub fn holder(&self) -> NodeId {
        match self {
            LockOutcome::Acquired { node, .. } => *node,
            LockOutcome::Covered { holder } => *holder,
        }
    }
}

/// Effective lock on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Node carrying the explicit lock.
    pub holder: NodeId,
    /// Path of the holder.
    pub holder_path: RelPath,
    /// Owner of the lock.
    pub owner: UserId,
    /// Stamp recorded with the lock.
    pub version_stamp: VersionStamp,
    /// True when the lock sits on an ancestor.
    pub inherited: bool,
}

/// Lock checks and transitions on one Preview tree.
pub struct LockManager;

impl LockManager {
    /// Node whose lock stands for `id`: `id` itself when its kind is
    /// lockable, else the nearest lockable ancestor.
    pub fn lock_target(tree: &Tree, id: NodeId) -> Result<NodeId, StagingError> {
        let node = tree.node(id)?;
        if node.kind.capabilities().lockable {
            return Ok(id);
        }
        let ancestors = tree.ancestors(id)?;
        ancestors
            .into_iter()
            .rev()
            .find(|a| {
                tree.get(*a)
                    .is_some_and(|n| n.kind.capabilities().lockable && n.parent.is_some())
            })
            .ok_or_else(|| StagingError::ItemNotCorrectLocation(node.path.clone()))
    }

    /// Effective lock on `id`.
    ///
    /// When several nodes on the path are locked the outermost one wins.
    pub fn lock_info(tree: &Tree, id: NodeId) -> Result<Option<LockInfo>, StagingError> {
        let node = tree.node(id)?;
        let holder = tree
            .locked_ancestors(&node.path)
            .into_iter()
            .next()
            .map(|a| (a, true))
            .or_else(|| node.lock.as_ref().map(|_| (id, false)));

        let Some((holder, inherited)) = holder else {
            return Ok(None);
        };
        let holder_node = tree.node(holder)?;
        Ok(holder_node.lock.as_ref().map(|lock| LockInfo {
            holder,
            holder_path: holder_node.path.clone(),
            owner: lock.owner.clone(),
            version_stamp: lock.version_stamp,
            inherited,
        }))
    }

    /// Check if `user` owns `id`, explicitly or through an ancestor.
    pub fn is_owned_by(tree: &Tree, id: NodeId, user: &UserId) -> bool {
        tree.get(id).is_some_and(|node| {
            node.lock.as_ref().is_some_and(|l| l.is_owned_by(user))
                || Self::covered_by(tree, &node.path, user).is_some()
        })
    }

    /// Nearest ancestor of `path` explicitly locked by `user`.
    pub fn covered_by(tree: &Tree, path: &RelPath, user: &UserId) -> Option<NodeId> {
        tree.locked_ancestors(path).into_iter().rev().find(|a| {
            tree.get(*a)
                .and_then(|n| n.lock.as_ref())
                .is_some_and(|l| l.is_owned_by(user))
        })
    }

    /// Fail if `path` or one of its ancestors is locked by someone else.
    pub fn check_writable(tree: &Tree, path: &RelPath, user: &UserId) -> Result<(), StagingError> {
        let own = tree.lookup(path).into_iter();
        for id in tree.locked_ancestors(path).into_iter().chain(own) {
            let Some(node) = tree.get(id) else { continue };
            if let Some(lock) = &node.lock {
                if !lock.is_owned_by(user) {
                    return Err(StagingError::ItemAlreadyLocked {
                        path: node.path.clone(),
                        owner: lock.owner.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Fail unless `user` could lock `id` right now. Returns the lock target.
    ///
    /// Same checks as [`LockManager::acquire`] without taking the lock, for
    /// operations that turn out to be no-ops.
    pub fn check_lockable(tree: &Tree, id: NodeId, user: &UserId) -> Result<NodeId, StagingError> {
        let target = Self::lock_target(tree, id)?;
        let path = &tree.node(target)?.path;
        Self::check_writable(tree, path, user)?;
        Self::check_descendants(tree, path, user)?;
        Ok(target)
    }

    /// Fail if any descendant of `path` is locked by someone else.
    pub fn check_descendants(
        tree: &Tree,
        path: &RelPath,
        user: &UserId,
    ) -> Result<(), StagingError> {
        for id in tree.locked_descendants(path) {
            let Some(node) = tree.get(id) else { continue };
            if let Some(lock) = &node.lock {
                if !lock.is_owned_by(user) {
                    return Err(StagingError::ItemAlreadyLocked {
                        path: node.path.clone(),
                        owner: lock.owner.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Acquire the lock protecting `id` for `user`.
    ///
    /// `expected` is the version stamp the caller last read; `None` skips the
    /// stamp comparison.
    ///
    /// # Errors
    ///
    /// - [`StagingError::ItemAlreadyLocked`] when another user holds the
    ///   node, an ancestor, or a descendant
    /// - [`StagingError::Conflict`] on a stale stamp for a node the caller
    ///   does not already own
    pub fn acquire(
        tree: &mut Tree,
        id: NodeId,
        user: &UserId,
        expected: Option<VersionStamp>,
        journal: &mut Journal,
    ) -> Result<LockOutcome, StagingError> {
        let target = Self::check_lockable(tree, id, user)?;
        let path = tree.node(target)?.path.clone();

        let requested = tree.node(id)?;
        let owned = Self::is_owned_by(tree, target, user);
        if let Some(expected) = expected {
            if !owned && expected != requested.version {
                return Err(StagingError::Conflict {
                    path: requested.path.clone(),
                    expected,
                    actual: requested.version,
                });
            }
        }

        if let Some(holder) = Self::covered_by(tree, &path, user) {
            tracing::trace!(path = %path, user = %user, "lock covered by ancestor");
            return Ok(LockOutcome::Covered { holder });
        }

        let locked_at = tree
            .node(target)?
            .lock
            .as_ref()
            .map(|l| l.locked_at.clone());
        let stamp = tree.bump_version(target)?;
        let mut lock = Lock::new(user.clone(), stamp);
        if let Some(locked_at) = locked_at {
            lock.locked_at = locked_at;
        }
        tree.set_lock(target, Some(lock))?;
        journal.append(StepKind::LockAcquired {
            path: path.clone(),
            owner: user.clone(),
            stamp,
        });
        tracing::debug!(path = %path, user = %user, stamp = %stamp, "lock acquired");
        Ok(LockOutcome::Acquired {
            node: target,
            stamp,
        })
    }

    /// Clear the explicit lock of `id`. Editable state is left alone.
    pub fn release(tree: &mut Tree, id: NodeId, journal: &mut Journal) -> Result<(), StagingError> {
        let node = tree.node(id)?;
        if let Some(lock) = &node.lock {
            journal.append(StepKind::LockReleased {
                path: node.path.clone(),
                owner: lock.owner.clone(),
            });
            tree.set_lock(id, None)?;
        }
        Ok(())
    }
}
