//! engine::resolver
//!
//! Copy of a subtree into a channel, with its missing dependencies.
//!
//! # Architecture
//!
//! [`DependencyResolver::copy`] runs in three passes over one coordinator:
//!
//! 1. Deep-copy the source subtree under the target parent (name suffixed on
//!    collision). Every copied node becomes `Created` and locked.
//! 2. Denormalize: each copied container with a `shared` reference gets an
//!    inline copy of the shared container's current children from the source
//!    channel, and loses the reference.
//! 3. Resolve references breadth-first. A referenced path missing in the
//!    target Preview but present in the source is copied to the same path,
//!    and its own references are queued. Paths that exist in the target are
//!    left alone; paths missing on both sides are logged and skipped.
//!
//! Only missing nodes are copied, never whole collections.
//!
//! # Invariants
//!
//! - Every node created here is `Created` and owned by the copying user
//! - Failure in any pass leaves nothing behind once the session is discarded

use std::collections::{BTreeSet, VecDeque};

use super::coordinator::StagingCoordinator;
use super::errors::StagingError;
use super::journal::StepKind;
use super::lock::LockManager;
use crate::core::tree::{ConfigNode, Tree};
use crate::core::types::{NodeId, NodeKind, NodeName, RelPath, SHARED_KEY};

/// Cross-channel subtree copy.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Copy the node `src_id` of `source` (a Preview tier, possibly of
    /// another channel) under `target_parent` in the coordinator's channel.
    ///
    /// `target_parent` defaults to the kind's default parent. Returns the id
    /// of the copy's root.
    ///
    /// # Errors
    ///
    /// - [`StagingError::ItemNotInPreview`] if the source node is missing or
    ///   hidden by a delete marker
    /// - [`StagingError::ItemNotCorrectLocation`] if the target parent is not
    ///   in the workspace
    /// - [`StagingError::ItemAlreadyLocked`] if the target parent is held by
    ///   another user
    /// - [`StagingError::ItemExistsOutsideWorkspace`] if the inherited mirror
    ///   of the destination exists
    pub fn copy(
        coord: &mut StagingCoordinator<'_>,
        source: &Tree,
        src_id: NodeId,
        target_parent: Option<NodeId>,
        new_name: &str,
    ) -> Result<NodeId, StagingError> {
        let src = Self::visible_in(source, src_id)?;
        if !src.kind.capabilities().copyable {
            return Err(StagingError::ItemNotCorrectLocation(src.path.clone()));
        }
        let (src_path, src_kind) = (src.path.clone(), src.kind);
        let requested = NodeName::new(new_name)?;

        let parent = coord.resolve_parent(target_parent, src_kind)?;
        let parent_path = coord.preview().node(parent)?.path.clone();
        if !parent_path.is_workspace() {
            return Err(StagingError::ItemNotCorrectLocation(parent_path));
        }
        LockManager::check_writable(coord.preview(), &parent_path, coord.user())?;

        let name = coord.free_name(parent, requested.as_str())?;
        let path = parent_path.join(&name);
        coord.check_outside(&path)?;

        let created = coord
            .preview_mut()
            .copy_subtree_from(source, src_id, parent, name, None)?;
        let root = *created
            .first()
            .ok_or_else(|| StagingError::internal("subtree copy created nothing"))?;
        for id in &created {
            coord.mark_created(*id)?;
        }
        tracing::info!(from = %src_path, to = %path, nodes = created.len(), "copied subtree");

        if coord.config().denormalize_shared() {
            Self::inline_shared(coord, source, root)?;
        }
        Self::copy_missing(coord, source, root)?;
        Ok(root)
    }

    /// Replace shared-container references below `root` with inline copies
    /// of the shared container's children, read from `source`.
    fn inline_shared(
        coord: &mut StagingCoordinator<'_>,
        source: &Tree,
        root: NodeId,
    ) -> Result<(), StagingError> {
        let containers: Vec<(NodeId, RelPath)> = coord
            .preview()
            .pre_order(root)
            .into_iter()
            .filter_map(|id| coord.preview().get(id))
            .filter(|n| n.kind == NodeKind::Container)
            .filter_map(|n| n.reference(SHARED_KEY).map(|s| (n.id, s)))
            .collect();

        for (container, shared) in containers {
            let Some(shared_id) = source.lookup(&shared) else {
                tracing::warn!(shared = %shared, "shared container missing in source, reference kept");
                continue;
            };
            let children: Vec<(NodeId, NodeName)> = source
                .children(shared_id)?
                .iter()
                .filter_map(|c| source.get(*c))
                .filter(|c| !c.is_deleted())
                .map(|c| (c.id, c.name.clone()))
                .collect();

            for (child, child_name) in children {
                let name = coord.free_name(container, child_name.as_str())?;
                let created = coord
                    .preview_mut()
                    .copy_subtree_from(source, child, container, name, None)?;
                for id in created {
                    coord.mark_created(id)?;
                }
            }
            coord.preview_mut().remove_property(container, SHARED_KEY)?;

            let path = coord.preview().node(container)?.path.clone();
            tracing::debug!(container = %path, shared = %shared, "inlined shared container");
            coord.journal().append(StepKind::SharedInlined { path, shared });
        }
        Ok(())
    }

    /// Copy every transitively referenced node the target lacks.
    fn copy_missing(
        coord: &mut StagingCoordinator<'_>,
        source: &Tree,
        root: NodeId,
    ) -> Result<(), StagingError> {
        let mut queue: VecDeque<RelPath> = Self::references_below(coord.preview(), root).into();
        let mut seen = BTreeSet::new();

        while let Some(path) = queue.pop_front() {
            if !seen.insert(path.clone()) || coord.preview().lookup(&path).is_some() {
                continue;
            }
            let Some(src) = source.lookup(&path) else {
                tracing::warn!(path = %path, "dangling reference, nothing to copy");
                continue;
            };
            let (Some(parent_path), Some(name)) = (path.parent(), path.name().cloned()) else {
                continue;
            };

            let parent = coord.materialize(&parent_path)?;
            let created = coord
                .preview_mut()
                .copy_subtree_from(source, src, parent, name, None)?;
            for id in &created {
                coord.mark_created(*id)?;
            }
            coord
                .journal()
                .append(StepKind::DependencyCopied { path: path.clone() });
            tracing::debug!(path = %path, nodes = created.len(), "copied missing dependency");

            if let Some(dep_root) = created.first() {
                queue.extend(Self::references_below(coord.preview(), *dep_root));
            }
        }
        Ok(())
    }

    /// Distinct references held by the subtree at `id`, in pre-order.
    fn references_below(tree: &Tree, id: NodeId) -> Vec<RelPath> {
        let mut out = Vec::new();
        for node in tree.pre_order(id).into_iter().filter_map(|n| tree.get(n)) {
            for (_, target) in node.references() {
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }

    fn visible_in(tree: &Tree, id: NodeId) -> Result<&ConfigNode, StagingError> {
        let node = tree
            .get(id)
            .ok_or_else(|| StagingError::ItemNotInPreview(id.to_string()))?;
        let hidden = node.is_deleted()
            || tree
                .ancestors(id)?
                .into_iter()
                .any(|a| tree.get(a).is_some_and(|n| n.is_deleted()));
        if hidden {
            return Err(StagingError::ItemNotInPreview(node.path.to_string()));
        }
        Ok(node)
    }
}
