//! engine::coordinator
//!
//! Staging primitives on one channel: create, update, rename, move, delete,
//! publish and discard.
//!
//! # Architecture
//!
//! A [`StagingCoordinator`] borrows one channel of the session's working
//! copy, the acting user, the configuration and the operation journal.
//! Every write to the Preview tier first goes through [`LockManager`].
//! Nothing here commits; the runner decides whether the session is saved.
//!
//! # Delete markers
//!
//! When a node that has a Live counterpart is renamed or moved, a childless
//! node with state `Deleted` is left at the vacated path, locked by the
//! acting user. Publishing the marker removes the Live node; discarding it
//! restores the Preview node from Live. Moving a node back onto its own
//! marker consumes the marker.
//!
//! # Publish and discard
//!
//! Both walk the Preview subtree under the scope root and stop at the first
//! explicit lock on every branch:
//!
//! - lock owned by a user in the scope: the whole subtree is resolved,
//!   including stray locks of other users below it
//! - lock owned by someone else: the subtree is left alone (discard only
//!   clears the scope users' own stray locks inside it)
//!
//! A lock on an ancestor of the scope root is honoured the same way.

use std::collections::BTreeSet;

use serde_json::Value;

use super::errors::StagingError;
use super::journal::{Journal, StepKind};
use super::lock::{LockManager, LockOutcome};
use crate::core::config::Config;
use crate::core::naming;
use crate::core::tree::{ConfigNode, NewNode, Properties, Tree};
use crate::core::types::{
    ChannelId, EditableState, NodeId, NodeKind, NodeName, RelPath, UserId, VersionStamp, PAGE_KEY,
    PRIMARY_CONTAINER_KEY,
};
use crate::store::{Channel, Tier};

/// What to create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSpec {
    /// Requested name; suffixed on collision.
    pub name: String,
    pub kind: NodeKind,
    pub properties: Properties,
    /// Prototype to instantiate. For pages the page becomes a copy of the
    /// prototype; for sitemap items a dedicated page is created from it.
    pub prototype: Option<RelPath>,
    /// Position among the new siblings; `None` appends.
    pub position: Option<usize>,
}

impl CreateSpec {
    /// A node of `kind` without properties.
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: Properties::new(),
            prototype: None,
            position: None,
        }
    }

    /// Set one property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Instantiate from a prototype.
    pub fn from_prototype(mut self, prototype: RelPath) -> Self {
        self.prototype = Some(prototype);
        self
    }

    /// Insert at a position among siblings.
    pub fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Changes to an existing node, applied as lock, move, rename, properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub id: NodeId,
    pub name: Option<String>,
    pub parent: Option<NodeId>,
    pub set: Properties,
    pub remove: Vec<String>,
    /// Stamp the caller last read; `None` skips the conflict check.
    pub expected: Option<VersionStamp>,
}

impl Update {
    /// An update of `id` that changes nothing yet.
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            name: None,
            parent: None,
            set: Properties::new(),
            remove: Vec::new(),
            expected: None,
        }
    }

    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn move_to(mut self, parent: NodeId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set.insert(key.into(), value.into());
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.remove.push(key.into());
        self
    }

    pub fn expect(mut self, stamp: VersionStamp) -> Self {
        self.expected = Some(stamp);
        self
    }
}

/// Which pending changes a publish or discard resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub channel: ChannelId,
    /// Subtree to walk; the channel root by default.
    pub root: RelPath,
    /// Users whose changes are resolved.
    pub users: BTreeSet<UserId>,
}

impl Scope {
    /// The whole channel, for the given users.
    pub fn new(channel: ChannelId, users: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            channel,
            root: RelPath::root(),
            users: users.into_iter().collect(),
        }
    }

    /// Restrict to the subtree at `root`.
    pub fn under(mut self, root: RelPath) -> Self {
        self.root = root;
        self
    }

    /// Check if `user` is part of the scope.
    pub fn includes(&self, user: &UserId) -> bool {
        self.users.contains(user)
    }
}

/// Subtrees a publish or discard walk found.
#[derive(Debug, Default)]
struct ScopeWalk {
    /// Locked by a scope user: resolve as a whole.
    owned: Vec<NodeId>,
    /// Locked by someone else: leave alone.
    foreign: Vec<NodeId>,
}

/// Staging primitives bound to one channel and one user.
pub struct StagingCoordinator<'a> {
    channel: &'a mut Channel,
    user: &'a UserId,
    config: &'a Config,
    journal: &'a mut Journal,
}

impl<'a> StagingCoordinator<'a> {
    pub fn new(
        channel: &'a mut Channel,
        user: &'a UserId,
        config: &'a Config,
        journal: &'a mut Journal,
    ) -> Self {
        Self {
            channel,
            user,
            config,
            journal,
        }
    }

    pub fn preview(&self) -> &Tree {
        &self.channel.preview
    }

    pub fn live(&self) -> &Tree {
        &self.channel.live
    }

    pub fn user(&self) -> &UserId {
        self.user
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub(crate) fn preview_mut(&mut self) -> &mut Tree {
        &mut self.channel.preview
    }

    pub(crate) fn journal(&mut self) -> &mut Journal {
        self.journal
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a node under `parent`, or under the kind's default parent.
    ///
    /// The name is suffixed (`name-1`, `name-2`, ...) when a sibling already
    /// uses it. The new node is `Created` and locked for the caller, unless
    /// the caller already holds an ancestor.
    pub fn create(&mut self, spec: CreateSpec, parent: Option<NodeId>) -> Result<NodeId, StagingError> {
        let requested = NodeName::new(spec.name.clone())?;
        let parent = self.resolve_parent(parent, spec.kind)?;
        let parent_path = self.preview().node(parent)?.path.clone();
        if !parent_path.is_workspace() {
            return Err(StagingError::ItemNotCorrectLocation(parent_path));
        }
        LockManager::check_writable(self.preview(), &parent_path, self.user)?;

        let name = self.free_name(parent, requested.as_str())?;
        let path = parent_path.join(&name);
        self.check_outside(&path)?;

        let id = match (&spec.prototype, spec.kind) {
            (Some(prototype), NodeKind::Page) => {
                let id = self.instantiate(prototype, parent, name, spec.position)?;
                for (key, value) in &spec.properties {
                    self.channel.preview.set_property(id, key.clone(), value.clone())?;
                }
                id
            }
            _ => {
                let new = NewNode::new(name, spec.kind).with_properties(spec.properties.clone());
                let id = self.channel.preview.add_child(parent, new, spec.position)?;
                self.mark_created(id)?;
                id
            }
        };

        if spec.kind == NodeKind::SitemapItem {
            if let Some(prototype) = &spec.prototype {
                self.create_page_for(id, prototype)?;
            }
        }

        tracing::info!(path = %path, kind = %spec.kind, user = %self.user, "created");
        Ok(id)
    }

    /// Copy a prototype under `parent` as a new page named `name`.
    pub(crate) fn instantiate(
        &mut self,
        prototype: &RelPath,
        parent: NodeId,
        name: NodeName,
        position: Option<usize>,
    ) -> Result<NodeId, StagingError> {
        let source = self
            .preview()
            .lookup(prototype)
            .ok_or_else(|| StagingError::ItemNotInPreview(prototype.to_string()))?;
        self.visible(source)?;

        let created = self
            .channel
            .preview
            .copy_within(source, parent, name, position)?;
        let root = *created
            .first()
            .ok_or_else(|| StagingError::internal("prototype copy created nothing"))?;

        let mut properties = self.preview().node(root)?.properties.clone();
        properties.remove(PRIMARY_CONTAINER_KEY);
        self.channel
            .preview
            .replace_content(root, NodeKind::Page, properties)?;

        for id in created {
            self.mark_created(id)?;
        }
        Ok(root)
    }

    /// Give a new sitemap item its dedicated page.
    fn create_page_for(&mut self, item: NodeId, prototype: &RelPath) -> Result<NodeId, StagingError> {
        let item_path = self.preview().node(item)?.path.clone();
        let pages = self.resolve_parent(None, NodeKind::Page)?;

        let base = item_path
            .workspace_mirror()
            .map(|m| naming::page_name_for(m.segments().iter().skip(1).map(NodeName::as_str)))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| item_path.name().map(|n| n.to_string()).unwrap_or_default());
        let name = self.free_name(pages, &base)?;
        let page_path = self.preview().node(pages)?.path.join(&name);
        self.check_outside(&page_path)?;

        let page = self.instantiate(prototype, pages, name, None)?;
        self.channel
            .preview
            .set_property(item, PAGE_KEY, Value::String(page_path.to_string()))?;
        tracing::debug!(item = %item_path, page = %page_path, "created page for sitemap item");
        Ok(page)
    }

    // =========================================================================
    // Update, rename, move
    // =========================================================================

    /// Apply an update: lock (with the expected stamp), then move, rename
    /// and property changes.
    pub fn update(&mut self, update: &Update) -> Result<(), StagingError> {
        let node = self.visible(update.id)?;
        let path = node.path.clone();
        let parent = node.parent;
        Self::require_mutable(&path)?;

        self.lock_for_write(update.id, update.expected)?;

        if let Some(new_parent) = update.parent {
            if Some(new_parent) != parent {
                self.move_to(update.id, Some(new_parent))?;
            }
        }
        if let Some(name) = &update.name {
            self.rename(update.id, name)?;
        }

        if !update.set.is_empty() || !update.remove.is_empty() {
            let preview = &mut self.channel.preview;
            for (key, value) in &update.set {
                preview.set_property(update.id, key.clone(), value.clone())?;
            }
            for key in &update.remove {
                preview.remove_property(update.id, key)?;
            }
            self.mark_changed(update.id)?;
            let path = self.preview().node(update.id)?.path.clone();
            self.journal.append(StepKind::NodeUpdated { path });
        }
        Ok(())
    }

    /// Rename a node in place.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<(), StagingError> {
        let name = NodeName::new(new_name)?;
        let node = self.visible(id)?;
        let (path, current, parent) = (node.path.clone(), node.name.clone(), node.parent);
        Self::require_mutable(&path)?;
        if current == name {
            LockManager::check_lockable(self.preview(), id, self.user)?;
            return Ok(());
        }
        let parent = parent.ok_or(StagingError::ItemNotCorrectLocation(path))?;

        self.lock_for_write(id, None)?;
        self.clear_target_name(parent, &name)?;
        let position = self.preview().position(id);
        self.relocate(id, parent, name, position)
    }

    /// Move a node under `new_parent`, or under its kind's default parent.
    pub fn move_to(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<(), StagingError> {
        let node = self.visible(id)?;
        let (path, kind, name, parent) = (node.path.clone(), node.kind, node.name.clone(), node.parent);

        let target = match new_parent {
            Some(target) => {
                self.visible(target)?;
                target
            }
            None => self.resolve_parent(None, kind)?,
        };
        let target_path = self.preview().node(target)?.path.clone();
        if target == id || path.is_ancestor_of(&target_path) {
            return Err(StagingError::InvalidMoveToSelfOrDescendant {
                node: path,
                target: target_path,
            });
        }
        Self::require_mutable(&path)?;
        if !target_path.is_workspace() {
            return Err(StagingError::ItemNotCorrectLocation(target_path));
        }
        if parent == Some(target) {
            LockManager::check_lockable(self.preview(), id, self.user)?;
            return Ok(());
        }

        self.lock_for_write(id, None)?;
        LockManager::check_writable(self.preview(), &target_path, self.user)?;
        self.clear_target_name(target, &name)?;
        self.relocate(id, target, name, None)
    }

    /// Make `parent/name` available for a moving node: fail if taken, but
    /// consume the caller's own childless delete marker.
    fn clear_target_name(&mut self, parent: NodeId, name: &NodeName) -> Result<(), StagingError> {
        let parent_path = self.preview().node(parent)?.path.clone();
        let path = parent_path.join(name);
        if let Some(existing) = self.preview().lookup(&path) {
            if !self.is_own_marker(existing) {
                return Err(StagingError::ItemNameNotUnique {
                    parent: parent_path,
                    name: name.to_string(),
                });
            }
            self.channel.preview.remove_subtree(existing)?;
            self.journal.append(StepKind::NodeRemoved {
                tier: Tier::Preview,
                path: path.clone(),
            });
            tracing::debug!(path = %path, "consumed own delete marker");
        }
        self.check_outside(&path)
    }

    fn is_own_marker(&self, id: NodeId) -> bool {
        self.preview().get(id).is_some_and(|n| {
            n.is_deleted()
                && n.children.is_empty()
                && LockManager::is_owned_by(self.preview(), id, self.user)
        })
    }

    /// Move a locked node and leave a delete marker behind when the old
    /// path has a Live counterpart.
    fn relocate(
        &mut self,
        id: NodeId,
        new_parent: NodeId,
        new_name: NodeName,
        position: Option<usize>,
    ) -> Result<(), StagingError> {
        let node = self.preview().node(id)?;
        let old_path = node.path.clone();
        let old_name = node.name.clone();
        let kind = node.kind;
        let properties = node.properties.clone();
        let old_parent = node
            .parent
            .ok_or_else(|| StagingError::ItemNotCorrectLocation(old_path.clone()))?;
        let old_position = self.preview().position(id);
        let has_live = self.has_live(&old_path);

        self.channel
            .preview
            .move_node(id, new_parent, new_name, position)?;
        let new_path = self.preview().node(id)?.path.clone();
        self.journal.append(StepKind::NodeMoved {
            from: old_path.clone(),
            to: new_path.clone(),
        });
        self.mark_changed(id)?;
        if !LockManager::is_owned_by(self.preview(), id, self.user) {
            self.lock_for_write(id, None)?;
        }

        if has_live {
            let marker = self.channel.preview.add_child(
                old_parent,
                NewNode::new(old_name, kind).with_properties(properties),
                old_position,
            )?;
            self.channel.preview.set_state(marker, EditableState::Deleted)?;
            self.journal.append(StepKind::MarkerCreated {
                path: old_path.clone(),
            });
            self.lock_for_write(marker, None)?;
        }

        tracing::info!(from = %old_path, to = %new_path, marker = has_live, user = %self.user, "relocated");
        Ok(())
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete a node.
    ///
    /// With a Live counterpart the node is marked `Deleted` and kept, locked.
    /// Without one the subtree is removed, then every backing artifact it
    /// exclusively owned is deleted the same way.
    pub fn delete(&mut self, id: NodeId) -> Result<(), StagingError> {
        let node = self.visible(id)?;
        let path = node.path.clone();
        Self::require_mutable(&path)?;

        self.lock_for_write(id, None)?;

        if self.has_live(&path) {
            self.channel.preview.set_state(id, EditableState::Deleted)?;
            self.bump(id)?;
            self.journal.append(StepKind::NodeMarkedDeleted { path: path.clone() });
            tracing::info!(path = %path, user = %self.user, "marked deleted");
            Ok(())
        } else {
            self.hard_remove(id)
        }
    }

    /// Remove a subtree from Preview and cascade to exclusively owned
    /// artifacts.
    pub(crate) fn hard_remove(&mut self, id: NodeId) -> Result<(), StagingError> {
        let path = self.preview().node(id)?.path.clone();
        let owned = self.owned_artifacts(id);

        self.channel.preview.remove_subtree(id)?;
        self.journal.append(StepKind::NodeRemoved {
            tier: Tier::Preview,
            path: path.clone(),
        });
        tracing::info!(path = %path, user = %self.user, "removed");

        self.cascade(owned)
    }

    /// Delete each artifact that still exists and that nothing references.
    pub(crate) fn cascade(&mut self, artifacts: Vec<RelPath>) -> Result<(), StagingError> {
        for artifact in artifacts {
            let Some(target) = self.preview().lookup(&artifact) else {
                continue;
            };
            if self.visible(target).is_err() || self.is_referenced(&artifact) {
                continue;
            }
            tracing::debug!(path = %artifact, "cascading delete to owned artifact");
            self.delete(target)?;
        }
        Ok(())
    }

    /// Workspace artifacts owned by nodes of the subtree at `id`.
    pub(crate) fn owned_artifacts(&self, id: NodeId) -> Vec<RelPath> {
        let preview = self.preview();
        let mut out = Vec::new();
        for n in preview.pre_order(id) {
            let Some(node) = preview.get(n) else { continue };
            let Some(key) = node.kind.capabilities().owns else {
                continue;
            };
            if let Some(target) = node.reference(key).filter(RelPath::is_workspace) {
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }
        out
    }

    /// Check if any visible Preview node references `path`.
    fn is_referenced(&self, path: &RelPath) -> bool {
        let preview = self.preview();
        preview
            .pre_order(preview.root_id())
            .into_iter()
            .filter_map(|n| preview.get(n))
            .filter(|n| !n.is_deleted())
            .any(|n| n.references().iter().any(|(_, r)| r == path))
    }

    // =========================================================================
    // Publish / discard
    // =========================================================================

    /// Publish every pending change in `scope`. Returns the number of
    /// subtrees resolved.
    pub fn publish(&mut self, scope: &Scope) -> Result<usize, StagingError> {
        let walk = self.walk_scope(scope)?;
        let mut count = 0;
        for id in walk.owned {
            if self.preview().contains(id) {
                self.publish_subtree(id)?;
                count += 1;
            }
        }
        if !walk.foreign.is_empty() {
            tracing::debug!(skipped = walk.foreign.len(), "publish skipped subtrees locked by others");
        }
        tracing::info!(root = %scope.root, resolved = count, "published");
        Ok(count)
    }

    /// Throw away every pending change in `scope`. Returns the number of
    /// subtrees resolved.
    pub fn discard(&mut self, scope: &Scope) -> Result<usize, StagingError> {
        let walk = self.walk_scope(scope)?;
        let mut count = 0;
        for id in walk.owned {
            if self.preview().contains(id) {
                self.discard_subtree(id)?;
                count += 1;
            }
        }

        // A foreign ancestor lock wins over the scope users' own locks below
        // it: only those locks are cleared, content stays.
        for holder in walk.foreign {
            let Some(path) = self.preview().get(holder).map(|n| n.path.clone()) else {
                continue;
            };
            for stray in self.preview().locked_descendants(&path) {
                let owned = self.preview().get(stray).is_some_and(|n| {
                    n.path.starts_with(&scope.root)
                        && n.lock.as_ref().is_some_and(|l| scope.includes(&l.owner))
                });
                if owned {
                    tracing::warn!(holder = %path, "clearing stray lock below foreign lock");
                    LockManager::release(&mut self.channel.preview, stray, self.journal)?;
                }
            }
        }
        tracing::info!(root = %scope.root, resolved = count, "discarded");
        Ok(count)
    }

    fn walk_scope(&self, scope: &Scope) -> Result<ScopeWalk, StagingError> {
        let preview = self.preview();
        let root = preview
            .lookup(&scope.root)
            .ok_or_else(|| StagingError::ItemNotInPreview(scope.root.to_string()))?;

        let mut walk = ScopeWalk::default();
        if let Some(outer) = preview.locked_ancestors(&scope.root).first().copied() {
            let in_scope = preview
                .get(outer)
                .and_then(|n| n.lock.as_ref())
                .is_some_and(|l| scope.includes(&l.owner));
            if in_scope {
                walk.owned.push(root);
            } else {
                walk.foreign.push(outer);
            }
            return Ok(walk);
        }

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = preview.node(id)?;
            match &node.lock {
                Some(lock) if scope.includes(&lock.owner) => walk.owned.push(id),
                Some(_) => walk.foreign.push(id),
                None => stack.extend(node.children.iter().rev().copied()),
            }
        }
        Ok(walk)
    }

    fn publish_subtree(&mut self, id: NodeId) -> Result<(), StagingError> {
        let node = self.preview().node(id)?;
        let path = node.path.clone();
        let name = node.name.clone();

        if node.is_deleted() {
            if let Some(live_id) = self.live().lookup(&path) {
                self.channel.live.remove_subtree(live_id)?;
                self.journal.append(StepKind::NodeRemoved {
                    tier: Tier::Live,
                    path: path.clone(),
                });
            }
            self.channel.preview.remove_subtree(id)?;
            self.journal.append(StepKind::NodeRemoved {
                tier: Tier::Preview,
                path: path.clone(),
            });
            tracing::debug!(path = %path, "published deletion");
            return Ok(());
        }

        let live_parent = self.ensure_live_parent(id)?;
        let position = match self.live().lookup(&path) {
            Some(existing) => {
                let position = self.live().position(existing);
                self.channel.live.remove_subtree(existing)?;
                position
            }
            None => Some(self.live_position(id, live_parent)),
        };

        let Channel { preview, live, .. } = &mut *self.channel;
        live.copy_subtree_from(preview, id, live_parent, name, position)?;

        let mut deleted = Vec::new();
        for n in preview.pre_order(id) {
            let Some(node) = preview.get(n) else { continue };
            if node.is_deleted() {
                deleted.push(n);
                continue;
            }
            LockManager::release(preview, n, self.journal)?;
            preview.set_state(n, EditableState::None)?;
        }
        for n in deleted {
            if preview.contains(n) {
                preview.remove_subtree(n)?;
            }
        }

        self.journal.append(StepKind::Published { path: path.clone() });
        tracing::debug!(path = %path, "published subtree");
        Ok(())
    }

    /// Create missing Live ancestors of the Preview node `id`, copying each
    /// ancestor's own content. Returns the Live parent.
    fn ensure_live_parent(&mut self, id: NodeId) -> Result<NodeId, StagingError> {
        let preview_root = self.preview().root_id();
        let ancestors = self.preview().ancestors(id)?;
        let mut live_parent = self.live().root_id();
        for ancestor in ancestors.into_iter().filter(|a| *a != preview_root) {
            let node = self.preview().node(ancestor)?;
            live_parent = match self.live().lookup(&node.path) {
                Some(existing) => existing,
                None => {
                    let new = NewNode::new(node.name.clone(), node.kind)
                        .with_properties(node.properties.clone());
                    let position = self.live_position(ancestor, live_parent);
                    self.channel.live.add_child(live_parent, new, Some(position))?
                }
            };
        }
        Ok(live_parent)
    }

    /// Live insertion index for the Preview node `id`: right after the
    /// closest preceding Preview sibling that exists in Live.
    fn live_position(&self, id: NodeId, live_parent: NodeId) -> usize {
        let preview = self.preview();
        let live = self.live();
        let siblings = preview
            .get(id)
            .and_then(|n| n.parent)
            .and_then(|p| preview.get(p))
            .map(|p| p.children.as_slice())
            .unwrap_or_default();
        let Some(index) = siblings.iter().position(|s| *s == id) else {
            return 0;
        };
        siblings[..index]
            .iter()
            .rev()
            .filter_map(|s| preview.get(*s))
            .filter_map(|s| live.lookup(&s.path))
            .find(|l| live.get(*l).and_then(|n| n.parent) == Some(live_parent))
            .and_then(|l| live.position(l))
            .map(|p| p + 1)
            .unwrap_or(0)
    }

    fn discard_subtree(&mut self, id: NodeId) -> Result<(), StagingError> {
        let path = self.preview().node(id)?.path.clone();

        let Some(live_id) = self.live().lookup(&path) else {
            self.channel.preview.remove_subtree(id)?;
            self.journal.append(StepKind::NodeRemoved {
                tier: Tier::Preview,
                path: path.clone(),
            });
            tracing::debug!(path = %path, "discarded new subtree");
            if let Some(parent) = path.parent() {
                self.prune_scaffold(parent)?;
            }
            return Ok(());
        };

        let Channel { preview, live, .. } = &mut *self.channel;
        let source = live.node(live_id)?;
        preview.replace_content(id, source.kind, source.properties.clone())?;
        for child in preview.children(id)?.to_vec() {
            preview.remove_subtree(child)?;
        }
        for child in live.children(live_id)? {
            let child_name = live.node(*child)?.name.clone();
            preview.copy_subtree_from(live, *child, id, child_name, None)?;
        }
        LockManager::release(preview, id, self.journal)?;
        preview.set_state(id, EditableState::None)?;
        preview.bump_version(id)?;

        self.journal.append(StepKind::Restored { path: path.clone() });
        tracing::debug!(path = %path, "restored subtree from live");
        Ok(())
    }

    /// Remove empty folders left over from [`Self::materialize`], walking up
    /// from `path`. A folder qualifies when it has no children, no lock (own
    /// or inherited), no pending state and no Live counterpart.
    fn prune_scaffold(&mut self, mut path: RelPath) -> Result<(), StagingError> {
        while !path.is_root() {
            let Some(id) = self.preview().lookup(&path) else {
                break;
            };
            let node = self.preview().node(id)?;
            let scaffold = node.kind == NodeKind::Folder
                && node.children.is_empty()
                && node.state == EditableState::None
                && !self.has_live(&path)
                && LockManager::lock_info(self.preview(), id)?.is_none();
            if !scaffold {
                break;
            }
            self.channel.preview.remove_subtree(id)?;
            self.journal.append(StepKind::NodeRemoved {
                tier: Tier::Preview,
                path: path.clone(),
            });
            tracing::debug!(path = %path, "pruned empty scaffold folder");
            path = match path.parent() {
                Some(parent) => parent,
                None => break,
            };
        }
        Ok(())
    }

    // =========================================================================
    // Shared helpers
    // =========================================================================

    /// A node that exists in Preview and is not hidden by a delete marker.
    pub(crate) fn visible(&self, id: NodeId) -> Result<&ConfigNode, StagingError> {
        let preview = self.preview();
        let node = preview
            .get(id)
            .ok_or_else(|| StagingError::ItemNotInPreview(id.to_string()))?;
        let hidden = node.is_deleted()
            || preview
                .ancestors(id)?
                .into_iter()
                .any(|a| preview.get(a).is_some_and(ConfigNode::is_deleted));
        if hidden {
            return Err(StagingError::ItemNotInPreview(node.path.to_string()));
        }
        Ok(node)
    }

    /// Fail unless `path` is strictly inside the workspace.
    pub(crate) fn require_mutable(path: &RelPath) -> Result<(), StagingError> {
        if path.workspace_mirror().is_some() {
            Ok(())
        } else {
            Err(StagingError::ItemNotCorrectLocation(path.clone()))
        }
    }

    pub(crate) fn has_live(&self, path: &RelPath) -> bool {
        self.live().lookup(path).is_some()
    }

    /// Fail when the inherited mirror of a workspace path exists.
    pub(crate) fn check_outside(&self, path: &RelPath) -> Result<(), StagingError> {
        match path.workspace_mirror() {
            Some(mirror) if self.preview().lookup(&mirror).is_some() => {
                Err(StagingError::ItemExistsOutsideWorkspace(path.clone()))
            }
            _ => Ok(()),
        }
    }

    /// First free `base`, `base-1`, ... under `parent`.
    pub(crate) fn free_name(&self, parent: NodeId, base: &str) -> Result<NodeName, StagingError> {
        let parent_path = self.preview().node(parent)?.path.clone();
        let preview = self.preview();
        let taken = |candidate: &str| match NodeName::new(candidate) {
            Ok(n) => preview.lookup(&parent_path.join(&n)).is_some(),
            Err(_) => true,
        };
        let name = naming::next_free_name(base, taken, self.config.max_suffix()).ok_or_else(
            || StagingError::ItemNameNotUnique {
                parent: parent_path.clone(),
                name: base.to_string(),
            },
        )?;
        Ok(NodeName::new(name)?)
    }

    /// `parent` if given and visible, else the default parent of `kind`.
    pub(crate) fn resolve_parent(
        &mut self,
        parent: Option<NodeId>,
        kind: NodeKind,
    ) -> Result<NodeId, StagingError> {
        match parent {
            Some(id) => {
                self.visible(id)?;
                Ok(id)
            }
            None => {
                let path = self
                    .config
                    .default_parent(kind)
                    .ok_or_else(|| StagingError::ItemNotCorrectLocation(RelPath::root()))?;
                self.materialize(&path)
            }
        }
    }

    /// Make sure every node along `path` exists.
    ///
    /// Folders created here are shared scaffolding with no lock and no pending
    /// state. Publish copies them to Live along with their content; discard
    /// prunes them once empty.
    pub(crate) fn materialize(&mut self, path: &RelPath) -> Result<NodeId, StagingError> {
        if let Some(id) = self.preview().lookup(path) {
            self.visible(id)?;
            return Ok(id);
        }
        LockManager::check_writable(self.preview(), path, self.user)?;
        let (id, created) = self.channel.preview.ensure_path(path)?;
        for folder in created {
            let node = self.preview().node(folder)?;
            let (path, kind) = (node.path.clone(), node.kind);
            tracing::debug!(path = %path, "materialized folder");
            self.journal.append(StepKind::NodeCreated { path, kind });
        }
        Ok(id)
    }

    /// Flag a freshly inserted node as `Created` and lock it.
    pub(crate) fn mark_created(&mut self, id: NodeId) -> Result<(), StagingError> {
        let node = self.preview().node(id)?;
        let (path, kind) = (node.path.clone(), node.kind);
        self.channel.preview.set_state(id, EditableState::Created)?;
        self.journal.append(StepKind::NodeCreated { path, kind });
        let outcome = self.lock_for_write(id, None)?;
        if !matches!(outcome, LockOutcome::Acquired { node, .. } if node == id) {
            self.bump(id)?;
        }
        Ok(())
    }

    /// Record a content change: bump the stamp and move the state on.
    pub(crate) fn mark_changed(&mut self, id: NodeId) -> Result<(), StagingError> {
        let state = self.preview().node(id)?.state;
        self.channel.preview.set_state(id, state.after_change())?;
        self.bump(id)?;
        Ok(())
    }

    /// Advance the stamp of `id`. The node's own lock follows the new stamp.
    fn bump(&mut self, id: NodeId) -> Result<VersionStamp, StagingError> {
        let stamp = self.channel.preview.bump_version(id)?;
        if let Some(mut lock) = self.preview().node(id)?.lock.clone() {
            lock.version_stamp = stamp;
            self.channel.preview.set_lock(id, Some(lock))?;
        }
        Ok(stamp)
    }

    /// Acquire the lock protecting `id`. A lock holder that had no pending
    /// change becomes `Changed`.
    pub(crate) fn lock_for_write(
        &mut self,
        id: NodeId,
        expected: Option<VersionStamp>,
    ) -> Result<LockOutcome, StagingError> {
        let outcome =
            LockManager::acquire(&mut self.channel.preview, id, self.user, expected, self.journal)?;
        if let LockOutcome::Acquired { node, .. } = outcome {
            if self.preview().node(node)?.state == EditableState::None {
                self.channel.preview.set_state(node, EditableState::Changed)?;
            }
        }
        Ok(outcome)
    }
}
