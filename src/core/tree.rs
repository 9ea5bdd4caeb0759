//! core::tree
//!
//! One tier (Preview or Live) of a channel's configuration tree.
//!
//! # Architecture
//!
//! Nodes live in an arena keyed by [`NodeId`]. Each node knows its parent
//! and its ordered children. Two [`PathIndex`]es are kept in step with every
//! structural change:
//!
//! - `paths` maps every node's [`RelPath`] to its id
//! - `locks` maps only explicitly locked nodes
//!
//! All mutation goes through `Tree` methods so the indexes can never drift
//! from the arena.
//!
//! # Invariants
//!
//! - Exactly one root, at the empty path, which can be neither moved nor removed
//! - Sibling names are unique
//! - `node.path` equals the parent's path joined with `node.name`
//! - `locks` contains exactly the nodes whose `lock` is `Some`

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::index::PathIndex;
use super::types::{
    EditableState, Fingerprint, Lock, NodeId, NodeKind, NodeName, RelPath, VersionStamp,
};

/// Property map of a node.
pub type Properties = BTreeMap<String, Value>;

/// Name given to the root node of every tier.
pub const ROOT_NAME: &str = "root";

/// Errors from structural tree operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("no node at path '{0}'")]
    PathNotFound(RelPath),

    #[error("'{parent}' already has a child named '{name}'")]
    NameTaken { parent: RelPath, name: String },

    #[error("the root node cannot be moved or removed")]
    RootImmutable,

    #[error("cannot move '{node}' into its own subtree at '{target}'")]
    InvalidMove { node: RelPath, target: RelPath },
}

/// A configuration node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigNode {
    pub id: NodeId,
    pub name: NodeName,
    pub path: RelPath,
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub properties: Properties,
    pub lock: Option<Lock>,
    pub state: EditableState,
    pub version: VersionStamp,
}

impl ConfigNode {
    /// String value of a property, if present and a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Parse a reference property as a channel-relative path.
    ///
    /// Empty or unparsable values are treated as "no reference".
    pub fn reference(&self, key: &str) -> Option<RelPath> {
        self.property_str(key)
            .filter(|s| !s.is_empty())
            .and_then(|s| RelPath::parse(s).ok())
    }

    /// All references this node holds, per its kind's capability table.
    pub fn references(&self) -> Vec<(&'static str, RelPath)> {
        self.kind
            .capabilities()
            .reference_keys
            .iter()
            .filter_map(|key| self.reference(key).map(|p| (*key, p)))
            .collect()
    }

    /// Check if this node is a deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.state == EditableState::Deleted
    }
}

/// Content of a node to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub name: NodeName,
    pub kind: NodeKind,
    pub properties: Properties,
}

impl NewNode {
    /// A node without properties.
    pub fn new(name: NodeName, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            properties: Properties::new(),
        }
    }

    /// Attach properties.
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// One tier of configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    root: NodeId,
    nodes: HashMap<NodeId, ConfigNode>,
    paths: PathIndex,
    locks: PathIndex,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create a tree holding only a root folder.
    pub fn new() -> Self {
        let id = NodeId::new();
        let root = ConfigNode {
            id,
            name: NodeName::from_static(ROOT_NAME),
            path: RelPath::root(),
            kind: NodeKind::Folder,
            parent: None,
            children: Vec::new(),
            properties: Properties::new(),
            lock: None,
            state: EditableState::None,
            version: VersionStamp::initial(),
        };
        let mut paths = PathIndex::new();
        paths.insert(RelPath::root(), id);
        let mut nodes = HashMap::new();
        nodes.insert(id, root);
        Self {
            root: id,
            nodes,
            paths,
            locks: PathIndex::new(),
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Id of the root node.
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A tree always has its root, so it is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Look up a node by id.
    pub fn get(&self, id: NodeId) -> Option<&ConfigNode> {
        self.nodes.get(&id)
    }

    /// Look up a node by id, failing with `TreeError::NotFound`.
    pub fn node(&self, id: NodeId) -> Result<&ConfigNode, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::NotFound(id))
    }

    /// Check if a node exists.
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up a node id by path.
    pub fn lookup(&self, path: &RelPath) -> Option<NodeId> {
        self.paths.get(path)
    }

    /// Look up a node by path.
    pub fn lookup_node(&self, path: &RelPath) -> Option<&ConfigNode> {
        self.lookup(path).and_then(|id| self.get(id))
    }

    /// Ordered children of a node.
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], TreeError> {
        Ok(&self.node(id)?.children)
    }

    /// Child of `parent` with the given name.
    pub fn child_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent = self.get(parent)?;
        let name = NodeName::new(name).ok()?;
        self.paths.get(&parent.path.join(&name))
    }

    /// Position of a node among its siblings.
    pub fn position(&self, id: NodeId) -> Option<usize> {
        let parent = self.get(id)?.parent?;
        self.get(parent)?.children.iter().position(|c| *c == id)
    }

    /// Node ids of the subtree rooted at `id`, in pre-order.
    pub fn pre_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get(current) {
                out.push(current);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Proper ancestors of a node, root first.
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>, TreeError> {
        let path = &self.node(id)?.path;
        Ok(self.paths.ancestors(path).into_iter().map(|(_, id)| id).collect())
    }

    /// Check if `id` lies strictly below `ancestor`.
    pub fn is_descendant(&self, id: NodeId, ancestor: NodeId) -> bool {
        match (self.get(id), self.get(ancestor)) {
            (Some(node), Some(anc)) => anc.path.is_ancestor_of(&node.path),
            _ => false,
        }
    }

    /// Explicitly locked proper ancestors of `path`, root first.
    pub fn locked_ancestors(&self, path: &RelPath) -> Vec<NodeId> {
        self.locks.ancestors(path).into_iter().map(|(_, id)| id).collect()
    }

    /// Explicitly locked proper descendants of `path`, in path order.
    pub fn locked_descendants(&self, path: &RelPath) -> Vec<NodeId> {
        self.locks.descendants(path).map(|(_, id)| id).collect()
    }

    /// Every explicitly locked node, in path order.
    pub fn locked_nodes(&self) -> Vec<&ConfigNode> {
        self.locks.iter().filter_map(|(_, id)| self.get(id)).collect()
    }

    // =========================================================================
    // Structural mutation
    // =========================================================================

    /// Insert a new child under `parent`.
    ///
    /// `position` is clamped to the number of children; `None` appends.
    /// The new node starts with no lock, `EditableState::None` and the
    /// initial version stamp.
    ///
    /// # Errors
    ///
    /// - [`TreeError::NotFound`] if `parent` does not exist
    /// - [`TreeError::NameTaken`] if a sibling already uses the name
    pub fn add_child(
        &mut self,
        parent: NodeId,
        new: NewNode,
        position: Option<usize>,
    ) -> Result<NodeId, TreeError> {
        let parent_path = self.node(parent)?.path.clone();
        let path = parent_path.join(&new.name);
        if self.paths.contains(&path) {
            return Err(TreeError::NameTaken {
                parent: parent_path,
                name: new.name.to_string(),
            });
        }

        let id = NodeId::new();
        self.nodes.insert(
            id,
            ConfigNode {
                id,
                name: new.name,
                path: path.clone(),
                kind: new.kind,
                parent: Some(parent),
                children: Vec::new(),
                properties: new.properties,
                lock: None,
                state: EditableState::None,
                version: VersionStamp::initial(),
            },
        );
        self.paths.insert(path, id);
        self.attach(parent, id, position)?;
        Ok(id)
    }

    /// Make sure every node along `path` exists, creating missing ones as
    /// folders. Returns the id at `path` and the ids that were created,
    /// outermost first.
    pub fn ensure_path(&mut self, path: &RelPath) -> Result<(NodeId, Vec<NodeId>), TreeError> {
        let mut current = self.root;
        let mut created = Vec::new();
        for segment in path.segments() {
            current = match self.child_named(current, segment.as_str()) {
                Some(id) => id,
                None => {
                    let id =
                        self.add_child(current, NewNode::new(segment.clone(), NodeKind::Folder), None)?;
                    created.push(id);
                    id
                }
            };
        }
        Ok((current, created))
    }

    /// Remove a node and its whole subtree. Returns the removed nodes in
    /// pre-order.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<Vec<ConfigNode>, TreeError> {
        if id == self.root {
            return Err(TreeError::RootImmutable);
        }
        let node = self.node(id)?;
        let path = node.path.clone();
        let parent = node.parent;

        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        self.paths.remove_subtree(&path);
        self.locks.remove_subtree(&path);

        let removed = self
            .pre_order(id)
            .into_iter()
            .filter_map(|n| self.nodes.remove(&n))
            .collect();
        Ok(removed)
    }

    /// Move (and optionally rename) a node under `new_parent`.
    ///
    /// Node ids in the subtree are preserved. `position` is clamped; `None`
    /// appends.
    ///
    /// # Errors
    ///
    /// - [`TreeError::RootImmutable`] when moving the root
    /// - [`TreeError::InvalidMove`] when `new_parent` is the node or lies below it
    /// - [`TreeError::NameTaken`] when another sibling uses `new_name`
    pub fn move_node(
        &mut self,
        id: NodeId,
        new_parent: NodeId,
        new_name: NodeName,
        position: Option<usize>,
    ) -> Result<(), TreeError> {
        if id == self.root {
            return Err(TreeError::RootImmutable);
        }
        let old_path = self.node(id)?.path.clone();
        let target_path = self.node(new_parent)?.path.clone();
        if target_path.starts_with(&old_path) {
            return Err(TreeError::InvalidMove {
                node: old_path,
                target: target_path,
            });
        }

        let new_path = target_path.join(&new_name);
        if new_path == old_path {
            return Ok(());
        }
        if self.paths.contains(&new_path) {
            return Err(TreeError::NameTaken {
                parent: target_path,
                name: new_name.to_string(),
            });
        }

        let subtree = self.pre_order(id);
        self.detach(id);
        self.paths.rebase(&old_path, &new_path);
        self.locks.rebase(&old_path, &new_path);
        for n in subtree {
            if let Some(node) = self.nodes.get_mut(&n) {
                if let Some(rest) = node.path.strip_prefix(&old_path) {
                    node.path = new_path.join_path(&rest);
                }
            }
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.name = new_name;
            node.parent = Some(new_parent);
        }
        self.attach(new_parent, id, position)
    }

    /// Deep-copy the subtree at `src_id` of `src` under `dst_parent` in this
    /// tree, as `name`.
    ///
    /// Copies get fresh ids, no locks, `EditableState::None` and the initial
    /// stamp. Deletion markers inside the source subtree are skipped, since
    /// they do not represent visible content. Returns the created ids, the
    /// copy's root first.
    pub fn copy_subtree_from(
        &mut self,
        src: &Tree,
        src_id: NodeId,
        dst_parent: NodeId,
        name: NodeName,
        position: Option<usize>,
    ) -> Result<Vec<NodeId>, TreeError> {
        let source = src.node(src_id)?;
        let root = self.add_child(
            dst_parent,
            NewNode {
                name,
                kind: source.kind,
                properties: source.properties.clone(),
            },
            position,
        )?;

        let mut created = vec![root];
        let mut work = vec![(src_id, root)];
        while let Some((from, to)) = work.pop() {
            let mut children = Vec::new();
            for child in src.children(from)? {
                let child = src.node(*child)?;
                if child.is_deleted() {
                    continue;
                }
                let copied = self.add_child(
                    to,
                    NewNode {
                        name: child.name.clone(),
                        kind: child.kind,
                        properties: child.properties.clone(),
                    },
                    None,
                )?;
                created.push(copied);
                children.push((child.id, copied));
            }
            work.extend(children.into_iter().rev());
        }
        Ok(created)
    }

    /// Deep-copy a subtree of this tree to another place in this tree.
    ///
    /// Same rules as [`Tree::copy_subtree_from`].
    pub fn copy_within(
        &mut self,
        src_id: NodeId,
        dst_parent: NodeId,
        name: NodeName,
        position: Option<usize>,
    ) -> Result<Vec<NodeId>, TreeError> {
        let snapshot = self.clone();
        self.copy_subtree_from(&snapshot, src_id, dst_parent, name, position)
    }

    // =========================================================================
    // Node mutation
    // =========================================================================

    /// Set or clear the explicit lock of a node.
    pub fn set_lock(&mut self, id: NodeId, lock: Option<Lock>) -> Result<(), TreeError> {
        let node = self.nodes.get_mut(&id).ok_or(TreeError::NotFound(id))?;
        match lock {
            Some(_) => {
                self.locks.insert(node.path.clone(), id);
            }
            None => {
                self.locks.remove(&node.path);
            }
        }
        node.lock = lock;
        Ok(())
    }

    /// Set the editable state of a node.
    pub fn set_state(&mut self, id: NodeId, state: EditableState) -> Result<(), TreeError> {
        self.node_mut(id)?.state = state;
        Ok(())
    }

    /// Advance a node's version stamp, returning the new value.
    pub fn bump_version(&mut self, id: NodeId) -> Result<VersionStamp, TreeError> {
        let node = self.node_mut(id)?;
        node.version = node.version.next();
        Ok(node.version)
    }

    /// Set one property.
    pub fn set_property(
        &mut self,
        id: NodeId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), TreeError> {
        self.node_mut(id)?.properties.insert(key.into(), value);
        Ok(())
    }

    /// Remove one property.
    pub fn remove_property(&mut self, id: NodeId, key: &str) -> Result<Option<Value>, TreeError> {
        Ok(self.node_mut(id)?.properties.remove(key))
    }

    /// Replace the whole property map and kind of a node.
    pub fn replace_content(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        properties: Properties,
    ) -> Result<(), TreeError> {
        let node = self.node_mut(id)?;
        node.kind = kind;
        node.properties = properties;
        Ok(())
    }

    // =========================================================================
    // Fingerprint
    // =========================================================================

    /// Content hash of the subtree at `id`.
    ///
    /// Covers paths, kinds, properties and child order. Ids, locks, states
    /// and stamps are left out.
    pub fn fingerprint_of(&self, id: NodeId) -> Fingerprint {
        let entries: Vec<(String, String)> = self
            .pre_order(id)
            .into_iter()
            .filter_map(|n| self.get(n))
            .map(|node| {
                let children: Vec<&str> = node
                    .children
                    .iter()
                    .filter_map(|c| self.get(*c))
                    .map(|c| c.name.as_str())
                    .collect();
                let content = serde_json::json!({
                    "kind": node.kind,
                    "properties": node.properties,
                    "children": children,
                });
                (node.path.to_string(), content.to_string())
            })
            .collect();
        Fingerprint::compute(&entries)
    }

    /// Content hash of the whole tree.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint_of(self.root)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ConfigNode, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::NotFound(id))
    }

    fn attach(&mut self, parent: NodeId, id: NodeId, position: Option<usize>) -> Result<(), TreeError> {
        let parent = self.node_mut(parent)?;
        let at = position
            .unwrap_or(parent.children.len())
            .min(parent.children.len());
        parent.children.insert(at, id);
        Ok(())
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.get(id).and_then(|n| n.parent);
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
    }
}
