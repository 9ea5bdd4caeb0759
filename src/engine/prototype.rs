//! engine::prototype
//!
//! Re-apply a prototype to an existing page.
//!
//! # Architecture
//!
//! The page is not edited in place. A fresh instance of the prototype is
//! created next to it, the page's container items migrate into the
//! instance, sitemap items are re-pointed, and the old page goes through the
//! normal delete path (delete marker with a Live counterpart, removal
//! otherwise).
//!
//! # Placement
//!
//! Items are collected in pre-order of the old page, skipping anything under
//! a delete marker, and land in one destination container:
//!
//! 1. the prototype's primary container slot, when it names one that exists
//! 2. otherwise the first container of the new instance in pre-order
//! 3. otherwise none: items are removed together with the catalog
//!    components they exclusively own
//!
//! An item whose name is taken in the destination gets the next free
//! suffix (`c` becomes `c-1`).

use serde_json::Value;

use super::coordinator::StagingCoordinator;
use super::errors::StagingError;
use super::journal::StepKind;
use crate::core::tree::Tree;
use crate::core::types::{
    EditableState, NodeId, NodeKind, RelPath, PAGE_KEY, PRIMARY_CONTAINER_KEY,
};
use crate::store::Tier;

/// Prototype re-application.
pub struct PrototypeReconciler;

impl PrototypeReconciler {
    /// Replace `page` by a new instance of `prototype`, carrying the page's
    /// container items over. Returns the id of the new page.
    ///
    /// # Errors
    ///
    /// - [`StagingError::ItemNotInPreview`] if either node is missing or hidden
    /// - [`StagingError::ItemNotCorrectLocation`] if `page` is not a workspace
    ///   page or `prototype` is not a prototype
    /// - [`StagingError::ItemAlreadyLocked`] if another user holds the page
    pub fn reapply(
        coord: &mut StagingCoordinator<'_>,
        page: NodeId,
        prototype: NodeId,
    ) -> Result<NodeId, StagingError> {
        let old = coord.visible(page)?;
        let (old_path, old_name, old_kind) = (old.path.clone(), old.name.clone(), old.kind);
        let parent = old
            .parent
            .ok_or_else(|| StagingError::ItemNotCorrectLocation(old_path.clone()))?;
        if old_kind != NodeKind::Page {
            return Err(StagingError::ItemNotCorrectLocation(old_path));
        }
        StagingCoordinator::require_mutable(&old_path)?;

        let proto = coord.visible(prototype)?;
        if proto.kind != NodeKind::Prototype {
            return Err(StagingError::ItemNotCorrectLocation(proto.path.clone()));
        }
        let proto_path = proto.path.clone();
        let primary = proto.reference(PRIMARY_CONTAINER_KEY);

        coord.lock_for_write(page, None)?;

        let name = coord.free_name(parent, old_name.as_str())?;
        let parent_path = coord.preview().node(parent)?.path.clone();
        coord.check_outside(&parent_path.join(&name))?;
        let position = coord.preview().position(page).map(|p| p + 1);
        let instance = coord.instantiate(&proto_path, parent, name, position)?;
        let instance_path = coord.preview().node(instance)?.path.clone();

        let items = Self::live_items(coord.preview(), page);
        match Self::destination(coord.preview(), instance, &instance_path, primary.as_ref()) {
            Some(destination) => Self::migrate(coord, &items, destination)?,
            None => Self::drop_items(coord, &items)?,
        }

        Self::repoint_sitemap(coord, &old_path, &instance_path)?;
        coord.delete(page)?;

        tracing::info!(
            page = %old_path,
            prototype = %proto_path,
            instance = %instance_path,
            items = items.len(),
            "reapplied prototype"
        );
        Ok(instance)
    }

    /// Container that receives the migrated items.
    fn destination(
        tree: &Tree,
        instance: NodeId,
        instance_path: &RelPath,
        primary: Option<&RelPath>,
    ) -> Option<NodeId> {
        let is_container =
            |id: &NodeId| tree.get(*id).is_some_and(|n| n.kind.capabilities().is_container);

        let slot = primary
            .and_then(|p| tree.lookup(&instance_path.join_path(p)))
            .filter(is_container);
        if slot.is_some() {
            return slot;
        }
        if let Some(p) = primary {
            tracing::warn!(slot = %p, "primary container slot not found, using first container");
        }
        tree.pre_order(instance)
            .into_iter()
            .skip(1)
            .find(|id| is_container(id))
    }

    /// Container items of `page` in pre-order, ignoring deleted subtrees.
    fn live_items(tree: &Tree, page: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![page];
        while let Some(id) = stack.pop() {
            let Some(node) = tree.get(id) else { continue };
            if node.is_deleted() {
                continue;
            }
            if node.kind == NodeKind::ContainerItem && id != page {
                out.push(id);
                continue;
            }
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    fn migrate(
        coord: &mut StagingCoordinator<'_>,
        items: &[NodeId],
        destination: NodeId,
    ) -> Result<(), StagingError> {
        for item in items {
            let node = coord.preview().node(*item)?;
            let (from, base) = (node.path.clone(), node.name.clone());
            let name = coord.free_name(destination, base.as_str())?;
            coord
                .preview_mut()
                .move_node(*item, destination, name, None)?;
            coord.preview_mut().set_state(*item, EditableState::Created)?;

            let to = coord.preview().node(*item)?.path.clone();
            tracing::debug!(from = %from, to = %to, "migrated container item");
            coord.journal().append(StepKind::NodeMoved { from, to });
        }
        Ok(())
    }

    fn drop_items(coord: &mut StagingCoordinator<'_>, items: &[NodeId]) -> Result<(), StagingError> {
        for item in items {
            let path = coord.preview().node(*item)?.path.clone();
            let owned = coord.owned_artifacts(*item);
            coord.preview_mut().remove_subtree(*item)?;
            coord.journal().append(StepKind::NodeRemoved {
                tier: Tier::Preview,
                path: path.clone(),
            });
            tracing::debug!(path = %path, "dropped container item, prototype has no container");
            coord.cascade(owned)?;
        }
        Ok(())
    }

    /// Point every workspace sitemap item that referenced `old` at `new`.
    fn repoint_sitemap(
        coord: &mut StagingCoordinator<'_>,
        old: &RelPath,
        new: &RelPath,
    ) -> Result<(), StagingError> {
        let preview = coord.preview();
        let referrers: Vec<NodeId> = preview
            .pre_order(preview.root_id())
            .into_iter()
            .filter_map(|id| preview.get(id))
            .filter(|n| n.kind == NodeKind::SitemapItem && n.path.is_workspace())
            .filter(|n| !n.is_deleted() && n.reference(PAGE_KEY).as_ref() == Some(old))
            .map(|n| n.id)
            .collect();

        for item in referrers {
            coord.lock_for_write(item, None)?;
            coord
                .preview_mut()
                .set_property(item, PAGE_KEY, Value::String(new.to_string()))?;
            coord.mark_changed(item)?;
            let path = coord.preview().node(item)?.path.clone();
            coord.journal().append(StepKind::NodeUpdated { path });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::tree::NewNode;
    use crate::core::types::{ChannelId, NodeName, UserId, COMPONENT_KEY};
    use crate::engine::journal::Journal;
    use crate::store::Channel;

    fn path(s: &str) -> RelPath {
        RelPath::parse(s).unwrap()
    }

    fn name(s: &str) -> NodeName {
        NodeName::new(s).unwrap()
    }

    fn child(tree: &mut Tree, parent: NodeId, n: &str, kind: NodeKind) -> NodeId {
        tree.add_child(parent, NewNode::new(name(n), kind), None)
            .unwrap()
    }

    fn names(tree: &Tree, p: &str) -> Vec<String> {
        let id = tree.lookup(&path(p)).unwrap();
        tree.children(id)
            .unwrap()
            .iter()
            .map(|c| tree.node(*c).unwrap().name.to_string())
            .collect()
    }

    /// Preview with page `workspace/pages/p` holding C1=[a,b], C2=[c], a
    /// sitemap item pointing at it, and prototypes `single` (D=[c]),
    /// `primary` (X, Y with Y primary) and `bare` (no container).
    fn channel() -> Channel {
        let mut preview = Tree::new();
        let (pages, _) = preview.ensure_path(&path("workspace/pages")).unwrap();
        let p = child(&mut preview, pages, "p", NodeKind::Page);
        let c1 = child(&mut preview, p, "c1", NodeKind::Container);
        let c2 = child(&mut preview, p, "c2", NodeKind::Container);
        child(&mut preview, c1, "a", NodeKind::ContainerItem);
        child(&mut preview, c1, "b", NodeKind::ContainerItem);
        child(&mut preview, c2, "c", NodeKind::ContainerItem);

        let (sitemap, _) = preview.ensure_path(&path("workspace/sitemap")).unwrap();
        let item = child(&mut preview, sitemap, "p", NodeKind::SitemapItem);
        preview
            .set_property(item, PAGE_KEY, "workspace/pages/p".into())
            .unwrap();

        let (protos, _) = preview.ensure_path(&path("prototypes")).unwrap();
        let single = child(&mut preview, protos, "single", NodeKind::Prototype);
        let d = child(&mut preview, single, "d", NodeKind::Container);
        child(&mut preview, d, "c", NodeKind::ContainerItem);

        let primary = child(&mut preview, protos, "primary", NodeKind::Prototype);
        child(&mut preview, primary, "x", NodeKind::Container);
        child(&mut preview, primary, "y", NodeKind::Container);
        preview
            .set_property(primary, PRIMARY_CONTAINER_KEY, "y".into())
            .unwrap();

        child(&mut preview, protos, "bare", NodeKind::Prototype);

        let mut channel = Channel::new(ChannelId::new("intranet").unwrap());
        channel.preview = preview;
        channel
    }

    fn reapply(channel: &mut Channel, proto: &str) -> NodeId {
        let config = Config::default();
        let mut journal = Journal::new("reapply_prototype");
        let user = UserId::new("alice").unwrap();
        let page = channel.preview.lookup(&path("workspace/pages/p")).unwrap();
        let proto = channel
            .preview
            .lookup(&path(&format!("prototypes/{proto}")))
            .unwrap();
        let mut coord = StagingCoordinator::new(channel, &user, &config, &mut journal);
        PrototypeReconciler::reapply(&mut coord, page, proto).unwrap()
    }

    #[test]
    fn items_concatenate_into_single_container() {
        let mut channel = channel();
        let instance = reapply(&mut channel, "single");
        let instance_path = channel.preview.node(instance).unwrap().path.clone();
        assert_eq!(instance_path, path("workspace/pages/p-1"));
        assert_eq!(
            names(&channel.preview, "workspace/pages/p-1/d"),
            vec!["c", "a", "b", "c-1"]
        );
        assert!(channel.preview.lookup(&path("workspace/pages/p")).is_none());
    }

    #[test]
    fn primary_slot_wins() {
        let mut channel = channel();
        reapply(&mut channel, "primary");
        assert!(names(&channel.preview, "workspace/pages/p-1/x").is_empty());
        assert_eq!(
            names(&channel.preview, "workspace/pages/p-1/y"),
            vec!["a", "b", "c"]
        );
        let page = channel.preview.lookup_node(&path("workspace/pages/p-1")).unwrap();
        assert!(page.property_str(PRIMARY_CONTAINER_KEY).is_none());
    }

    #[test]
    fn items_without_container_are_dropped_with_components() {
        let mut channel = channel();
        let (components, _) = channel
            .preview
            .ensure_path(&path("workspace/components"))
            .unwrap();
        child(&mut channel.preview, components, "promo", NodeKind::Component);
        let a = channel
            .preview
            .lookup(&path("workspace/pages/p/c1/a"))
            .unwrap();
        channel
            .preview
            .set_property(a, COMPONENT_KEY, "workspace/components/promo".into())
            .unwrap();

        reapply(&mut channel, "bare");
        let page = channel.preview.lookup(&path("workspace/pages/p-1")).unwrap();
        assert!(channel.preview.children(page).unwrap().is_empty());
        assert!(channel
            .preview
            .lookup(&path("workspace/components/promo"))
            .is_none());
    }

    #[test]
    fn sitemap_items_follow_the_new_page() {
        let mut channel = channel();
        reapply(&mut channel, "single");
        let item = channel
            .preview
            .lookup_node(&path("workspace/sitemap/p"))
            .unwrap();
        assert_eq!(item.property_str(PAGE_KEY), Some("workspace/pages/p-1"));
        assert_eq!(item.state, EditableState::Changed);
    }

    #[test]
    fn page_with_live_counterpart_is_marked_deleted() {
        let mut channel = channel();
        channel.live = channel.preview.clone();
        reapply(&mut channel, "single");
        let old = channel
            .preview
            .lookup_node(&path("workspace/pages/p"))
            .unwrap();
        assert_eq!(old.state, EditableState::Deleted);
    }
}
