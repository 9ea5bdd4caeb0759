//! engine::runner
//!
//! The staging engine: the single entry point for every mutation.
//!
//! # Architecture
//!
//! Every mutating call follows the same lifecycle:
//!
//! ```text
//! begin session -> operation -> journal -> ChangeEvent -> dispatch -> save
//! ```
//!
//! The operation works on the session's private working copy through a
//! [`StagingCoordinator`]. Once it returns, the runner builds one
//! [`ChangeEvent`] with before/after snapshots of the subject node and the
//! journal steps, and dispatches it. Only after every listener has returned
//! without a veto is the session saved.
//!
//! # Invariants
//!
//! - There is exactly one commit point per call: `Session::save`
//! - A failed operation or a veto discards the session; the store is
//!   unchanged and the journal is marked rolled back
//! - Listeners only ever see the working copy, never committed state of
//!   the call in progress
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sitestage::core::config::Config;
//! use sitestage::core::types::{ChannelId, NodeKind, UserId};
//! use sitestage::engine::{ChangeEventBus, Context, CreateSpec, Engine, Scope};
//! use sitestage::store::{Channel, MemoryStore};
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = Engine::new(store, Config::default(), ChangeEventBus::new());
//! let channel = ChannelId::new("intranet").unwrap();
//! engine.register_channel(Channel::new(channel.clone())).unwrap();
//!
//! let ctx = Context::new(UserId::new("alice").unwrap());
//! let id = engine
//!     .create(&ctx, &channel, CreateSpec::new("news", NodeKind::SitemapItem), None)
//!     .unwrap();
//! assert_eq!(engine.node(&channel, id).unwrap().path.to_string(), "workspace/sitemap/news");
//!
//! engine.publish(&ctx, &Scope::new(channel.clone(), [ctx.user.clone()])).unwrap();
//! assert!(engine.pending_changes(&channel).unwrap().is_empty());
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::coordinator::{CreateSpec, Scope, StagingCoordinator, Update};
use super::errors::StagingError;
use super::events::{ChangeEvent, ChangeEventBus, ChangeKind, NodeSnapshot};
use super::journal::Journal;
use super::lock::{LockInfo, LockManager, LockOutcome};
use super::prototype::PrototypeReconciler;
use super::resolver::DependencyResolver;
use super::Context;
use crate::core::config::Config;
use crate::core::tree::ConfigNode;
use crate::core::types::{ChannelId, Fingerprint, NodeId, RelPath, UserId, VersionStamp};
use crate::store::{Channel, HostBinding, MemoryStore, Session, Tier};

/// Staging engine over one store.
#[derive(Debug)]
pub struct Engine {
    store: Arc<MemoryStore>,
    config: Config,
    bus: ChangeEventBus,
}

impl Engine {
    /// Create an engine. Listeners are fixed for the engine's lifetime.
    pub fn new(store: Arc<MemoryStore>, config: Config, bus: ChangeEventBus) -> Self {
        Self { store, config, bus }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add a channel to the store. A channel without its own host binding
    /// gets the configured one.
    pub fn register_channel(&self, channel: Channel) -> Result<(), StagingError> {
        let channel = if channel.binding == HostBinding::default() {
            let binding = HostBinding {
                host: self.config.host().map(str::to_string),
                mount: self.config.mount().to_string(),
            };
            channel.with_binding(binding)
        } else {
            channel
        };
        self.store.add_channel(channel)?;
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create a node. `parent` defaults to the kind's collection folder.
    pub fn create(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        spec: CreateSpec,
        parent: Option<NodeId>,
    ) -> Result<NodeId, StagingError> {
        self.staged(ctx, ChangeKind::Create, channel, None, |coord| {
            let id = coord.create(spec, parent)?;
            Ok((id, Some(id)))
        })
    }

    /// Apply an update: lock, move, rename, then property changes.
    pub fn update(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        update: &Update,
    ) -> Result<(), StagingError> {
        self.staged(ctx, ChangeKind::Update, channel, Some(update.id), |coord| {
            coord.update(update)?;
            Ok(((), Some(update.id)))
        })
    }

    /// Rename a node in place.
    pub fn rename(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        id: NodeId,
        name: &str,
    ) -> Result<(), StagingError> {
        self.staged(ctx, ChangeKind::Move, channel, Some(id), |coord| {
            coord.rename(id, name)?;
            Ok(((), Some(id)))
        })
    }

    /// Move a node. `parent` defaults to the kind's collection folder.
    pub fn move_node(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        id: NodeId,
        parent: Option<NodeId>,
    ) -> Result<(), StagingError> {
        self.staged(ctx, ChangeKind::Move, channel, Some(id), |coord| {
            coord.move_to(id, parent)?;
            Ok(((), Some(id)))
        })
    }

    /// Delete a node.
    pub fn delete(&self, ctx: &Context, channel: &ChannelId, id: NodeId) -> Result<(), StagingError> {
        self.staged(ctx, ChangeKind::Delete, channel, Some(id), |coord| {
            coord.delete(id)?;
            Ok(((), Some(id)))
        })
    }

    /// Copy `id` from the Preview of `source` into `target`, together with
    /// the dependencies `target` lacks. `source` and `target` may be the same
    /// channel.
    pub fn copy(
        &self,
        ctx: &Context,
        source: &ChannelId,
        id: NodeId,
        target: &ChannelId,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<NodeId, StagingError> {
        self.run(ctx, ChangeKind::Copy, target, None, |session, journal| {
            let (target_channel, source_channel) = session.channel_pair(target, source)?;
            let snapshot;
            let source_tree = match source_channel {
                Some(channel) => &channel.preview,
                None => {
                    snapshot = target_channel.preview.clone();
                    &snapshot
                }
            };
            let mut coord =
                StagingCoordinator::new(target_channel, &ctx.user, &self.config, journal);
            let copied = DependencyResolver::copy(&mut coord, source_tree, id, parent, name)?;
            Ok((copied, Some(copied)))
        })
    }

    /// Publish the scope's pending changes. Returns the number of subtrees
    /// resolved.
    pub fn publish(&self, ctx: &Context, scope: &Scope) -> Result<usize, StagingError> {
        self.staged(ctx, ChangeKind::Publish, &scope.channel, None, |coord| {
            Ok((coord.publish(scope)?, None))
        })
    }

    /// Discard the scope's pending changes. Returns the number of subtrees
    /// resolved.
    pub fn discard_changes(&self, ctx: &Context, scope: &Scope) -> Result<usize, StagingError> {
        self.staged(ctx, ChangeKind::Discard, &scope.channel, None, |coord| {
            Ok((coord.discard(scope)?, None))
        })
    }

    /// Replace `page` by a new instance of `prototype`. Returns the new page.
    pub fn reapply_prototype(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        page: NodeId,
        prototype: NodeId,
    ) -> Result<NodeId, StagingError> {
        self.staged(ctx, ChangeKind::ReapplyPrototype, channel, Some(page), |coord| {
            let instance = PrototypeReconciler::reapply(coord, page, prototype)?;
            Ok((instance, Some(instance)))
        })
    }

    /// Take (or refresh) the lock protecting `id` without changing content.
    pub fn acquire_lock(
        &self,
        ctx: &Context,
        channel: &ChannelId,
        id: NodeId,
        expected: Option<VersionStamp>,
    ) -> Result<LockOutcome, StagingError> {
        self.staged(ctx, ChangeKind::Lock, channel, Some(id), |coord| {
            let path = coord.visible(id)?.path.clone();
            StagingCoordinator::require_mutable(&path)?;
            Ok((coord.lock_for_write(id, expected)?, Some(id)))
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// A Preview node by id.
    pub fn node(&self, channel: &ChannelId, id: NodeId) -> Result<ConfigNode, StagingError> {
        let state = self.store.snapshot();
        let node = state
            .channel(channel)?
            .preview
            .get(id)
            .cloned()
            .ok_or_else(|| StagingError::ItemNotInPreview(id.to_string()))?;
        Ok(node)
    }

    /// A node of either tier by path.
    pub fn lookup(
        &self,
        channel: &ChannelId,
        tier: Tier,
        path: &RelPath,
    ) -> Result<Option<ConfigNode>, StagingError> {
        let state = self.store.snapshot();
        Ok(state.channel(channel)?.tier(tier).lookup_node(path).cloned())
    }

    /// Effective lock on a Preview node.
    pub fn lock_info(&self, channel: &ChannelId, id: NodeId) -> Result<Option<LockInfo>, StagingError> {
        let state = self.store.snapshot();
        LockManager::lock_info(&state.channel(channel)?.preview, id)
    }

    /// Explicitly locked paths per user.
    pub fn pending_changes(
        &self,
        channel: &ChannelId,
    ) -> Result<BTreeMap<UserId, Vec<RelPath>>, StagingError> {
        let state = self.store.snapshot();
        let mut out: BTreeMap<UserId, Vec<RelPath>> = BTreeMap::new();
        for node in state.channel(channel)?.preview.locked_nodes() {
            if let Some(lock) = &node.lock {
                out.entry(lock.owner.clone())
                    .or_default()
                    .push(node.path.clone());
            }
        }
        Ok(out)
    }

    /// Content hash of one tier.
    pub fn fingerprint(&self, channel: &ChannelId, tier: Tier) -> Result<Fingerprint, StagingError> {
        let state = self.store.snapshot();
        Ok(state.channel(channel)?.tier(tier).fingerprint())
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run `op` on a coordinator bound to `channel`.
    fn staged<T, F>(
        &self,
        ctx: &Context,
        kind: ChangeKind,
        channel: &ChannelId,
        subject: Option<NodeId>,
        op: F,
    ) -> Result<T, StagingError>
    where
        F: FnOnce(&mut StagingCoordinator<'_>) -> Result<(T, Option<NodeId>), StagingError>,
    {
        self.run(ctx, kind, channel, subject, |session, journal| {
            let target = session.channel_mut(channel)?;
            let mut coord = StagingCoordinator::new(target, &ctx.user, &self.config, journal);
            op(&mut coord)
        })
    }

    /// Session, event and commit handling shared by all mutations.
    ///
    /// `op` returns its result and the node to snapshot as "after".
    fn run<T, F>(
        &self,
        ctx: &Context,
        kind: ChangeKind,
        channel: &ChannelId,
        subject: Option<NodeId>,
        op: F,
    ) -> Result<T, StagingError>
    where
        F: FnOnce(&mut Session<'_>, &mut Journal) -> Result<(T, Option<NodeId>), StagingError>,
    {
        let mut journal = Journal::new(kind.as_str());
        let mut session = self.store.begin();
        let before = subject.and_then(|id| Self::snapshot(&session, channel, id));

        let (value, after) = match op(&mut session, &mut journal) {
            Ok(outcome) => outcome,
            Err(err) => {
                journal.rollback();
                session.discard();
                tracing::info!(
                    op = %kind,
                    user = %ctx.user,
                    channel = %channel,
                    client = err.is_client(),
                    "operation failed: {}",
                    err
                );
                return Err(err);
            }
        };

        let mut event = ChangeEvent::new(kind, ctx.user.clone(), channel.clone());
        event.before = before;
        event.after = after.and_then(|id| Self::snapshot(&session, channel, id));
        event.steps = journal.steps.clone();
        if let Err(err) = self.bus.dispatch(&mut event) {
            journal.rollback();
            session.discard();
            return Err(err);
        }

        for path in journal.touched_paths() {
            session.touch(channel, path);
        }
        session.save();
        journal.commit();

        tracing::info!(
            op = %kind,
            op_id = %journal.op_id,
            user = %ctx.user,
            channel = %channel,
            steps = journal.steps.len(),
            "committed"
        );
        Ok(value)
    }

    fn snapshot(session: &Session<'_>, channel: &ChannelId, id: NodeId) -> Option<NodeSnapshot> {
        session
            .channel(channel)
            .ok()
            .and_then(|c| c.preview.get(id))
            .map(NodeSnapshot::from)
    }
}
