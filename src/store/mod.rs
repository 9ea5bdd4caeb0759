//! store
//!
//! In-memory tree store with atomic sessions.
//!
//! # Architecture
//!
//! The store holds every channel: a Preview tier, a Live tier and the host
//! binding that activates the channel. All reads and writes go through a
//! [`Session`]:
//!
//! 1. [`MemoryStore::begin`] takes the store mutex and clones the state
//!    into a private working copy
//! 2. The caller mutates the working copy
//! 3. [`Session::save`] swaps the working copy in as the single commit point,
//!    releases the mutex, then notifies [`StoreObserver`]s
//!
//! Dropping a session (or calling [`Session::discard`]) leaves the store
//! exactly as it was. Holding the mutex for the life of the session gives
//! every request read-after-write consistency; sessions never interleave.
//!
//! # Invariants
//!
//! - Nothing a session writes is visible to other sessions before `save`
//! - Observers only ever see committed state
//! - Channel ids are unique
//!
//! # Example
//!
//! ```
//! use sitestage::store::{Channel, MemoryStore, Tier};
//! use sitestage::core::types::{ChannelId, RelPath};
//!
//! let store = MemoryStore::new();
//! let id = ChannelId::new("intranet").unwrap();
//! store.add_channel(Channel::new(id.clone())).unwrap();
//!
//! let mut session = store.begin();
//! let channel = session.channel_mut(&id).unwrap();
//! channel.preview.ensure_path(&RelPath::parse("workspace/pages").unwrap()).unwrap();
//! session.save();
//!
//! let snapshot = store.snapshot();
//! let channel = snapshot.channel(&id).unwrap();
//! assert!(channel.tier(Tier::Preview).lookup(&RelPath::parse("workspace/pages").unwrap()).is_some());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::tree::{Tree, TreeError};
use crate::core::types::{ChannelId, RelPath};

/// Errors from store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("channel already exists: {0}")]
    ChannelExists(ChannelId),

    #[error("tree error: {0}")]
    Tree(#[from] TreeError),
}

/// Which of the two tiers of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Preview,
    Live,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Preview => write!(f, "preview"),
            Tier::Live => write!(f, "live"),
        }
    }
}

/// Host and mount path a channel is served under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBinding {
    pub host: Option<String>,
    pub mount: String,
}

impl Default for HostBinding {
    fn default() -> Self {
        Self {
            host: None,
            mount: "/".to_string(),
        }
    }
}

/// A configuration root with its Preview/Live pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub binding: HostBinding,
    pub preview: Tree,
    pub live: Tree,
}

impl Channel {
    /// An empty channel: both tiers hold only their root.
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            binding: HostBinding::default(),
            preview: Tree::new(),
            live: Tree::new(),
        }
    }

    /// A channel whose Live tier is `live` and whose Preview tier starts as
    /// an identical copy of it, with its own node ids.
    pub fn from_live(id: ChannelId, live: Tree) -> Result<Self, TreeError> {
        let mut preview = Tree::new();
        let preview_root = preview.root_id();
        for child in live.children(live.root_id())? {
            let node = live.node(*child)?;
            preview.copy_subtree_from(&live, node.id, preview_root, node.name.clone(), None)?;
        }
        Ok(Self {
            id,
            binding: HostBinding::default(),
            preview,
            live,
        })
    }

    /// Attach a host binding.
    pub fn with_binding(mut self, binding: HostBinding) -> Self {
        self.binding = binding;
        self
    }

    /// Borrow one tier.
    pub fn tier(&self, tier: Tier) -> &Tree {
        match tier {
            Tier::Preview => &self.preview,
            Tier::Live => &self.live,
        }
    }

    /// Borrow one tier mutably.
    pub fn tier_mut(&mut self, tier: Tier) -> &mut Tree {
        match tier {
            Tier::Preview => &mut self.preview,
            Tier::Live => &mut self.live,
        }
    }
}

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    channels: BTreeMap<ChannelId, Channel>,
}

impl StoreState {
    /// Look up a channel.
    pub fn channel(&self, id: &ChannelId) -> Result<&Channel, StoreError> {
        self.channels
            .get(id)
            .ok_or_else(|| StoreError::ChannelNotFound(id.clone()))
    }

    /// Look up a channel mutably.
    pub fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut Channel, StoreError> {
        self.channels
            .get_mut(id)
            .ok_or_else(|| StoreError::ChannelNotFound(id.clone()))
    }

    /// Ids of all channels.
    pub fn channel_ids(&self) -> impl Iterator<Item = &ChannelId> {
        self.channels.keys()
    }

    fn insert(&mut self, channel: Channel) -> Result<(), StoreError> {
        if self.channels.contains_key(&channel.id) {
            return Err(StoreError::ChannelExists(channel.id));
        }
        self.channels.insert(channel.id.clone(), channel);
        Ok(())
    }
}

/// What a commit touched, handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitNotice {
    /// `(channel, path)` pairs recorded by the session, in order.
    pub paths: Vec<(ChannelId, RelPath)>,
}

impl CommitNotice {
    /// Distinct channels in the notice.
    pub fn channels(&self) -> BTreeSet<&ChannelId> {
        self.paths.iter().map(|(c, _)| c).collect()
    }
}

/// Receives commit notifications, e.g. to invalidate a cache.
pub trait StoreObserver: Send + Sync {
    fn on_commit(&self, notice: &CommitNotice);
}

type Observers = RwLock<Vec<Arc<dyn StoreObserver>>>;

/// In-memory tree store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    observers: Observers,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ChannelExists` if the id is taken.
    pub fn add_channel(&self, channel: Channel) -> Result<(), StoreError> {
        tracing::debug!(channel = %channel.id, "adding channel");
        self.state.lock().insert(channel)
    }

    /// Register a commit observer.
    pub fn add_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.observers.write().push(observer);
    }

    /// Start a session. Blocks while another session is open.
    pub fn begin(&self) -> Session<'_> {
        let guard = self.state.lock();
        let working = guard.clone();
        Session {
            guard,
            working,
            touched: Vec::new(),
            observers: &self.observers,
        }
    }

    /// Clone of the committed state.
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }
}

/// A unit of work against the store.
///
/// Reads see the session's own writes. Nothing is visible outside until
/// [`Session::save`].
pub struct Session<'a> {
    guard: MutexGuard<'a, StoreState>,
    working: StoreState,
    touched: Vec<(ChannelId, RelPath)>,
    observers: &'a Observers,
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("touched", &self.touched)
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    /// The session's view of the store.
    pub fn state(&self) -> &StoreState {
        &self.working
    }

    /// Look up a channel in the working copy.
    pub fn channel(&self, id: &ChannelId) -> Result<&Channel, StoreError> {
        self.working.channel(id)
    }

    /// Look up a channel in the working copy, mutably.
    pub fn channel_mut(&mut self, id: &ChannelId) -> Result<&mut Channel, StoreError> {
        self.working.channel_mut(id)
    }

    /// Borrow two distinct channels, the first mutably.
    pub fn channel_pair(
        &mut self,
        target: &ChannelId,
        source: &ChannelId,
    ) -> Result<(&mut Channel, Option<&Channel>), StoreError> {
        if target == source {
            return Ok((self.working.channel_mut(target)?, None));
        }
        self.working.channel(source)?;
        self.working.channel(target)?;
        let mut target_ref = None;
        let mut source_ref = None;
        for (id, channel) in self.working.channels.iter_mut() {
            if id == target {
                target_ref = Some(channel);
            } else if id == source {
                source_ref = Some(&*channel);
            }
        }
        match target_ref {
            Some(t) => Ok((t, source_ref)),
            None => Err(StoreError::ChannelNotFound(target.clone())),
        }
    }

    /// Record a changed path for the commit notice.
    pub fn touch(&mut self, channel: &ChannelId, path: RelPath) {
        let entry = (channel.clone(), path);
        if !self.touched.contains(&entry) {
            self.touched.push(entry);
        }
    }

    /// Paths recorded so far.
    pub fn touched(&self) -> &[(ChannelId, RelPath)] {
        &self.touched
    }

    /// Check if the working copy differs from the committed state.
    pub fn has_pending_changes(&self) -> bool {
        self.working != *self.guard
    }

    /// Commit the working copy.
    ///
    /// Observers are notified after the store mutex is released, so they may
    /// open sessions of their own.
    pub fn save(self) -> CommitNotice {
        let Session {
            mut guard,
            working,
            touched,
            observers,
        } = self;
        *guard = working;
        drop(guard);

        let notice = CommitNotice { paths: touched };
        tracing::debug!(paths = notice.paths.len(), "session committed");
        for observer in observers.read().iter() {
            observer.on_commit(&notice);
        }
        notice
    }

    /// Throw the working copy away.
    pub fn discard(self) {
        tracing::debug!(paths = self.touched.len(), "session discarded");
    }
}
