//! engine
//!
//! Multi-user staging of configuration changes: Preview edits under locks,
//! publish to Live, discard back to Live.
//!
//! # Architecture
//!
//! Every mutation runs through [`Engine`], which owns the lifecycle:
//!
//! ```text
//! begin session -> operation -> ChangeEvent -> listeners -> save
//! ```
//!
//! 1. **Session**: the store clones its state into a private working copy
//! 2. **Operation**: a [`StagingCoordinator`] (or the copy and prototype
//!    components built on it) edits the working copy, checking every write
//!    against [`LockManager`] and recording steps in a [`Journal`]
//! 3. **Event**: one [`ChangeEvent`] with before/after snapshots goes to the
//!    [`ChangeEventBus`]; any listener may veto
//! 4. **Save**: the single commit point. Errors and vetoes discard instead
//!
//! # Invariants
//!
//! - Only the Preview tier is edited by staging calls; Live changes only on
//!   publish
//! - Every pending change is owned by exactly one user, through an explicit
//!   lock on the node or on an ancestor
//! - When locks nest, the outermost one wins
//! - A failed call leaves no trace in the store
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sitestage::core::config::Config;
//! use sitestage::core::types::{ChannelId, NodeKind, UserId};
//! use sitestage::engine::{ChangeEventBus, Context, CreateSpec, Engine, StagingError};
//! use sitestage::store::{Channel, MemoryStore};
//!
//! let engine = Engine::new(Arc::new(MemoryStore::new()), Config::default(), ChangeEventBus::new());
//! let channel = ChannelId::new("intranet").unwrap();
//! engine.register_channel(Channel::new(channel.clone())).unwrap();
//!
//! let alice = Context::new(UserId::new("alice").unwrap());
//! let bob = Context::new(UserId::new("bob").unwrap());
//! let page = engine
//!     .create(&alice, &channel, CreateSpec::new("home", NodeKind::Page), None)
//!     .unwrap();
//!
//! let err = engine.delete(&bob, &channel, page).unwrap_err();
//! assert!(matches!(err, StagingError::ItemAlreadyLocked { .. }));
//! ```

pub mod coordinator;
pub mod errors;
pub mod events;
pub mod journal;
pub mod lock;
pub mod prototype;
pub mod resolver;
pub mod runner;

pub use coordinator::{CreateSpec, Scope, StagingCoordinator, Update};
pub use errors::{ErrorKind, StagingError};
pub use events::{
    ChangeEvent, ChangeEventBus, ChangeKind, ChangeListener, ListenerError, NodeSnapshot,
};
pub use journal::{Journal, JournalStep, OpId, OpPhase, StepKind};
pub use lock::{LockInfo, LockManager, LockOutcome};
pub use prototype::PrototypeReconciler;
pub use resolver::DependencyResolver;
pub use runner::Engine;

use crate::core::types::UserId;

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// The acting user; owner of every lock the call takes.
    pub user: UserId,
}

impl Context {
    pub fn new(user: UserId) -> Self {
        Self { user }
    }
}
