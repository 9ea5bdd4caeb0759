//! engine::events
//!
//! Synchronous change events with listener veto.
//!
//! # Architecture
//!
//! Listeners are registered on a [`ChangeEventBus`] that is handed to the
//! engine at construction; there is no global registry. For every mutating
//! call the engine builds one [`ChangeEvent`] after the operation has run
//! against the session's working copy, and dispatches it to all listeners
//! in registration order.
//!
//! A listener vetoes by attaching a [`ListenerError`] to the event.
//! Dispatch stops at the first veto and the engine discards the session.
//! Only when every listener has returned without a veto does the engine
//! commit.
//!
//! # Example
//!
//! ```
//! use sitestage::engine::events::{ChangeEventBus, ChangeEvent, ChangeKind, ListenerError};
//! use sitestage::engine::StagingError;
//!
//! let mut bus = ChangeEventBus::new();
//! bus.register(|event: &mut ChangeEvent| {
//!     if event.kind == ChangeKind::Delete {
//!         event.veto(ListenerError::Client(StagingError::InvalidName("protected".into())));
//!     }
//! });
//! assert_eq!(bus.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::errors::StagingError;
use super::journal::JournalStep;
use crate::core::tree::{ConfigNode, Properties};
use crate::core::types::{ChannelId, EditableState, NodeId, NodeKind, RelPath, UserId};

/// What kind of mutation an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Move,
    Delete,
    Copy,
    Publish,
    Discard,
    ReapplyPrototype,
    Lock,
}

impl ChangeKind {
    /// Operation name used in journals and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Update => "update",
            ChangeKind::Move => "move",
            ChangeKind::Delete => "delete",
            ChangeKind::Copy => "copy",
            ChangeKind::Publish => "publish",
            ChangeKind::Discard => "discard",
            ChangeKind::ReapplyPrototype => "reapply_prototype",
            ChangeKind::Lock => "lock",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable view of a node at one point of the operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub path: RelPath,
    pub kind: NodeKind,
    pub properties: Properties,
    pub state: EditableState,
    pub lock_owner: Option<UserId>,
}

impl From<&ConfigNode> for NodeSnapshot {
    fn from(node: &ConfigNode) -> Self {
        Self {
            id: node.id,
            path: node.path.clone(),
            kind: node.kind,
            properties: node.properties.clone(),
            state: node.state,
            lock_owner: node.lock.as_ref().map(|l| l.owner.clone()),
        }
    }
}

/// Reason a listener rejected a change.
#[derive(Debug)]
pub enum ListenerError {
    /// A recognized client error, surfaced to the caller as-is.
    Client(StagingError),
    /// Any other failure, surfaced as [`StagingError::Unknown`].
    Runtime(anyhow::Error),
}

impl From<ListenerError> for StagingError {
    fn from(err: ListenerError) -> Self {
        match err {
            ListenerError::Client(e) => e,
            ListenerError::Runtime(e) => StagingError::Unknown(e),
        }
    }
}

/// The event handed to listeners.
#[derive(Debug)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub user: UserId,
    pub channel: ChannelId,
    /// Subject node before the operation, if it existed.
    pub before: Option<NodeSnapshot>,
    /// Subject node after the operation, if it still exists.
    pub after: Option<NodeSnapshot>,
    /// Steps the operation made, oldest first.
    pub steps: Vec<JournalStep>,
    veto: Option<ListenerError>,
}

impl ChangeEvent {
    /// Build an event without a veto.
    pub fn new(kind: ChangeKind, user: UserId, channel: ChannelId) -> Self {
        Self {
            kind,
            user,
            channel,
            before: None,
            after: None,
            steps: Vec::new(),
            veto: None,
        }
    }

    /// Reject the change. The first veto wins.
    pub fn veto(&mut self, err: ListenerError) {
        if self.veto.is_none() {
            self.veto = Some(err);
        }
    }

    /// Check if a listener rejected the change.
    pub fn is_vetoed(&self) -> bool {
        self.veto.is_some()
    }

    fn take_veto(&mut self) -> Option<ListenerError> {
        self.veto.take()
    }
}

/// Observer of changes, able to veto them.
pub trait ChangeListener: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "listener"
    }

    /// Inspect the event; call [`ChangeEvent::veto`] to reject it.
    fn on_change(&self, event: &mut ChangeEvent);
}

impl<F> ChangeListener for F
where
    F: Fn(&mut ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &mut ChangeEvent) {
        self(event)
    }
}

/// Ordered listener registry.
#[derive(Default, Clone)]
pub struct ChangeEventBus {
    listeners: Vec<Arc<dyn ChangeListener>>,
}

impl fmt::Debug for ChangeEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEventBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ChangeEventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn register(&mut self, listener: impl ChangeListener + 'static) {
        self.listeners.push(Arc::new(listener));
    }

    /// Append a shared listener.
    pub fn register_arc(&mut self, listener: Arc<dyn ChangeListener>) {
        self.listeners.push(listener);
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Check if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Dispatch `event` to every listener in order.
    ///
    /// # Errors
    ///
    /// Returns the first veto, converted to a [`StagingError`]. Listeners
    /// after the vetoing one are not called.
    pub fn dispatch(&self, event: &mut ChangeEvent) -> Result<(), StagingError> {
        for listener in &self.listeners {
            listener.on_change(event);
            if let Some(veto) = event.take_veto() {
                let err = StagingError::from(veto);
                tracing::warn!(
                    listener = listener.name(),
                    op = %event.kind,
                    client = err.is_client(),
                    "change vetoed: {}",
                    err
                );
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event() -> ChangeEvent {
        ChangeEvent::new(
            ChangeKind::Create,
            UserId::new("alice").unwrap(),
            ChannelId::new("intranet").unwrap(),
        )
    }

    #[test]
    fn dispatch_calls_listeners_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut bus = ChangeEventBus::new();
        for i in 0..3 {
            let seen = seen.clone();
            bus.register(move |_: &mut ChangeEvent| seen.lock().unwrap().push(i));
        }
        bus.dispatch(&mut event()).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn veto_stops_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut bus = ChangeEventBus::new();
        bus.register(|e: &mut ChangeEvent| {
            e.veto(ListenerError::Runtime(anyhow::anyhow!("index offline")))
        });
        let after = calls.clone();
        bus.register(move |_: &mut ChangeEvent| {
            after.fetch_add(1, Ordering::SeqCst);
        });

        let err = bus.dispatch(&mut event()).unwrap_err();
        assert!(!err.is_client());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn client_veto_surfaces_as_is() {
        let mut bus = ChangeEventBus::new();
        bus.register(|e: &mut ChangeEvent| {
            e.veto(ListenerError::Client(StagingError::InvalidName("reserved".into())))
        });
        let err = bus.dispatch(&mut event()).unwrap_err();
        assert!(matches!(err, StagingError::InvalidName(ref s) if s == "reserved"));
    }

    #[test]
    fn first_veto_wins() {
        let mut e = event();
        e.veto(ListenerError::Client(StagingError::InvalidName("first".into())));
        e.veto(ListenerError::Runtime(anyhow::anyhow!("second")));
        assert!(e.is_vetoed());
        let err: StagingError = e.take_veto().unwrap().into();
        assert!(err.is_client());
    }
}
