//! engine::journal
//!
//! Per-operation step journal.
//!
//! # Architecture
//!
//! Every mutating call gets one [`Journal`]. Staging primitives append a
//! [`JournalStep`] for each structural or lock change they make, in order.
//! The runner uses the journal to:
//!
//! - hand listeners the list of steps inside the change event
//! - record which paths changed for the store's commit notice
//! - log the outcome of the operation
//!
//! The journal lives only as long as the operation. Rollback is done by
//! discarding the store session, not by replaying steps backwards.
//!
//! # Invariants
//!
//! - Steps are appended in the order the changes were made
//! - A finished journal (committed or rolled back) is never appended to

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::types::{NodeKind, RelPath, UserId, UtcTimestamp, VersionStamp};
use crate::store::Tier;

/// Unique identifier for an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpId(String);

impl OpId {
    /// Generate a new unique operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for OpId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current phase of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpPhase {
    /// Operation is in progress.
    InProgress,
    /// Operation committed.
    Committed,
    /// Operation was rolled back.
    RolledBack,
}

impl OpPhase {
    /// Check if the operation is finished (committed or rolled back).
    pub fn is_finished(&self) -> bool {
        matches!(self, OpPhase::Committed | OpPhase::RolledBack)
    }
}

/// A single step in an operation journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStep {
    /// Step kind with operation-specific data.
    pub kind: StepKind,
    /// Timestamp when step was recorded.
    pub timestamp: UtcTimestamp,
}

/// The kind of journal step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// A node was inserted into the Preview tier.
    NodeCreated { path: RelPath, kind: NodeKind },

    /// A node was moved and/or renamed.
    NodeMoved { from: RelPath, to: RelPath },

    /// A deletion marker was left behind at a vacated path.
    MarkerCreated { path: RelPath },

    /// Properties of a node changed.
    NodeUpdated { path: RelPath },

    /// A node was marked deleted but kept for publish/discard.
    NodeMarkedDeleted { path: RelPath },

    /// A subtree was removed from a tier.
    NodeRemoved { tier: Tier, path: RelPath },

    /// An explicit lock was taken or refreshed.
    LockAcquired {
        path: RelPath,
        owner: UserId,
        stamp: VersionStamp,
    },

    /// An explicit lock was cleared.
    LockReleased { path: RelPath, owner: UserId },

    /// Preview content was written to the Live tier.
    Published { path: RelPath },

    /// Preview content was restored from the Live tier.
    Restored { path: RelPath },

    /// A referenced node missing in the target channel was copied over.
    DependencyCopied { path: RelPath },

    /// A shared-container reference was replaced by an inline copy.
    SharedInlined { path: RelPath, shared: RelPath },
}

impl StepKind {
    /// Paths this step touched.
    pub fn paths(&self) -> Vec<&RelPath> {
        match self {
            StepKind::NodeMoved { from, to } => vec![from, to],
            StepKind::NodeCreated { path, .. }
            | StepKind::MarkerCreated { path }
            | StepKind::NodeUpdated { path }
            | StepKind::NodeMarkedDeleted { path }
            | StepKind::NodeRemoved { path, .. }
            | StepKind::LockAcquired { path, .. }
            | StepKind::LockReleased { path, .. }
            | StepKind::Published { path }
            | StepKind::Restored { path }
            | StepKind::DependencyCopied { path }
            | StepKind::SharedInlined { path, .. } => vec![path],
        }
    }
}

/// Journal of one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journal {
    /// Operation id.
    pub op_id: OpId,
    /// Operation name (e.g. "create", "publish").
    pub command: String,
    /// Current phase.
    pub phase: OpPhase,
    /// Recorded steps, oldest first.
    pub steps: Vec<JournalStep>,
    /// When the operation started.
    pub started_at: UtcTimestamp,
}

impl Journal {
    /// Start a journal for `command`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            op_id: OpId::new(),
            command: command.into(),
            phase: OpPhase::InProgress,
            steps: Vec::new(),
            started_at: UtcTimestamp::now(),
        }
    }

    /// Append a step.
    pub fn append(&mut self, kind: StepKind) {
        if self.phase.is_finished() {
            tracing::warn!(op = %self.op_id, "step appended to finished journal ignored");
            return;
        }
        tracing::trace!(op = %self.op_id, step = ?kind, "journal step");
        self.steps.push(JournalStep {
            kind,
            timestamp: UtcTimestamp::now(),
        });
    }

    /// Mark the operation committed.
    pub fn commit(&mut self) {
        self.phase = OpPhase::Committed;
    }

    /// Mark the operation rolled back.
    pub fn rollback(&mut self) {
        self.phase = OpPhase::RolledBack;
    }

    /// Check if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Distinct paths touched, in first-touch order.
    pub fn touched_paths(&self) -> Vec<RelPath> {
        let mut out: Vec<RelPath> = Vec::new();
        for step in &self.steps {
            for path in step.kind.paths() {
                if !out.contains(path) {
                    out.push(path.clone());
                }
            }
        }
        out
    }

    /// Count steps matching a predicate.
    pub fn count(&self, pred: impl Fn(&StepKind) -> bool) -> usize {
        self.steps.iter().filter(|s| pred(&s.kind)).count()
    }
}
