//! engine::errors
//!
//! Error taxonomy of the staging engine.
//!
//! Every failure a caller can see is a [`StagingError`]. All of them except
//! [`StagingError::Unknown`] are client errors: the request was wrong for the
//! current state and may be corrected and retried by the caller. `Unknown`
//! wraps listener runtime failures and internal faults.
//!
//! Either way the session is discarded before the error is returned, so no
//! partial state survives a failed call.

use thiserror::Error;

use crate::core::tree::TreeError;
use crate::core::types::{ChannelId, RelPath, TypeError, UserId, VersionStamp};
use crate::store::StoreError;

/// Coarse classification of a [`StagingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ItemAlreadyLocked,
    ItemNameNotUnique,
    ItemNotCorrectLocation,
    ItemExistsOutsideWorkspace,
    ItemNotInPreview,
    InvalidMoveToSelfOrDescendant,
    InvalidName,
    Conflict,
    ChannelNotFound,
    Unknown,
}

/// Errors from staging operations.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("'{path}' is locked by {owner}")]
    ItemAlreadyLocked { path: RelPath, owner: UserId },

    #[error("'{parent}' already has a child named '{name}'")]
    ItemNameNotUnique { parent: RelPath, name: String },

    #[error("'{0}' is not in the workspace")]
    ItemNotCorrectLocation(RelPath),

    #[error("'{0}' already exists outside the workspace")]
    ItemExistsOutsideWorkspace(RelPath),

    #[error("item not in preview: {0}")]
    ItemNotInPreview(String),

    #[error("cannot move '{node}' to itself or its descendant '{target}'")]
    InvalidMoveToSelfOrDescendant { node: RelPath, target: RelPath },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("'{path}' has been modified (expected stamp {expected}, found {actual})")]
    Conflict {
        path: RelPath,
        expected: VersionStamp,
        actual: VersionStamp,
    },

    #[error("channel not found: {0}")]
    ChannelNotFound(ChannelId),

    #[error("unknown error: {0:#}")]
    Unknown(anyhow::Error),
}

impl StagingError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StagingError::ItemAlreadyLocked { .. } => ErrorKind::ItemAlreadyLocked,
            StagingError::ItemNameNotUnique { .. } => ErrorKind::ItemNameNotUnique,
            StagingError::ItemNotCorrectLocation(_) => ErrorKind::ItemNotCorrectLocation,
            StagingError::ItemExistsOutsideWorkspace(_) => ErrorKind::ItemExistsOutsideWorkspace,
            StagingError::ItemNotInPreview(_) => ErrorKind::ItemNotInPreview,
            StagingError::InvalidMoveToSelfOrDescendant { .. } => {
                ErrorKind::InvalidMoveToSelfOrDescendant
            }
            StagingError::InvalidName(_) => ErrorKind::InvalidName,
            StagingError::Conflict { .. } => ErrorKind::Conflict,
            StagingError::ChannelNotFound(_) => ErrorKind::ChannelNotFound,
            StagingError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Check if the caller can recover from this error.
    pub fn is_client(&self) -> bool {
        self.kind() != ErrorKind::Unknown
    }

    /// Wrap an internal failure.
    pub fn internal(message: impl Into<String>) -> Self {
        StagingError::Unknown(anyhow::anyhow!(message.into()))
    }
}

impl From<TreeError> for StagingError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(id) => StagingError::ItemNotInPreview(id.to_string()),
            TreeError::PathNotFound(path) => StagingError::ItemNotInPreview(path.to_string()),
            TreeError::NameTaken { parent, name } => {
                StagingError::ItemNameNotUnique { parent, name }
            }
            TreeError::RootImmutable => StagingError::ItemNotCorrectLocation(RelPath::root()),
            TreeError::InvalidMove { node, target } => {
                StagingError::InvalidMoveToSelfOrDescendant { node, target }
            }
        }
    }
}

impl From<StoreError> for StagingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ChannelNotFound(id) => StagingError::ChannelNotFound(id),
            StoreError::Tree(e) => e.into(),
            other @ StoreError::ChannelExists(_) => StagingError::Unknown(other.into()),
        }
    }
}

impl From<TypeError> for StagingError {
    fn from(err: TypeError) -> Self {
        StagingError::InvalidName(err.to_string())
    }
}
