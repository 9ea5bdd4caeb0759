//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`NodeId`] - Tier-local node identity, stable across rename/move
//! - [`UserId`] / [`ChannelId`] - Validated principal and channel identifiers
//! - [`NodeName`] - Validated single path segment
//! - [`RelPath`] - Path of a node relative to its channel configuration root
//! - [`VersionStamp`] - Per-node optimistic concurrency counter
//! - [`EditableState`] / [`Lock`] - Staging markers carried by a node
//! - [`NodeKind`] - Closed set of node kinds plus their capability table
//! - [`UtcTimestamp`] - RFC3339 timestamp
//! - [`Fingerprint`] - Content hash of a tier for equality checks
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use sitestage::core::types::{NodeName, RelPath};
//!
//! let path = RelPath::parse("workspace/sitemap/news").unwrap();
//! assert!(path.is_workspace());
//! assert_eq!(path.workspace_mirror().unwrap().to_string(), "sitemap/news");
//!
//! assert!(NodeName::new("about:us").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::naming;

/// Name of the node that roots the mutable region of a tier.
pub const WORKSPACE: &str = "workspace";

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("unknown node kind: {0}")]
    UnknownKind(String),
}

/// Identity of a node inside one tier.
///
/// Ids never cross tiers: the Live counterpart of a Preview node is found by
/// path, not by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh node id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn validate_identifier(kind: &str, value: &str) -> Result<(), TypeError> {
    if value.trim().is_empty() {
        return Err(TypeError::InvalidIdentifier(format!("{kind} cannot be empty")));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(TypeError::InvalidIdentifier(format!(
            "{kind} cannot contain whitespace or control characters"
        )));
    }
    Ok(())
}

/// A validated user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Create a new validated user id.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidIdentifier` if the id is empty or contains
    /// whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        validate_identifier("user id", &id)?;
        Ok(Self(id))
    }

    /// Get the user id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated channel identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Create a new validated channel id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        validate_identifier("channel id", &id)?;
        Ok(Self(id))
    }

    /// Get the channel id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelId {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A validated node name (one path segment).
///
/// See [`naming::validate_name`] for the rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

impl NodeName {
    /// Create a new validated node name.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidName` if the name is empty, is `.`/`..`, or
    /// contains a disallowed character (plain or percent-encoded).
    pub fn new(name: impl Into<String>) -> Result<Self, TypeError> {
        let name = name.into();
        naming::validate_name(&name)?;
        Ok(Self(name))
    }

    /// Wrap a compile-time constant name that is known to be valid.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(naming::validate_name(name).is_ok());
        Self(name.to_string())
    }

    /// Get the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeName {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.0
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path of a node relative to the channel configuration root.
///
/// The empty path is the root itself. Ordering is segment-wise, so all
/// descendants of a path sort contiguously right after it, which is what
/// [`crate::core::index::PathIndex`] relies on for range queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(Vec<NodeName>);

impl RelPath {
    /// The root path.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a `/`-separated path. Leading and trailing separators are ignored.
    ///
    /// # Example
    ///
    /// ```
    /// use sitestage::core::types::RelPath;
    ///
    /// let path = RelPath::parse("/pages/home/").unwrap();
    /// assert_eq!(path.depth(), 2);
    /// assert_eq!(path.to_string(), "pages/home");
    /// assert!(RelPath::parse("pages//home").is_err());
    /// ```
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments = trimmed
            .split('/')
            .map(|s| {
                if s.is_empty() {
                    Err(TypeError::InvalidPath(format!("empty segment in '{path}'")))
                } else {
                    NodeName::new(s)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(segments))
    }

    /// Build a path from already-validated segments.
    pub fn from_segments(segments: Vec<NodeName>) -> Self {
        Self(segments)
    }

    /// Append a segment.
    pub fn join(&self, name: &NodeName) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.clone());
        Self(segments)
    }

    /// Append all segments of another path.
    pub fn join_path(&self, other: &RelPath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&NodeName> {
        self.0.last()
    }

    /// Path segments.
    pub fn segments(&self) -> &[NodeName] {
        &self.0
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Check if `other` is a proper descendant of this path.
    pub fn is_ancestor_of(&self, other: &RelPath) -> bool {
        other.0.len() > self.0.len() && other.starts_with(self)
    }

    /// Remainder of this path after `prefix`.
    pub fn strip_prefix(&self, prefix: &RelPath) -> Option<Self> {
        if self.starts_with(prefix) {
            Some(Self(self.0[prefix.0.len()..].to_vec()))
        } else {
            None
        }
    }

    /// All proper ancestors, closest to the root first.
    pub fn ancestors(&self) -> impl Iterator<Item = RelPath> + '_ {
        (0..self.0.len()).map(move |len| Self(self.0[..len].to_vec()))
    }

    /// Check if this path lies inside the mutable workspace region.
    pub fn is_workspace(&self) -> bool {
        self.0.first().is_some_and(|s| s.as_str() == WORKSPACE)
    }

    /// The inherited (non-workspace) path mirroring this workspace path.
    ///
    /// Returns `None` for paths outside the workspace or for the workspace
    /// root itself.
    pub fn workspace_mirror(&self) -> Option<Self> {
        if self.is_workspace() && self.0.len() > 1 {
            Some(Self(self.0[1..].to_vec()))
        } else {
            None
        }
    }
}

impl TryFrom<String> for RelPath {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RelPath> for String {
    fn from(path: RelPath) -> Self {
        path.to_string()
    }
}

impl FromStr for RelPath {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(NodeName::as_str)
            .collect::<Vec<_>>()
            .join("/");
        write!(f, "{joined}")
    }
}

/// Monotonic per-node counter for optimistic conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionStamp(u64);

impl VersionStamp {
    /// Stamp of a freshly created node.
    pub fn initial() -> Self {
        Self(1)
    }

    /// Wrap a raw stamp value.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// The next stamp.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Raw value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pending staged change carried by a Preview node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditableState {
    #[default]
    None,
    Created,
    Changed,
    Deleted,
}

impl EditableState {
    /// Check if there is a staged change.
    pub fn is_pending(self) -> bool {
        self != EditableState::None
    }

    /// State after a content change: `Created` sticks, everything else
    /// becomes `Changed`.
    pub fn after_change(self) -> Self {
        match self {
            EditableState::Created => EditableState::Created,
            _ => EditableState::Changed,
        }
    }
}

/// An explicit lock on a Preview node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// User holding the lock.
    pub owner: UserId,
    /// Node stamp at the time the lock was last (re)acquired.
    pub version_stamp: VersionStamp,
    /// When the lock was first taken.
    pub locked_at: UtcTimestamp,
}

impl Lock {
    /// Create a lock for `owner` at `version_stamp`.
    pub fn new(owner: UserId, version_stamp: VersionStamp) -> Self {
        Self {
            owner,
            version_stamp,
            locked_at: UtcTimestamp::now(),
        }
    }

    /// Check if the lock is held by `user`.
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.owner == user
    }
}

/// What the generic algorithms are allowed to do with a node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// May be deep-copied (cross-channel copy, prototype instantiation).
    pub copyable: bool,
    /// May carry an explicit lock. Otherwise the nearest lockable ancestor
    /// is locked in its place.
    pub lockable: bool,
    /// Holds container items.
    pub is_container: bool,
    /// Property keys whose values are channel-relative references.
    pub reference_keys: &'static [&'static str],
    /// Reference key naming a backing artifact the node exclusively owns.
    pub owns: Option<&'static str>,
}

/// Closed set of configuration node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Folder,
    SitemapItem,
    Page,
    AbstractPage,
    Prototype,
    Template,
    Container,
    ContainerItem,
    Component,
}

/// Key of a sitemap item's page reference.
pub const PAGE_KEY: &str = "page";
/// Key of a page's template reference.
pub const TEMPLATE_KEY: &str = "template";
/// Key of a page's abstract base reference.
pub const EXTENDS_KEY: &str = "extends";
/// Key of a container's shared-container reference.
pub const SHARED_KEY: &str = "shared";
/// Key of a container item's catalog reference.
pub const COMPONENT_KEY: &str = "component";
/// Prototype property designating the primary container slot.
pub const PRIMARY_CONTAINER_KEY: &str = "primary_container";

impl NodeKind {
    /// All kinds, in declaration order.
    pub const ALL: [NodeKind; 9] = [
        NodeKind::Folder,
        NodeKind::SitemapItem,
        NodeKind::Page,
        NodeKind::AbstractPage,
        NodeKind::Prototype,
        NodeKind::Template,
        NodeKind::Container,
        NodeKind::ContainerItem,
        NodeKind::Component,
    ];

    /// Capability table consulted by locking, copying and reconciliation.
    pub fn capabilities(self) -> Capabilities {
        const PAGE_REFS: &[&str] = &[TEMPLATE_KEY, EXTENDS_KEY];
        let plain = Capabilities {
            copyable: true,
            lockable: true,
            is_container: false,
            reference_keys: &[],
            owns: None,
        };
        match self {
            NodeKind::Folder | NodeKind::Template | NodeKind::Component => plain,
            NodeKind::SitemapItem => Capabilities {
                reference_keys: &[PAGE_KEY],
                owns: Some(PAGE_KEY),
                ..plain
            },
            NodeKind::Page | NodeKind::AbstractPage | NodeKind::Prototype => Capabilities {
                reference_keys: PAGE_REFS,
                ..plain
            },
            NodeKind::Container => Capabilities {
                is_container: true,
                reference_keys: &[SHARED_KEY],
                ..plain
            },
            NodeKind::ContainerItem => Capabilities {
                lockable: false,
                reference_keys: &[COMPONENT_KEY],
                owns: Some(COMPONENT_KEY),
                ..plain
            },
        }
    }

    /// Collection folder a node of this kind lives in, when it has one.
    ///
    /// Container items and containers live inside pages, so they have no
    /// default collection.
    pub fn default_collection(self) -> Option<&'static str> {
        match self {
            NodeKind::SitemapItem => Some("sitemap"),
            NodeKind::Page => Some("pages"),
            NodeKind::AbstractPage => Some("abstractpages"),
            NodeKind::Prototype => Some("prototypes"),
            NodeKind::Template => Some("templates"),
            NodeKind::Component => Some("components"),
            NodeKind::Container => Some("containers"),
            NodeKind::Folder | NodeKind::ContainerItem => None,
        }
    }

    /// Kebab-case tag.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Folder => "folder",
            NodeKind::SitemapItem => "sitemap-item",
            NodeKind::Page => "page",
            NodeKind::AbstractPage => "abstract-page",
            NodeKind::Prototype => "prototype",
            NodeKind::Template => "template",
            NodeKind::Container => "container",
            NodeKind::ContainerItem => "container-item",
            NodeKind::Component => "component",
        }
    }
}

impl FromStr for NodeKind {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| TypeError::UnknownKind(s.to_string()))
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A UTC timestamp in RFC3339 format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtcTimestamp(chrono::DateTime<chrono::Utc>);

impl UtcTimestamp {
    /// Create a timestamp for the current moment.
    pub fn now() -> Self {
        Self(chrono::Utc::now())
    }

    /// Create a timestamp from a chrono DateTime.
    pub fn from_datetime(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self(dt)
    }

    /// Get the underlying datetime.
    pub fn as_datetime(&self) -> &chrono::DateTime<chrono::Utc> {
        &self.0
    }
}

impl fmt::Display for UtcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

/// A stable content hash over a tier.
///
/// Computed over `(path, content)` entries. Ids, locks and timestamps are
/// left out by the caller, so two tiers with the same visible content have
/// the same fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute a fingerprint from `(key, value)` entries.
    ///
    /// Entries are sorted by key before hashing, so input order does not
    /// matter.
    ///
    /// # Example
    ///
    /// ```
    /// use sitestage::core::types::Fingerprint;
    ///
    /// let a = Fingerprint::compute(&[("pages/home".into(), "{}".into()), ("pages".into(), "".into())]);
    /// let b = Fingerprint::compute(&[("pages".into(), "".into()), ("pages/home".into(), "{}".into())]);
    /// assert_eq!(a, b);
    /// ```
    pub fn compute(entries: &[(String, String)]) -> Self {
        let mut sorted: Vec<_> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (key, value) in sorted {
            hasher.update(key.as_bytes());
            hasher.update(b"\0");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Get the fingerprint as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
