//! core
//!
//! Core domain types and data structures for sitestage.
//!
//! # Modules
//!
//! - [`types`] - Strong types: NodeId, RelPath, NodeKind, Lock, etc.
//! - [`naming`] - Node naming rules and collision suffix search
//! - [`index`] - Sorted path table for ancestor/descendant queries
//! - [`tree`] - One tier of a channel's configuration tree
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Schemas are strict and self-describing
//! - Nothing in `core` orchestrates; the engine does

pub mod config;
pub mod index;
pub mod naming;
pub mod tree;
pub mod types;
