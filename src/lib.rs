//! sitestage - staging engine for hierarchical site configuration
//!
//! Several users edit one channel's configuration at once. Their edits land
//! in a Preview tier, guarded by per-node locks, and only reach the Live
//! tier when published. Discarding reverts Preview to Live.
//!
//! # Architecture
//!
//! The codebase follows a strict layered architecture:
//!
//! - [`core`] - Domain types, trees, naming rules and configuration
//! - [`store`] - In-memory tree store with atomic sessions
//! - [`engine`] - Locking, staging operations, copy, prototype re-application
//!   and change events
//!
//! # Correctness Invariants
//!
//! sitestage maintains the following invariants:
//!
//! 1. Every pending change is owned by exactly one user
//! 2. Each call commits once, after all listeners accept, or not at all
//! 3. Live only changes on publish
//! 4. Node ids survive rename and move

pub mod core;
pub mod engine;
pub mod store;
