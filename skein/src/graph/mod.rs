//! The shared dependency graph.
//!
//! This module hides how per-key state is stored and synchronized: entries
//! ([`entry::NodeEntry`]) own their lifecycle under per-entry locks, the
//! store ([`store::InMemoryGraph`]) maps keys to entries, and
//! [`listener::GraphListener`] exposes the operation hooks used to pin down
//! concurrency orderings in tests.

pub mod entry;
pub mod listener;
pub mod store;

pub use entry::{NodeEntry, NodeState};
pub use listener::{GraphListener, GraphOp, HookOrder};
pub use store::{DepGraph, InMemoryGraph};
