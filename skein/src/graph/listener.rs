//! Observer hooks for graph operations.
//!
//! A [`GraphListener`] receives a callback immediately before and after the
//! graph operations that matter for scheduling: entry creation, reverse-dep
//! registration, and completion signals. Hooks exist to make concurrency
//! orderings controllable in tests; listeners may block, and the evaluator
//! tolerates arbitrary blocking inside them. Hooks are always invoked outside
//! the affected entry's lock.

use crate::core::NodeKey;

/// The graph operation a hook fires around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphOp {
    CreateIfAbsent,
    AddReverseDep,
    Signal,
}

/// Whether the hook fires before or after the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookOrder {
    Before,
    After,
}

/// Receives graph operation hooks.
///
/// `context` carries the other key involved in the operation, when there is
/// one: the parent being registered for `AddReverseDep`, and the child that
/// completed for `Signal`.
pub trait GraphListener: Send + Sync {
    fn accept(&self, key: &NodeKey, op: GraphOp, order: HookOrder, context: Option<&NodeKey>);
}
