//! The graph store.
//!
//! [`DepGraph`] is the storage seam the evaluator works against: a mapping
//! from key to entry that supports concurrent lookup and insertion. The
//! bundled [`InMemoryGraph`] keeps entries in a sharded concurrent map and is
//! the implementation every evaluation in this crate runs on; callers with
//! their own storage provide the same two operations.
//!
//! The store is monotone within a run: entries are created, driven to a
//! terminal state, and never removed. A later evaluation reuses whatever is
//! already terminal.

use crate::core::NodeKey;
use crate::graph::entry::NodeEntry;
use crate::graph::listener::{GraphListener, GraphOp, HookOrder};
use dashmap::DashMap;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use std::collections::HashMap;
use std::sync::Arc;

/// A mapping from key to entry, shared by every worker of an evaluation.
pub trait DepGraph: Send + Sync {
    /// Returns the entry for `key`, creating it if absent.
    fn create_if_absent(&self, key: &NodeKey) -> Arc<NodeEntry>;

    /// Returns the entry for `key` if one exists.
    fn get(&self, key: &NodeKey) -> Option<Arc<NodeEntry>>;
}

/// In-memory graph store backed by a sharded concurrent map.
///
/// # Example
///
/// ```
/// use skein::{InMemoryGraph, NodeKey};
/// use skein::graph::DepGraph;
///
/// let graph = InMemoryGraph::new();
/// let key = NodeKey::new("test", "a");
/// let entry = graph.create_if_absent(&key);
/// assert!(std::sync::Arc::ptr_eq(&entry, &graph.create_if_absent(&key)));
/// ```
#[derive(Default)]
pub struct InMemoryGraph {
    nodes: DashMap<NodeKey, Arc<NodeEntry>>,
    listener: Option<Arc<dyn GraphListener>>,
}

impl InMemoryGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty graph whose entry operations report to `listener`.
    ///
    /// The listener fires before and after `CreateIfAbsent`, `AddReverseDep`
    /// and `Signal` operations and may block the calling worker.
    pub fn with_listener(listener: Arc<dyn GraphListener>) -> Self {
        Self {
            nodes: DashMap::new(),
            listener: Some(listener),
        }
    }

    /// Number of entries in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns all keys currently in the graph, in no particular order.
    pub fn keys(&self) -> Vec<NodeKey> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Generates a DOT representation of the declared-deps graph for
    /// Graphviz visualization.
    ///
    /// Render with: `dot -Tpng graph.dot -o graph.png`
    pub fn to_dot(&self) -> String {
        let mut graph = DiGraph::<String, ()>::new();
        let mut node_indices = HashMap::new();

        for entry in self.nodes.iter() {
            let idx = graph.add_node(entry.key().to_string());
            node_indices.insert(entry.key().clone(), idx);
        }

        for entry in self.nodes.iter() {
            let from = node_indices[entry.key()];
            for dep in entry.value().direct_deps() {
                if let Some(&to) = node_indices.get(&dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        format!("{:?}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
    }

    fn hook(&self, key: &NodeKey, order: HookOrder) {
        if let Some(listener) = &self.listener {
            listener.accept(key, GraphOp::CreateIfAbsent, order, None);
        }
    }
}

impl DepGraph for InMemoryGraph {
    fn create_if_absent(&self, key: &NodeKey) -> Arc<NodeEntry> {
        self.hook(key, HookOrder::Before);
        let entry = self
            .nodes
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(NodeEntry::new(key.clone(), self.listener.clone()))
            })
            .clone();
        self.hook(key, HookOrder::After);
        entry
    }

    fn get(&self, key: &NodeKey) -> Option<Arc<NodeEntry>> {
        self.nodes.get(key).map(|entry| entry.clone())
    }
}
