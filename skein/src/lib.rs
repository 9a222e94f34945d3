//! Skein: a parallel, demand-driven evaluator for keyed dependency graphs.
//!
//! `skein` (a loosely coiled bundle of yarn) is the engine underneath an
//! incremental build system: given a set of requested keys and a registry of
//! functions that compute a value for a key by declaring further key
//! dependencies at runtime, the evaluator schedules computations on a worker
//! pool, memoizes results in a shared graph, detects cycles, and attributes
//! errors to the keys that caused them.
//!
//! # Features
//!
//! - **Demand-driven scheduling**: only the transitive closure of the
//!   requested keys is computed, with at most one in-flight computation per
//!   key.
//! - **Memoization**: results live in a shared graph and are reused by later
//!   evaluations without re-running their functions.
//! - **Failure policies**: fail-fast (halt on the first error) or keep-going
//!   (finish everything that does not depend on a failure), with precise
//!   root-cause sets either way.
//! - **Cycle detection**: dependency cycles are extracted with the path from
//!   the requested key to the cycle, bounded per key.
//! - **Diagnostic replay**: warnings and other events emitted while a key was
//!   computed are stored with it and replayed to later evaluations that
//!   depend on it.
//!
//! # Quick start
//!
//! ```ignore
//! use skein::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = FunctionRegistry::builder()
//!         .register("greeting", |key: NodeKey, _env: Environment| async move {
//!             Ok(Some(Value::new(format!("hello, {}", key.argument()))))
//!         })
//!         .build();
//!
//!     let graph = Arc::new(InMemoryGraph::new());
//!     let evaluator = Evaluator::new(graph, registry);
//!     let result = evaluator
//!         .eval([NodeKey::new("greeting", "world")])
//!         .await?;
//!
//!     let value = result.get_as::<String>(&NodeKey::new("greeting", "world"));
//!     println!("{}", value.unwrap());
//!     Ok(())
//! }
//! ```
//!
//! # Module organization
//!
//! Each module hides one set of design decisions:
//!
//! - [`core`]: foundation types (keys, values, error descriptors, events)
//! - [`graph`]: the graph store (per-key entries and their lifecycle)
//! - [`executor`]: the evaluation engine (scheduling, environments, error
//!   attribution, cycle detection)

pub mod core;
pub mod executor;
pub mod graph;

// Re-export commonly used types for convenience
pub use crate::core::{
    downcast_node_error, CycleInfo, ErrorInfo, Event, EventCollector, EventKind, EventMessage,
    EventSink, FamilyName, FunctionError, NodeError, NodeKey, NodeValue, Reporter, Value,
};

pub use crate::executor::{
    ComputeFuture, ComputeResult, EvalError, EvaluationResult, EvaluationState, Evaluator,
    Environment, FunctionRegistry, FunctionRegistryBuilder, NodeFunction, ProgressReceiver,
    Result as EvalResult,
};

pub use crate::graph::{
    DepGraph, GraphListener, GraphOp, HookOrder, InMemoryGraph, NodeEntry, NodeState,
};

// Re-export dependencies used in the public API so downstream crates do not
// need to pin matching versions themselves.
pub use tokio;
pub use tokio_util;

/// Prelude module for convenient glob imports.
///
/// # Example
///
/// ```ignore
/// use skein::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        CycleInfo, ErrorInfo, Event, EventCollector, EventKind, FamilyName, FunctionError,
        NodeKey, Reporter, Value,
    };
    pub use crate::executor::{
        Environment, EvaluationResult, EvaluationState, Evaluator, FunctionRegistry,
        ProgressReceiver,
    };
    pub use crate::graph::{DepGraph, InMemoryGraph};
    pub use std::sync::Arc;
}
