//! Fail-fast error attribution.
//!
//! When a key fails under fail-fast, the scheduler halts before the failure
//! has reached the requested keys above it. This single-threaded pass walks
//! upward from the failed key through in-flight reverse deps, re-running
//! each parent's function once with the child's error injected so the parent
//! can classify the failure:
//!
//! - the parent throws its own domain error: that error replaces the
//!   child's, with the parent as root cause;
//! - the parent returns the restart sentinel: it inherits the child's error;
//! - the parent recovers (returns a value): the value is discarded, the
//!   parent is skipped, and the child's error keeps moving up.
//!
//! The walk follows one path and stops at the first requested key, which
//! always receives the error. Errors assigned here are never written to the
//! graph; they only feed the evaluation result.

use crate::core::{ErrorInfo, NodeKey};
use crate::executor::env::Environment;
use crate::executor::evaluator::EvalContext;
use futures::FutureExt;
use indexmap::{IndexMap, IndexSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

pub(crate) async fn bubble_error_up(
    ctx: &Arc<EvalContext>,
    origin: &NodeKey,
    roots: &IndexSet<NodeKey>,
) -> IndexMap<NodeKey, ErrorInfo> {
    let mut assigned = IndexMap::new();
    let Some(origin_entry) = ctx.graph.get(origin) else {
        return assigned;
    };
    let Some(mut error) = origin_entry.error_info() else {
        return assigned;
    };

    let mut current = origin.clone();
    let mut visited: std::collections::HashSet<NodeKey> = std::collections::HashSet::new();
    visited.insert(current.clone());
    loop {
        let Some(current_entry) = ctx.graph.get(&current) else {
            break;
        };
        // Follow one in-flight parent not walked yet; in-flight keys can sit
        // on a dependency cycle, so the walk must not revisit them.
        let parent = current_entry
            .reverse_deps()
            .into_iter()
            .filter(|p| !visited.contains(p))
            .find(|p| ctx.graph.get(p).is_some_and(|e| e.is_in_flight(ctx.run)));
        let Some(parent) = parent else {
            break;
        };
        visited.insert(parent.clone());
        debug!(child = %current, parent = %parent, "propagating error upward");

        let Some(function) = ctx.registry.get(parent.family()) else {
            break;
        };
        let tag = function.extract_tag(&parent);
        let env = Environment::for_bubbling(
            parent.clone(),
            tag,
            ctx.graph.clone(),
            current.clone(),
            error.clone(),
        );
        let outcome = AssertUnwindSafe(function.invoke(parent.clone(), env.clone()))
            .catch_unwind()
            .await;
        // Dep requests made while bubbling are discarded.
        drop(env.take_state());

        match outcome {
            Ok(Err(function_error)) => {
                // The parent turned the child failure into its own error.
                error = ErrorInfo::from_function_error(&parent, function_error);
                assigned.insert(parent.clone(), error.clone());
            }
            Ok(Ok(Some(_value))) => {
                // The parent recovered; the value is not committed. A
                // requested key still reports the error it absorbed.
                if roots.contains(&parent) {
                    assigned.insert(parent.clone(), error.clone());
                }
            }
            Ok(Ok(None)) | Err(_) => {
                error = ErrorInfo::from_child_errors(&parent, [&error]);
                assigned.insert(parent.clone(), error.clone());
            }
        }
        ctx.errors_seen.store(true, Ordering::SeqCst);

        if roots.contains(&parent) {
            break;
        }
        current = parent;
    }
    assigned
}
