//! Cycle detection over the unfinished part of the graph.
//!
//! After the scheduler drains, a requested key that is still unfinished can
//! only be waiting on a dependency cycle. Detection runs in two steps per
//! requested key:
//!
//! 1. An iterative DFS over not-yet-terminal entries, following deps in
//!    request order (children are pushed in order, so the most recently
//!    requested dep is examined first). A dep found already on the current
//!    path closes a cycle; the cycle's members are marked errored right
//!    there, each carrying the cycle rotated onto itself, and their
//!    remaining children are dropped from the search. Only back-edges into
//!    the live path are still picked up beneath a finished head. At most
//!    [`MAX_CYCLES_PER_KEY`] cycles are discovered per requested key; under
//!    fail-fast the search stops at the first.
//!
//! 2. A bottom-up attribution pass over the unfinished keys reachable from
//!    the requested key: each inherits the errors of its errored children,
//!    with cycles re-rooted on the inheriting key and collapsed when two
//!    children lead to the same cycle sequence. This is how the requested
//!    key ends up with its path-to-cycle records, and how a key above both
//!    a cycle and an ordinary failure reports both.

use crate::core::error::MAX_CYCLES_PER_KEY;
use crate::core::{CycleInfo, ErrorInfo, NodeKey};
use crate::executor::evaluator::EvalContext;
use crate::graph::NodeState;
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

pub(crate) fn check_for_cycles(ctx: &Arc<EvalContext>, roots: &[NodeKey]) {
    for root in roots {
        let Some(entry) = ctx.graph.get(root) else {
            continue;
        };
        if entry.is_terminal() {
            continue;
        }
        let found = find_and_mark_cycles(ctx, root);
        if found == 0 {
            continue;
        }
        debug!(root = %root, cycles = found, "cycles attributed");
        attribute_from(ctx, root);

        // Under fail-fast only the first cycle-bearing key is attributed.
        if !ctx.keep_going {
            return;
        }
    }
}

/// DFS step: discovers cycles under `root` and marks their members errored.
/// Returns the number of cycles discovered.
fn find_and_mark_cycles(ctx: &Arc<EvalContext>, root: &NodeKey) -> usize {
    enum Visit {
        Enter(NodeKey),
        Leave,
    }

    let mut stack = vec![Visit::Enter(root.clone())];
    let mut path: Vec<NodeKey> = Vec::new();
    let mut on_path: HashSet<NodeKey> = HashSet::new();
    let mut found = 0usize;

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Leave => {
                if let Some(left) = path.pop() {
                    on_path.remove(&left);
                }
            }
            Visit::Enter(key) => {
                let Some(entry) = ctx.graph.get(&key) else {
                    continue;
                };
                if entry.is_terminal() {
                    continue;
                }
                if on_path.contains(&key) {
                    let start = path
                        .iter()
                        .position(|k| *k == key)
                        .expect("on-path key not found in path");
                    let cycle = path[start..].to_vec();
                    found += 1;
                    // Members become errored right away; every later path
                    // reaching them sees a finished entry.
                    for (offset, member) in cycle.iter().enumerate() {
                        let mut rotated = cycle[offset..].to_vec();
                        rotated.extend_from_slice(&cycle[..offset]);
                        attribute_key(ctx, member, vec![CycleInfo::new(Vec::new(), rotated)]);
                    }
                    if found >= MAX_CYCLES_PER_KEY || !ctx.keep_going {
                        break;
                    }
                    continue;
                }
                // Children of a key finished by an earlier cycle are not
                // explored further; only back-edges into the live path count.
                if let Some(head) = path.last() {
                    if ctx.graph.get(head).is_some_and(|e| e.is_terminal()) {
                        continue;
                    }
                }
                path.push(key.clone());
                on_path.insert(key.clone());
                stack.push(Visit::Leave);
                for dep in entry.direct_deps() {
                    stack.push(Visit::Enter(dep));
                }
            }
        }
    }
    found
}

/// Attribution step: walks the unfinished keys reachable from `root` in
/// post-order and lets each inherit from its errored children.
fn attribute_from(ctx: &Arc<EvalContext>, root: &NodeKey) {
    enum Visit {
        Enter(NodeKey),
        Exit(NodeKey),
    }

    let mut stack = vec![Visit::Enter(root.clone())];
    let mut visited: HashSet<NodeKey> = HashSet::new();
    let mut order: Vec<NodeKey> = Vec::new();

    while let Some(visit) = stack.pop() {
        match visit {
            Visit::Exit(key) => order.push(key),
            Visit::Enter(key) => {
                if !visited.insert(key.clone()) {
                    continue;
                }
                let Some(entry) = ctx.graph.get(&key) else {
                    continue;
                };
                if entry.is_terminal() {
                    continue;
                }
                stack.push(Visit::Exit(key));
                for dep in entry.direct_deps() {
                    stack.push(Visit::Enter(dep));
                }
            }
        }
    }

    for key in &order {
        attribute_key(ctx, key, Vec::new());
    }
    // A requested key that is itself a cycle member still absorbs whatever
    // else was discovered beneath it.
    if ctx.graph.get(root).is_some_and(|e| e.is_terminal()) {
        attribute_key(ctx, root, Vec::new());
    }
}

/// Gives `key` an error made of `own_cycles` plus everything inherited from
/// its errored children. No-op when that comes out empty of cycles.
fn attribute_key(ctx: &Arc<EvalContext>, key: &NodeKey, own_cycles: Vec<CycleInfo>) {
    let Some(entry) = ctx.graph.get(key) else {
        return;
    };
    let child_errors: Vec<ErrorInfo> = entry
        .direct_deps()
        .iter()
        .filter_map(|dep| ctx.graph.get(dep))
        .filter(|dep_entry| dep_entry.state() == NodeState::Errored)
        .filter_map(|dep_entry| dep_entry.error_info())
        .collect();

    let inherited = ErrorInfo::from_child_errors(key, child_errors.iter());
    let mut cycles = own_cycles;
    for cycle in inherited.cycles() {
        if cycles.len() >= MAX_CYCLES_PER_KEY {
            break;
        }
        if !cycles.iter().any(|c| c.cycle() == cycle.cycle()) {
            cycles.push(cycle.clone());
        }
    }
    if cycles.is_empty() {
        return;
    }

    let mut info = ErrorInfo::from_cycles(cycles);
    info.add_root_causes(inherited.root_causes());
    info.set_exception_if_absent(inherited.exception().cloned());

    if entry.mark_errored_if_unfinished(ctx.run, info.clone()) {
        ctx.errors_seen.store(true, Ordering::SeqCst);
    } else if entry.state() == NodeState::Errored && entry.done_in_run(ctx.run) {
        // Already errored by this pass (e.g. a cycle member): absorb the
        // rest instead of overwriting.
        entry.absorb_error(&info);
    }
}
