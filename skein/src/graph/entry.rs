//! Per-key graph entries.
//!
//! A [`NodeEntry`] is the record the graph keeps for one key: its lifecycle
//! state, its value or error once terminal, the dep groups its function
//! requested, the keys depending on it, and the signal accounting that
//! re-enqueues a suspended key once all of its requested deps are terminal.
//!
//! Every entry guards its mutable state with its own mutex. The evaluator
//! never holds two entry locks at once; when two entries are related, the
//! child's lock is always taken and released before the parent's.

use crate::core::{ErrorInfo, Event, NodeKey, Value};
use crate::graph::listener::{GraphListener, GraphOp, HookOrder};
use indexmap::IndexSet;
use std::sync::{Arc, Mutex};

/// Lifecycle state of an entry. `Done` and `Errored` are terminal; an entry
/// transitions to a terminal state at most once per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    New,
    InProgress,
    Done,
    Errored,
}

impl NodeState {
    /// Returns true for `Done` and `Errored`.
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeState::Done | NodeState::Errored)
    }
}

/// Snapshot of an entry's externally visible state.
#[derive(Debug, Clone)]
pub(crate) struct EntryView {
    pub state: NodeState,
    pub value: Option<Value>,
    pub error: Option<ErrorInfo>,
}

impl EntryView {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Outcome of asking the scheduler to queue an entry.
#[derive(Debug)]
pub(crate) enum Schedule {
    /// Already done or errored; nothing to run.
    Terminal,
    /// Queued or running in this evaluation already.
    AlreadyQueued,
    /// The caller must enqueue the key. `first_time` is true the first time
    /// the key is queued in this evaluation.
    Enqueue { first_time: bool },
    /// The entry was left in progress by an earlier, interrupted evaluation.
    /// The caller must drop the listed reverse-dep registrations from the
    /// entry's former deps, call [`NodeEntry::reset_transient`], and retry.
    NeedsReset { stale_deps: Vec<NodeKey> },
}

#[derive(Default)]
struct EntryInner {
    state: Option<InnerState>,
    value: Option<Value>,
    error: Option<ErrorInfo>,
    /// Dep groups in request order; each group holds only the keys that were
    /// new when the group was first requested.
    dep_groups: Vec<Vec<NodeKey>>,
    /// Union of all requested deps, in first-request order.
    known_deps: IndexSet<NodeKey>,
    reverse_deps: IndexSet<NodeKey>,
    /// Unfinished deps in the most recent request wave.
    pending_deps: usize,
    /// Deps that have signaled since the entry was last enqueued.
    signaled: usize,
    /// True while a worker is still recording the deps of the current run.
    registering: bool,
    /// True while the key sits in the work queue or a worker owns it.
    scheduled: bool,
    /// Evaluation generation that last scheduled this entry.
    run: u64,
    /// Evaluation generation in which the enqueueing callback fired.
    enqueued_run: u64,
    /// Evaluation generation in which the entry became terminal.
    done_run: u64,
    /// Number of times the compute function has been invoked.
    restarts: u32,
    stored_events: Vec<Event>,
}

// Separate from NodeState so Default can be derived without exposing a
// default lifecycle state publicly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InnerState {
    InProgress,
    Done,
    Errored,
}

/// The graph node for one key.
pub struct NodeEntry {
    key: NodeKey,
    listener: Option<Arc<dyn GraphListener>>,
    inner: Mutex<EntryInner>,
}

impl NodeEntry {
    pub(crate) fn new(key: NodeKey, listener: Option<Arc<dyn GraphListener>>) -> Self {
        Self {
            key,
            listener,
            inner: Mutex::new(EntryInner::default()),
        }
    }

    /// The key this entry belongs to.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        to_state(self.lock().state)
    }

    /// Returns true if the entry is `Done` or `Errored`.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The value, once `Done`. A recovered entry can carry both a value and
    /// an error.
    pub fn value(&self) -> Option<Value> {
        self.lock().value.clone()
    }

    /// The error, once `Errored` (or alongside a value after recovery).
    pub fn error_info(&self) -> Option<ErrorInfo> {
        self.lock().error.clone()
    }

    /// The events recorded while this entry was computed, set on the `Done`
    /// transition.
    pub fn stored_events(&self) -> Vec<Event> {
        self.lock().stored_events.clone()
    }

    /// All requested deps, flattened in first-request order.
    pub fn direct_deps(&self) -> Vec<NodeKey> {
        self.lock().known_deps.iter().cloned().collect()
    }

    /// The requested dep groups, in request order.
    pub fn dep_groups(&self) -> Vec<Vec<NodeKey>> {
        self.lock().dep_groups.clone()
    }

    /// The keys that depend on this entry, in registration order.
    pub fn reverse_deps(&self) -> Vec<NodeKey> {
        self.lock().reverse_deps.iter().cloned().collect()
    }

    pub(crate) fn view(&self) -> EntryView {
        let inner = self.lock();
        EntryView {
            state: to_state(inner.state),
            value: inner.value.clone(),
            error: inner.error.clone(),
        }
    }

    pub(crate) fn done_in_run(&self, run: u64) -> bool {
        let inner = self.lock();
        inner.state.map_or(false, |s| s != InnerState::InProgress) && inner.done_run == run
    }

    /// True if a worker of the given evaluation owns or suspended this entry.
    pub(crate) fn is_in_flight(&self, run: u64) -> bool {
        let inner = self.lock();
        inner.state == Some(InnerState::InProgress) && inner.run == run
    }

    pub(crate) fn try_schedule(&self, run: u64) -> Schedule {
        let mut inner = self.lock();
        match inner.state {
            Some(InnerState::Done) | Some(InnerState::Errored) => Schedule::Terminal,
            Some(InnerState::InProgress) if inner.run != run => Schedule::NeedsReset {
                stale_deps: inner.known_deps.iter().cloned().collect(),
            },
            Some(InnerState::InProgress) => Schedule::AlreadyQueued,
            None => {
                if inner.scheduled && inner.run == run {
                    Schedule::AlreadyQueued
                } else {
                    inner.scheduled = true;
                    inner.run = run;
                    let first_time = inner.enqueued_run != run;
                    inner.enqueued_run = run;
                    Schedule::Enqueue { first_time }
                }
            }
        }
    }

    /// Clears the transient state of an entry left in progress by an earlier
    /// evaluation. The caller removes the reverse-dep registrations returned
    /// by [`Schedule::NeedsReset`] first.
    pub(crate) fn reset_transient(&self) {
        let mut inner = self.lock();
        if inner.state.map_or(false, |s| s != InnerState::InProgress) {
            return;
        }
        inner.state = None;
        inner.dep_groups.clear();
        inner.known_deps.clear();
        inner.pending_deps = 0;
        inner.signaled = 0;
        inner.registering = false;
        inner.scheduled = false;
        inner.restarts = 0;
        inner.stored_events.clear();
    }

    /// Marks the entry in progress for a compute invocation. Returns the
    /// invocation count (1 for the first run), or `None` if the entry turned
    /// terminal in the meantime.
    pub(crate) fn begin_compute(&self, run: u64) -> Option<u32> {
        let mut inner = self.lock();
        match inner.state {
            Some(InnerState::Done) | Some(InnerState::Errored) => None,
            _ => {
                inner.state = Some(InnerState::InProgress);
                inner.run = run;
                inner.signaled = 0;
                inner.registering = false;
                inner.restarts += 1;
                Some(inner.restarts)
            }
        }
    }

    /// Opens the dep-registration phase that follows a compute invocation.
    pub(crate) fn begin_registration(&self) {
        self.lock().registering = true;
    }

    /// Records one dep group. Keys already requested by an earlier invocation
    /// keep their original group; only the new keys are appended (and
    /// returned).
    pub(crate) fn add_dep_group(&self, group: &[NodeKey]) -> Vec<NodeKey> {
        let mut inner = self.lock();
        let mut fresh = Vec::new();
        for dep in group {
            if inner.known_deps.insert(dep.clone()) {
                fresh.push(dep.clone());
            }
        }
        if !fresh.is_empty() {
            inner.dep_groups.push(fresh.clone());
        }
        fresh
    }

    /// Counts one unfinished dep into the current wave.
    pub(crate) fn note_pending_dep(&self) {
        self.lock().pending_deps += 1;
    }

    /// Retracts [`Self::note_pending_dep`] for a dep observed terminal before
    /// it could ever signal.
    pub(crate) fn note_dep_done(&self) {
        let mut inner = self.lock();
        inner.pending_deps = inner.pending_deps.saturating_sub(1);
    }

    /// Closes the dep-registration phase. Returns true if every dep of the
    /// wave is already terminal, in which case the caller owns re-enqueueing
    /// (or finalizing) the key; otherwise the last signaling dep will.
    pub(crate) fn finish_registration(&self) -> bool {
        let mut inner = self.lock();
        inner.registering = false;
        if inner.pending_deps == 0 {
            inner.scheduled = true;
            true
        } else {
            inner.scheduled = false;
            false
        }
    }

    /// Records that the dep `child` reached a terminal state. Returns true
    /// iff this call completed the entry's most recent dep wave, handing the
    /// caller the duty to re-enqueue the key.
    pub(crate) fn signal_dep(&self, run: u64, child: &NodeKey) -> bool {
        self.hook(GraphOp::Signal, HookOrder::Before, Some(child));
        let ready = {
            let mut inner = self.lock();
            inner.signaled += 1;
            inner.pending_deps = inner.pending_deps.saturating_sub(1);
            let ready = inner.state == Some(InnerState::InProgress)
                && inner.run == run
                && !inner.registering
                && inner.pending_deps == 0
                && !inner.scheduled;
            if ready {
                inner.scheduled = true;
            }
            ready
        };
        self.hook(GraphOp::Signal, HookOrder::After, Some(child));
        ready
    }

    /// Registers `parent` as depending on this entry and reports the state
    /// the parent observed. A terminal state here means the entry will not
    /// signal the parent for this registration.
    pub(crate) fn add_reverse_dep(&self, parent: &NodeKey) -> EntryView {
        self.hook(GraphOp::AddReverseDep, HookOrder::Before, Some(parent));
        let view = {
            let mut inner = self.lock();
            inner.reverse_deps.insert(parent.clone());
            EntryView {
                state: to_state(inner.state),
                value: inner.value.clone(),
                error: inner.error.clone(),
            }
        };
        self.hook(GraphOp::AddReverseDep, HookOrder::After, Some(parent));
        view
    }

    pub(crate) fn remove_reverse_dep(&self, parent: &NodeKey) {
        self.lock().reverse_deps.shift_remove(parent);
    }

    /// Transitions to `Done`, storing the value and the run's events (and the
    /// recovered error, if the function caught one from a child). Returns the
    /// reverse deps to signal.
    pub(crate) fn set_value(
        &self,
        run: u64,
        value: Value,
        events: Vec<Event>,
        recovered_error: Option<ErrorInfo>,
    ) -> Vec<NodeKey> {
        let mut inner = self.lock();
        debug_assert!(
            inner.state == Some(InnerState::InProgress),
            "value set on a node that was not being computed"
        );
        inner.state = Some(InnerState::Done);
        inner.value = Some(value);
        inner.error = recovered_error;
        inner.stored_events = events;
        inner.done_run = run;
        inner.scheduled = false;
        inner.registering = false;
        inner.reverse_deps.iter().cloned().collect()
    }

    /// Transitions to `Errored`. Events are never stored on this transition.
    /// Returns the reverse deps to signal.
    pub(crate) fn set_error(&self, run: u64, error: ErrorInfo) -> Vec<NodeKey> {
        let mut inner = self.lock();
        inner.state = Some(InnerState::Errored);
        inner.error = Some(error);
        inner.done_run = run;
        inner.scheduled = false;
        inner.registering = false;
        inner.reverse_deps.iter().cloned().collect()
    }

    /// Folds another error into the one already recorded on this entry:
    /// root causes union, exception kept if already present, cycles appended
    /// unless an equal cycle sequence is already recorded.
    pub(crate) fn absorb_error(&self, other: &ErrorInfo) {
        let mut inner = self.lock();
        if let Some(error) = inner.error.as_mut() {
            for cycle in other.cycles() {
                if !error.cycles().iter().any(|c| c.cycle() == cycle.cycle()) {
                    error.push_cycles([cycle.clone()]);
                }
            }
            error.add_root_causes(other.root_causes());
            error.set_exception_if_absent(other.exception().cloned());
        }
    }

    /// Transitions a still-unfinished entry to `Errored` (used by cycle
    /// attribution). Returns false if the entry was already terminal.
    pub(crate) fn mark_errored_if_unfinished(&self, run: u64, error: ErrorInfo) -> bool {
        let mut inner = self.lock();
        if inner.state.map_or(false, |s| s != InnerState::InProgress) {
            return false;
        }
        inner.state = Some(InnerState::Errored);
        inner.error = Some(error);
        inner.done_run = run;
        inner.scheduled = false;
        inner.registering = false;
        true
    }

    fn hook(&self, op: GraphOp, order: HookOrder, context: Option<&NodeKey>) {
        if let Some(listener) = &self.listener {
            listener.accept(&self.key, op, order, context);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EntryInner> {
        self.inner.lock().expect("node entry mutex poisoned")
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

fn to_state(inner: Option<InnerState>) -> NodeState {
    match inner {
        None => NodeState::New,
        Some(InnerState::InProgress) => NodeState::InProgress,
        Some(InnerState::Done) => NodeState::Done,
        Some(InnerState::Errored) => NodeState::Errored,
    }
}
