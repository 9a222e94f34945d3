//! The per-invocation environment handed to compute functions.
//!
//! An [`Environment`] is how one invocation of a compute function talks to
//! the evaluator: it requests dep values (in groups, so the scheduler can
//! fetch a batch in parallel and re-request it with the same batching),
//! unwraps child errors it knows how to recover from, and records diagnostic
//! events.
//!
//! Dep requests are recorded here and committed to the graph only after the
//! compute future returns; a function that saw a missing dep returns
//! `Ok(None)` and is re-run once everything it asked for is terminal.

use crate::core::{
    downcast_node_error, ErrorInfo, Event, EventKind, EventMessage, NodeError, NodeKey, Value,
};
use crate::graph::entry::EntryView;
use crate::graph::{DepGraph, NodeState};
use indexmap::{IndexMap, IndexSet};
use std::mem;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct EnvState {
    /// Dep groups requested by this invocation, in request order. Each group
    /// holds only the keys not seen earlier in the invocation.
    pub groups: Vec<Vec<NodeKey>>,
    /// All deps requested by this invocation.
    pub seen: IndexSet<NodeKey>,
    /// True once any requested dep was not `Done`.
    pub missing: bool,
    /// Child errors the function did not (or could not) recover from. A key
    /// with unrecovered child errors fails at its next terminal step.
    pub unrecovered: IndexMap<NodeKey, ErrorInfo>,
    /// Child errors delivered to (and caught by) the function. A key that
    /// still completes carries these as its recovered error.
    pub delivered: IndexMap<NodeKey, ErrorInfo>,
    /// Events emitted by this invocation, in order.
    pub events: Vec<Event>,
}

struct EnvInner {
    key: NodeKey,
    tag: Option<String>,
    graph: Arc<dyn DepGraph>,
    keep_going: bool,
    /// During fail-fast error bubbling, the failing child and its error are
    /// injected here; reads of that child observe the error, and nothing is
    /// committed to the graph.
    injected_error: Option<(NodeKey, ErrorInfo)>,
    state: Mutex<EnvState>,
}

/// View given to one invocation of a compute function.
///
/// Cheap to clone; all clones share the same recorded state.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    pub(crate) fn new(
        key: NodeKey,
        tag: Option<String>,
        graph: Arc<dyn DepGraph>,
        keep_going: bool,
    ) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                key,
                tag,
                graph,
                keep_going,
                injected_error: None,
                state: Mutex::new(EnvState::default()),
            }),
        }
    }

    pub(crate) fn for_bubbling(
        key: NodeKey,
        tag: Option<String>,
        graph: Arc<dyn DepGraph>,
        failed_child: NodeKey,
        error: ErrorInfo,
    ) -> Self {
        Self {
            inner: Arc::new(EnvInner {
                key,
                tag,
                graph,
                keep_going: false,
                injected_error: Some((failed_child, error)),
                state: Mutex::new(EnvState::default()),
            }),
        }
    }

    /// The key being computed.
    pub fn key(&self) -> &NodeKey {
        &self.inner.key
    }

    /// Requests a single dep and returns its value if it is already built.
    ///
    /// A `None` return means the dep is not `Done` yet (or failed); the
    /// function should eventually return `Ok(None)` so it can be re-run once
    /// the dep is terminal. Each call opens a new dep group of one.
    pub fn get_value(&self, key: &NodeKey) -> Option<Value> {
        self.record_group(std::slice::from_ref(key));
        self.read_dep(key)
    }

    /// Requests a batch of deps as one group and returns their values, in
    /// input order, with `None` for every dep that is not `Done`.
    pub fn get_values(&self, keys: &[NodeKey]) -> Vec<Option<Value>> {
        self.record_group(keys);
        keys.iter().map(|key| self.read_dep(key)).collect()
    }

    /// Like [`Self::get_value`], but if the dep failed with a domain error of
    /// type `E`, that error is returned for the function to recover from.
    ///
    /// A child error of any other type cannot be recovered here; it is
    /// recorded and will fail this key at its next terminal step.
    pub fn get_value_or_match<E: NodeError>(&self, key: &NodeKey) -> Result<Option<Value>, Arc<E>> {
        self.record_group(std::slice::from_ref(key));
        self.read_dep_or_match(key)
    }

    /// Batch form of [`Self::get_value_or_match`]; the keys form one group.
    pub fn get_values_or_match<E: NodeError>(
        &self,
        keys: &[NodeKey],
    ) -> Vec<Result<Option<Value>, Arc<E>>> {
        self.record_group(keys);
        keys.iter().map(|key| self.read_dep_or_match(key)).collect()
    }

    /// Returns true iff any dep requested by this invocation was not `Done`.
    pub fn values_missing(&self) -> bool {
        self.state().missing
    }

    /// Records a diagnostic event. Events are replayed to the sink when the
    /// key finalizes and, on success, stored with it for later evaluations.
    pub fn report(&self, kind: EventKind, message: impl Into<EventMessage>) {
        let event = Event::new(kind, message).with_tag(self.inner.tag.clone());
        self.state().events.push(event);
    }

    /// Records an informational event.
    pub fn info(&self, message: impl Into<EventMessage>) {
        self.report(EventKind::Info, message);
    }

    /// Records a progress event.
    pub fn progress(&self, message: impl Into<EventMessage>) {
        self.report(EventKind::Progress, message);
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<EventMessage>) {
        self.report(EventKind::Warning, message);
    }

    /// Records an error event.
    pub fn error(&self, message: impl Into<EventMessage>) {
        self.report(EventKind::Error, message);
    }

    pub(crate) fn take_state(&self) -> EnvState {
        mem::take(&mut *self.state())
    }

    fn record_group(&self, keys: &[NodeKey]) {
        let mut state = self.state();
        let mut fresh = Vec::new();
        for key in keys {
            if state.seen.insert(key.clone()) {
                fresh.push(key.clone());
            }
        }
        if !fresh.is_empty() {
            state.groups.push(fresh);
        }
    }

    fn read_dep(&self, key: &NodeKey) -> Option<Value> {
        let view = self.dep_view(key);
        match view.state {
            NodeState::Done => {
                let value = view.value.expect("done entry without value");
                if let Some(error) = view.error {
                    // The dep recovered from a child failure. Keep-going
                    // callers use the value; fail-fast treats the recorded
                    // failure as fatal for this key.
                    if !self.inner.keep_going {
                        self.state().unrecovered.insert(key.clone(), error);
                    }
                }
                Some(value)
            }
            NodeState::Errored => {
                let error = view.error.expect("errored entry without error");
                let mut state = self.state();
                state.unrecovered.insert(key.clone(), error);
                state.missing = true;
                None
            }
            NodeState::New | NodeState::InProgress => {
                self.state().missing = true;
                None
            }
        }
    }

    fn read_dep_or_match<E: NodeError>(&self, key: &NodeKey) -> Result<Option<Value>, Arc<E>> {
        let view = self.dep_view(key);
        match view.state {
            NodeState::Done => {
                let value = view.value.expect("done entry without value");
                if let Some(error) = view.error {
                    if !self.inner.keep_going {
                        let matched = error
                            .exception()
                            .and_then(|exn| downcast_node_error::<E>(exn));
                        self.state().unrecovered.insert(key.clone(), error);
                        if let Some(err) = matched {
                            return Err(err);
                        }
                    }
                }
                Ok(Some(value))
            }
            NodeState::Errored => {
                let error = view.error.expect("errored entry without error");
                let matched = error
                    .exception()
                    .and_then(|exn| downcast_node_error::<E>(exn));
                match matched {
                    Some(err) => {
                        self.state().delivered.insert(key.clone(), error);
                        Err(err)
                    }
                    None => {
                        let mut state = self.state();
                        state.unrecovered.insert(key.clone(), error);
                        state.missing = true;
                        Ok(None)
                    }
                }
            }
            NodeState::New | NodeState::InProgress => {
                self.state().missing = true;
                Ok(None)
            }
        }
    }

    fn dep_view(&self, key: &NodeKey) -> EntryView {
        if let Some((failed, error)) = &self.inner.injected_error {
            if failed == key {
                return EntryView {
                    state: NodeState::Errored,
                    value: None,
                    error: Some(error.clone()),
                };
            }
        }
        match self.inner.graph.get(key) {
            Some(entry) => entry.view(),
            None => EntryView {
                state: NodeState::New,
                value: None,
                error: None,
            },
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EnvState> {
        self.inner.state.lock().expect("environment state poisoned")
    }
}
