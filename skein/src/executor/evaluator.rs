//! The parallel evaluator.
//!
//! [`Evaluator::eval`] drives a set of requested keys to completion: roots
//! are enqueued on a shared work queue, a dispatcher loop spawns one task per
//! ready key (bounded by the configured parallelism), and each task invokes
//! the key's compute function through an [`Environment`]. A function that
//! saw a missing dep returns the restart sentinel and its key is re-enqueued
//! by whichever dep completes its wave last.
//!
//! When no more work can be scheduled, errors are walked up toward the
//! requested keys (fail-fast only; keep-going propagation happens through
//! normal scheduling) and dependency cycles are extracted from whatever is
//! still unfinished. The result maps every requested key to a value, an
//! error, or nothing at all.

use crate::core::{ErrorInfo, Event, NodeKey, Reporter, Value};
use crate::executor::bubble;
use crate::executor::cycles;
use crate::executor::env::{EnvState, Environment};
use crate::executor::error::{EvalError, Result};
use crate::executor::progress::{EvaluationState, ProgressReceiver};
use crate::executor::registry::FunctionRegistry;
use crate::executor::result::EvaluationResult;
use crate::graph::entry::{NodeEntry, Schedule};
use crate::graph::{DepGraph, NodeState};
use dashmap::DashSet;
use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default worker-pool size.
pub const DEFAULT_PARALLELISM: usize = 200;

static RUN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Evaluates requested keys against a graph and a function registry.
///
/// Configure with the consuming `with_*`-style builders, then call
/// [`Self::eval`] as many times as needed; results accumulate in the graph,
/// so a second evaluation of an unchanged key is served from the store.
///
/// # Example
///
/// ```ignore
/// let evaluator = Evaluator::new(graph, registry)
///     .keep_going(true)
///     .parallelism(16)
///     .reporter(Reporter::new(collector.clone()));
/// let result = evaluator.eval([key]).await?;
/// ```
pub struct Evaluator {
    graph: Arc<dyn DepGraph>,
    registry: Arc<FunctionRegistry>,
    reporter: Reporter,
    progress: Option<Arc<dyn ProgressReceiver>>,
    keep_going: bool,
    parallelism: usize,
    cancel: CancellationToken,
}

impl Evaluator {
    /// Creates an evaluator in fail-fast mode with default parallelism, no
    /// progress receiver, and a discarding reporter.
    pub fn new(graph: Arc<dyn DepGraph>, registry: FunctionRegistry) -> Self {
        Self {
            graph,
            registry: Arc::new(registry),
            reporter: Reporter::discard(),
            progress: None,
            keep_going: false,
            parallelism: DEFAULT_PARALLELISM,
            cancel: CancellationToken::new(),
        }
    }

    /// Continue past individual failures instead of halting on the first.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Limits how many compute functions run concurrently.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Installs the sink diagnostic events are delivered to.
    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Installs an observer for enqueue/evaluated callbacks.
    pub fn progress_receiver(mut self, progress: Arc<dyn ProgressReceiver>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Installs an external cancellation signal. Cancelling it makes workers
    /// abandon in-flight work between compute invocations and `eval` return
    /// [`EvalError::Interrupted`].
    pub fn cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Evaluates the given roots and returns a result mapping each of them
    /// to a value or an error.
    pub async fn eval<I>(&self, roots: I) -> Result<EvaluationResult>
    where
        I: IntoIterator<Item = NodeKey>,
    {
        let roots: Vec<NodeKey> = {
            let set: IndexSet<NodeKey> = roots.into_iter().collect();
            set.into_iter().collect()
        };
        let run = RUN_COUNTER.fetch_add(1, Ordering::SeqCst) + 1;
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(EvalContext {
            graph: self.graph.clone(),
            registry: self.registry.clone(),
            reporter: self.reporter.clone(),
            progress: self.progress.clone(),
            keep_going: self.keep_going,
            run,
            queue: queue_tx,
            active: AtomicUsize::new(0),
            shutdown: self.cancel.child_token(),
            first_error: OnceLock::new(),
            catastrophe: OnceLock::new(),
            fatal: Mutex::new(None),
            errors_seen: AtomicBool::new(false),
            emitted: DashSet::new(),
            eval_id: Uuid::new_v4(),
        });

        info!(
            eval_id = %ctx.eval_id,
            roots = roots.len(),
            keep_going = self.keep_going,
            parallelism = self.parallelism,
            "starting evaluation"
        );

        for root in &roots {
            let entry = ctx.graph.create_if_absent(root);
            if entry.is_terminal() {
                // Served from the store: replay its events and report it
                // clean, but schedule nothing.
                if ctx.emitted.insert(root.clone()) {
                    for event in entry.stored_events() {
                        ctx.reporter.report(&event);
                    }
                }
                let value = entry.value();
                ctx.evaluated(root, value.as_ref(), EvaluationState::Clean);
            } else {
                schedule_key(&ctx, root);
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut task_keys: HashMap<tokio::task::Id, NodeKey> = HashMap::new();
        let mut interrupted = false;

        loop {
            if ctx.active.load(Ordering::SeqCst) == 0 && tasks.is_empty() {
                break;
            }
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(eval_id = %ctx.eval_id, "evaluation cancelled; abandoning in-flight work");
                    interrupted = true;
                    tasks.shutdown().await;
                    break;
                }

                _ = ctx.shutdown.cancelled() => {
                    debug!(eval_id = %ctx.eval_id, "halting scheduling");
                    tasks.shutdown().await;
                    break;
                }

                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    ctx.active.fetch_sub(1, Ordering::SeqCst);
                    match joined {
                        Ok((id, ())) => {
                            task_keys.remove(&id);
                        }
                        Err(join_error) => {
                            let key = task_keys.remove(&join_error.id());
                            if join_error.is_panic() {
                                let cause = panic_message(join_error.into_panic());
                                let (node, requested_by) = match key {
                                    Some(key) => {
                                        let parents = ctx
                                            .graph
                                            .get(&key)
                                            .map(|entry| entry.reverse_deps())
                                            .unwrap_or_default();
                                        (key, parents)
                                    }
                                    None => (NodeKey::new("unknown", "unknown"), Vec::new()),
                                };
                                ctx.report_fatal(EvalError::unrecoverable(
                                    &node,
                                    &requested_by,
                                    cause,
                                ));
                            }
                        }
                    }
                }

                Some(key) = queue_rx.recv() => {
                    let id = tasks
                        .spawn(run_node(ctx.clone(), key.clone(), semaphore.clone()))
                        .id();
                    task_keys.insert(id, key);
                }
            }
        }

        if interrupted || self.cancel.is_cancelled() {
            return Err(EvalError::Interrupted);
        }
        if let Some(fatal) = ctx.fatal.lock().expect("fatal slot poisoned").take() {
            return Err(fatal);
        }

        // Fail-fast: attribute the error that stopped the scheduler to the
        // requested keys above it. Catastrophes halt without attribution.
        let root_set: IndexSet<NodeKey> = roots.iter().cloned().collect();
        let mut side_errors = IndexMap::new();
        if !self.keep_going && ctx.catastrophe.get().is_none() {
            if let Some(origin) = ctx.first_error.get() {
                side_errors = bubble::bubble_error_up(&ctx, origin, &root_set).await;
            }
        }

        // Whatever is still unfinished can only be waiting on a cycle.
        cycles::check_for_cycles(&ctx, &roots);

        let mut values = IndexMap::new();
        let mut errors = IndexMap::new();
        for root in &roots {
            let entry = ctx
                .graph
                .get(root)
                .expect("requested key lost its graph entry");
            match entry.state() {
                NodeState::Done => {
                    if let Some(info) = entry.error_info() {
                        ctx.errors_seen.store(true, Ordering::SeqCst);
                        if !self.keep_going {
                            // A value recovered from a child failure is not
                            // usable under fail-fast; the absorbed error
                            // resurfaces instead.
                            errors.insert(root.clone(), info);
                            continue;
                        }
                    }
                    values.insert(
                        root.clone(),
                        entry.value().expect("done entry without value"),
                    );
                }
                NodeState::Errored => {
                    let info = entry.error_info().expect("errored entry without error");
                    let info = match side_errors.get(root) {
                        Some(side) => ErrorInfo::merged(side, &info),
                        None => info,
                    };
                    errors.insert(root.clone(), info);
                }
                NodeState::New | NodeState::InProgress => {
                    if let Some(side) = side_errors.get(root) {
                        errors.insert(root.clone(), side.clone());
                    }
                    // Otherwise the key was never attempted (fail-fast).
                }
            }
        }

        let result =
            EvaluationResult::new(values, errors, ctx.errors_seen.load(Ordering::SeqCst));
        info!(
            eval_id = %ctx.eval_id,
            values = result.values().len(),
            errors = result.errors().len(),
            "evaluation finished"
        );
        Ok(result)
    }
}

pub(crate) struct EvalContext {
    pub(crate) graph: Arc<dyn DepGraph>,
    pub(crate) registry: Arc<FunctionRegistry>,
    pub(crate) reporter: Reporter,
    progress: Option<Arc<dyn ProgressReceiver>>,
    pub(crate) keep_going: bool,
    pub(crate) run: u64,
    queue: UnboundedSender<NodeKey>,
    active: AtomicUsize,
    shutdown: CancellationToken,
    /// Key of the error that triggered a fail-fast halt.
    first_error: OnceLock<NodeKey>,
    /// Key of the catastrophic error, if one fired.
    catastrophe: OnceLock<NodeKey>,
    fatal: Mutex<Option<EvalError>>,
    pub(crate) errors_seen: AtomicBool,
    /// Keys whose stored events were already replayed in this evaluation.
    emitted: DashSet<NodeKey>,
    eval_id: Uuid,
}

impl EvalContext {
    fn enqueue(&self, key: NodeKey) {
        self.active.fetch_add(1, Ordering::SeqCst);
        let _ = self.queue.send(key);
    }

    fn enqueueing(&self, key: &NodeKey) {
        if let Some(progress) = &self.progress {
            progress.enqueueing(key);
        }
    }

    fn evaluated(&self, key: &NodeKey, value: Option<&Value>, state: EvaluationState) {
        if let Some(progress) = &self.progress {
            progress.evaluated(key, value, state);
        }
    }

    fn report_fatal(&self, error: EvalError) {
        let mut fatal = self.fatal.lock().expect("fatal slot poisoned");
        if fatal.is_none() {
            *fatal = Some(error);
        }
        drop(fatal);
        self.shutdown.cancel();
    }
}

async fn run_node(ctx: Arc<EvalContext>, key: NodeKey, semaphore: Arc<Semaphore>) {
    let Ok(_permit) = semaphore.acquire_owned().await else {
        return;
    };
    // Cancellation is observed between compute invocations; a function that
    // never yields is not interrupted inside one.
    if ctx.shutdown.is_cancelled() {
        return;
    }
    compute_node(&ctx, key).await;
}

async fn compute_node(ctx: &Arc<EvalContext>, key: NodeKey) {
    let entry = ctx.graph.create_if_absent(&key);
    let Some(invocation) = entry.begin_compute(ctx.run) else {
        return;
    };
    let Some(function) = ctx.registry.get(key.family()) else {
        ctx.report_fatal(EvalError::NoSuchFamily(key.family().clone()));
        return;
    };
    let tag = function.extract_tag(&key);
    debug!(key = %key, invocation, "invoking function");

    let env = Environment::new(key.clone(), tag, ctx.graph.clone(), ctx.keep_going);
    let outcome = function.invoke(key.clone(), env.clone()).await;
    let state = env.take_state();

    match outcome {
        Err(function_error) => {
            let info = ErrorInfo::from_function_error(&key, function_error);
            finalize_errored(ctx, &entry, &key, info, state.events, invocation);
        }
        Ok(Some(value)) => {
            register_dep_edges(ctx, &entry, &key, &state.groups);
            if state.unrecovered.is_empty() {
                finalize_done(ctx, &entry, &key, value, state, invocation);
            } else {
                // The function produced a value, but a child it did not
                // recover from failed; the failure wins.
                let info = ErrorInfo::from_child_errors(&key, state.unrecovered.values());
                finalize_errored(ctx, &entry, &key, info, state.events, invocation);
            }
        }
        Ok(None) => {
            entry.begin_registration();
            let mut subscribed = 0usize;
            for group in &state.groups {
                for dep in entry.add_dep_group(group) {
                    let child = ctx.graph.create_if_absent(&dep);
                    // Count the dep before registering, so a completion
                    // racing with us can only under- not over-wait.
                    entry.note_pending_dep();
                    let view = child.add_reverse_dep(&key);
                    if view.is_terminal() {
                        entry.note_dep_done();
                    } else {
                        subscribed += 1;
                        schedule_key(ctx, &dep);
                    }
                }
            }
            if entry.finish_registration() {
                // Every dep of this wave is already terminal; nothing will
                // signal us, so the next step is ours.
                if !state.unrecovered.is_empty() {
                    let info = ErrorInfo::from_child_errors(&key, state.unrecovered.values());
                    finalize_errored(ctx, &entry, &key, info, state.events, invocation);
                } else if state.missing || subscribed > 0 {
                    ctx.enqueue(key.clone());
                } else {
                    warn!(key = %key, "function requested a restart with nothing missing");
                    ctx.report_fatal(EvalError::InvalidRestart(key.clone()));
                }
            }
        }
    }
}

fn register_dep_edges(
    ctx: &Arc<EvalContext>,
    entry: &Arc<NodeEntry>,
    key: &NodeKey,
    groups: &[Vec<NodeKey>],
) {
    for group in groups {
        for dep in entry.add_dep_group(group) {
            let child = ctx.graph.create_if_absent(&dep);
            child.add_reverse_dep(key);
        }
    }
}

fn finalize_done(
    ctx: &Arc<EvalContext>,
    entry: &Arc<NodeEntry>,
    key: &NodeKey,
    value: Value,
    state: EnvState,
    invocation: u32,
) {
    // Events of done children are stored with this key so later evaluations
    // replay them; events of children that were already done before this run
    // are also forwarded to the sink now, once per run.
    let mut stored: Vec<Event> = Vec::new();
    let mut replay: Vec<Event> = Vec::new();
    for dep in entry.direct_deps() {
        let Some(dep_entry) = ctx.graph.get(&dep) else {
            continue;
        };
        if !dep_entry.is_terminal() {
            continue;
        }
        let events = dep_entry.stored_events();
        if events.is_empty() {
            continue;
        }
        stored.extend(events.iter().cloned());
        if !dep_entry.done_in_run(ctx.run) && ctx.emitted.insert(dep.clone()) {
            replay.extend(events);
        }
    }
    stored.extend(state.events.iter().cloned());
    replay.extend(state.events);

    let recovered = if state.delivered.is_empty() {
        None
    } else {
        ctx.errors_seen.store(true, Ordering::SeqCst);
        Some(ErrorInfo::from_child_errors(key, state.delivered.values()))
    };

    let parents = entry.set_value(ctx.run, value.clone(), stored, recovered);
    for event in &replay {
        ctx.reporter.report(event);
    }
    ctx.emitted.insert(key.clone());
    let eval_state = if invocation > 1 {
        EvaluationState::RestartedBuilt
    } else {
        EvaluationState::Built
    };
    ctx.evaluated(key, Some(&value), eval_state);
    debug!(key = %key, "built");
    signal_parents(ctx, key, parents);
}

fn finalize_errored(
    ctx: &Arc<EvalContext>,
    entry: &Arc<NodeEntry>,
    key: &NodeKey,
    info: ErrorInfo,
    events: Vec<Event>,
    invocation: u32,
) {
    ctx.errors_seen.store(true, Ordering::SeqCst);
    let catastrophic = info.is_catastrophic();
    let parents = entry.set_error(ctx.run, info);
    // The run's own events still reach the sink; they are just not stored.
    for event in &events {
        ctx.reporter.report(event);
    }
    let eval_state = if invocation > 1 {
        EvaluationState::RestartedBuilt
    } else {
        EvaluationState::Built
    };
    ctx.evaluated(key, None, eval_state);
    debug!(key = %key, catastrophic, "errored");

    if catastrophic {
        let _ = ctx.catastrophe.set(key.clone());
        ctx.shutdown.cancel();
    } else if !ctx.keep_going {
        let _ = ctx.first_error.set(key.clone());
        ctx.shutdown.cancel();
    }
    signal_parents(ctx, key, parents);
}

fn signal_parents(ctx: &Arc<EvalContext>, key: &NodeKey, parents: Vec<NodeKey>) {
    for parent in parents {
        let Some(parent_entry) = ctx.graph.get(&parent) else {
            continue;
        };
        if parent_entry.signal_dep(ctx.run, key) {
            ctx.enqueue(parent);
        }
    }
}

fn schedule_key(ctx: &Arc<EvalContext>, key: &NodeKey) {
    let entry = ctx.graph.create_if_absent(key);
    loop {
        match entry.try_schedule(ctx.run) {
            Schedule::Terminal | Schedule::AlreadyQueued => return,
            Schedule::Enqueue { first_time } => {
                if first_time {
                    ctx.enqueueing(key);
                }
                ctx.enqueue(key.clone());
                return;
            }
            Schedule::NeedsReset { stale_deps } => {
                debug!(key = %key, "resetting entry left unfinished by an earlier evaluation");
                for dep in stale_deps {
                    if let Some(dep_entry) = ctx.graph.get(&dep) {
                        dep_entry.remove_reverse_dep(key);
                    }
                }
                entry.reset_transient();
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
