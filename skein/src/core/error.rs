//! Error descriptors for failed computations.
//!
//! Three failure modes are distinguished:
//!
//! - a *domain error*: the compute function returned a [`FunctionError`],
//!   declared and potentially recoverable by parents;
//! - a *catastrophic error*: a domain error marked catastrophic, which halts
//!   all further evaluation even under keep-going;
//! - an *unexpected error*: the compute future panicked, which aborts the
//!   whole evaluation (see `executor::EvalError`).
//!
//! Everything a terminal errored key carries is summarized in [`ErrorInfo`]:
//! the exception (if any), the set of keys whose own failure caused it, and
//! any dependency cycles attributed to it.

use crate::core::key::NodeKey;
use indexmap::IndexSet;
use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// A domain error raised by a compute function.
///
/// Implemented automatically for every `std::error::Error + Send + Sync +
/// 'static` type. Parents recover from a child's error by asking for it with
/// a concrete error type (see `Environment::get_value_or_match`); the match
/// is by runtime type, not by any error hierarchy.
pub trait NodeError: StdError + Send + Sync + 'static {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Converts a shared error into a shared [`Any`] for downcasting.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E: StdError + Send + Sync + 'static> NodeError for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Attempts to view a shared node error as the concrete type `E`.
pub fn downcast_node_error<E: NodeError>(error: &Arc<dyn NodeError>) -> Option<Arc<E>> {
    if (**error).as_any().is::<E>() {
        Arc::clone(error).into_any_arc().downcast::<E>().ok()
    } else {
        None
    }
}

/// The error value a compute function returns.
///
/// Wraps the domain error and records whether it is catastrophic. A
/// catastrophic error supersedes keep-going and halts scheduling.
///
/// # Example
///
/// ```ignore
/// return Err(FunctionError::new(MyError::Corrupt(path)));
/// // or, to stop the whole evaluation:
/// return Err(FunctionError::new(MyError::Corrupt(path)).catastrophic());
/// ```
#[derive(Debug, Clone)]
pub struct FunctionError {
    cause: Arc<dyn NodeError>,
    catastrophic: bool,
}

impl FunctionError {
    /// Wraps a domain error.
    pub fn new(cause: impl NodeError) -> Self {
        Self {
            cause: Arc::new(cause),
            catastrophic: false,
        }
    }

    /// Marks this error as catastrophic.
    pub fn catastrophic(mut self) -> Self {
        self.catastrophic = true;
        self
    }

    /// Returns the wrapped domain error.
    pub fn cause(&self) -> &Arc<dyn NodeError> {
        &self.cause
    }

    /// Returns true if the error halts all further evaluation.
    pub fn is_catastrophic(&self) -> bool {
        self.catastrophic
    }
}

impl fmt::Display for FunctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cause)
    }
}

/// One dependency cycle attributed to a key.
///
/// `cycle` lists the keys on the cycle starting at its entry point (first key
/// distinct from the last; the closing edge is implicit). `path_to_cycle`
/// lists the keys from the requested key (inclusive) down to the cycle entry
/// point (exclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    path_to_cycle: Vec<NodeKey>,
    cycle: Vec<NodeKey>,
}

impl CycleInfo {
    /// Creates a cycle record.
    pub fn new(path_to_cycle: Vec<NodeKey>, cycle: Vec<NodeKey>) -> Self {
        Self {
            path_to_cycle,
            cycle,
        }
    }

    /// The keys on the cycle, starting at its entry point.
    pub fn cycle(&self) -> &[NodeKey] {
        &self.cycle
    }

    /// The keys leading from a requested key to the cycle.
    pub fn path_to_cycle(&self) -> &[NodeKey] {
        &self.path_to_cycle
    }

    /// Re-roots this cycle record at `key`: a key inside the cycle sees the
    /// cycle rotated to start at itself with an empty path, a key above it
    /// sees itself prepended to the path.
    pub(crate) fn prepared_for(&self, key: &NodeKey) -> CycleInfo {
        if let Some(pos) = self.cycle.iter().position(|k| k == key) {
            let mut rotated = self.cycle[pos..].to_vec();
            rotated.extend_from_slice(&self.cycle[..pos]);
            CycleInfo::new(Vec::new(), rotated)
        } else {
            let mut path = Vec::with_capacity(self.path_to_cycle.len() + 1);
            path.push(key.clone());
            path.extend_from_slice(&self.path_to_cycle);
            CycleInfo::new(path, self.cycle.clone())
        }
    }
}

/// Cap on the number of cycles recorded per key.
pub(crate) const MAX_CYCLES_PER_KEY: usize = 20;

/// Everything known about why a key failed.
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    exception: Option<Arc<dyn NodeError>>,
    root_causes: IndexSet<NodeKey>,
    cycles: Vec<CycleInfo>,
    catastrophic: bool,
}

impl ErrorInfo {
    /// Builds the error info for a key whose own function failed.
    pub fn from_function_error(key: &NodeKey, error: FunctionError) -> Self {
        let mut root_causes = IndexSet::new();
        root_causes.insert(key.clone());
        Self {
            exception: Some(Arc::clone(error.cause())),
            root_causes,
            cycles: Vec::new(),
            catastrophic: error.is_catastrophic(),
        }
    }

    /// Builds the error info for `key` failing because of its children.
    ///
    /// Root causes are the union of the children's root causes, in order; the
    /// exception is the first child exception; child cycles are re-rooted at
    /// `key`, deduplicated on the cycle sequence (so two paths to the same
    /// cycle collapse while two rotations of it do not), and capped.
    pub fn from_child_errors<'a>(
        key: &NodeKey,
        children: impl IntoIterator<Item = &'a ErrorInfo>,
    ) -> Self {
        let mut info = ErrorInfo::default();
        for child in children {
            if info.exception.is_none() {
                info.exception = child.exception.clone();
            }
            for cause in &child.root_causes {
                info.root_causes.insert(cause.clone());
            }
            for cycle in &child.cycles {
                let prepared = cycle.prepared_for(key);
                if info.cycles.len() < MAX_CYCLES_PER_KEY
                    && !info.cycles.iter().any(|c| c.cycle() == prepared.cycle())
                {
                    info.cycles.push(prepared);
                }
            }
            info.catastrophic |= child.catastrophic;
        }
        info
    }

    /// Builds the error info for a key that sits on or above cycles.
    pub fn from_cycles(cycles: Vec<CycleInfo>) -> Self {
        Self {
            cycles,
            ..ErrorInfo::default()
        }
    }

    /// Merges two error infos for the same key, e.g. a propagated exception
    /// discovered during shutdown with cycles discovered afterwards.
    pub fn merged(first: &ErrorInfo, second: &ErrorInfo) -> Self {
        let mut info = first.clone();
        if info.exception.is_none() {
            info.exception = second.exception.clone();
        }
        for cause in &second.root_causes {
            info.root_causes.insert(cause.clone());
        }
        info.cycles.extend(second.cycles.iter().cloned());
        info.catastrophic |= second.catastrophic;
        info
    }

    /// The exception carried by this error, if any. Cycle-only errors carry
    /// none.
    pub fn exception(&self) -> Option<&Arc<dyn NodeError>> {
        self.exception.as_ref()
    }

    /// The keys whose own failure (not inherited) caused this error.
    pub fn root_causes(&self) -> &IndexSet<NodeKey> {
        &self.root_causes
    }

    /// The cycles attributed to this key.
    pub fn cycles(&self) -> &[CycleInfo] {
        &self.cycles
    }

    /// Returns true if this error halted the evaluation.
    pub fn is_catastrophic(&self) -> bool {
        self.catastrophic
    }

    pub(crate) fn push_cycles(&mut self, cycles: impl IntoIterator<Item = CycleInfo>) {
        self.cycles.extend(cycles);
    }

    pub(crate) fn add_root_causes<'a>(&mut self, causes: impl IntoIterator<Item = &'a NodeKey>) {
        for cause in causes {
            self.root_causes.insert(cause.clone());
        }
    }

    pub(crate) fn set_exception_if_absent(&mut self, exception: Option<Arc<dyn NodeError>>) {
        if self.exception.is_none() {
            self.exception = exception;
        }
    }
}
