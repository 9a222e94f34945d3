//! Progress receiver callbacks.

use crate::core::{NodeKey, Value};

/// How a key reached the `evaluated` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    /// Computed in this evaluation with a single function invocation.
    Built,
    /// Computed in this evaluation after at least one restart.
    RestartedBuilt,
    /// Already terminal before this evaluation started.
    Clean,
}

/// Observer of evaluation progress.
///
/// `enqueueing` fires exactly once per key per evaluation, the first time the
/// key is added to the work queue. `evaluated` fires when a key reaches a
/// terminal state in this evaluation, and for requested keys that were
/// already terminal (with [`EvaluationState::Clean`]); deps that were already
/// terminal are not reported.
///
/// Callbacks run on worker tasks and must tolerate concurrency.
pub trait ProgressReceiver: Send + Sync {
    fn enqueueing(&self, _key: &NodeKey) {}

    fn evaluated(&self, _key: &NodeKey, _value: Option<&Value>, _state: EvaluationState) {}
}
