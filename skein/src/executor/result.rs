//! Evaluation results.

use crate::core::{ErrorInfo, NodeKey, NodeValue, Value};
use indexmap::IndexMap;

/// What one evaluation produced for its requested keys.
///
/// Each requested key maps to a value, an error, or nothing at all (possible
/// only under fail-fast, for keys the shutdown left unattempted).
#[derive(Debug, Default)]
pub struct EvaluationResult {
    values: IndexMap<NodeKey, Value>,
    errors: IndexMap<NodeKey, ErrorInfo>,
    any_error_encountered: bool,
}

impl EvaluationResult {
    pub(crate) fn new(
        values: IndexMap<NodeKey, Value>,
        errors: IndexMap<NodeKey, ErrorInfo>,
        any_error_encountered: bool,
    ) -> Self {
        Self {
            values,
            errors,
            any_error_encountered,
        }
    }

    /// The value computed for `key`, if it succeeded.
    pub fn get(&self, key: &NodeKey) -> Option<&Value> {
        self.values.get(key)
    }

    /// The value for `key`, downcast to `T`.
    pub fn get_as<T: NodeValue>(&self, key: &NodeKey) -> Option<&T> {
        self.values.get(key).and_then(|value| value.downcast_ref())
    }

    /// The error recorded for `key`, if it failed.
    pub fn error(&self, key: &NodeKey) -> Option<&ErrorInfo> {
        self.errors.get(key)
    }

    /// The first recorded error, if any.
    pub fn first_error(&self) -> Option<(&NodeKey, &ErrorInfo)> {
        self.errors.first()
    }

    /// All successfully computed keys, in request order.
    pub fn values(&self) -> &IndexMap<NodeKey, Value> {
        &self.values
    }

    /// All failed keys, in attribution order.
    pub fn errors(&self) -> &IndexMap<NodeKey, ErrorInfo> {
        &self.errors
    }

    /// True if any error was encountered during the evaluation, including
    /// errors a key recovered from. A result can have `has_error()` true
    /// with an empty error map.
    pub fn has_error(&self) -> bool {
        self.any_error_encountered || !self.errors.is_empty()
    }
}
