//! Evaluator-level errors.
//!
//! These are the failures that abort an evaluation outright, as opposed to
//! per-key failures which are reported through the result's error map.

use crate::core::{FamilyName, NodeKey};
use thiserror::Error;

/// Errors that terminate `Evaluator::eval` without a result.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvalError {
    /// The evaluation was cancelled from outside; in-flight work was
    /// abandoned.
    #[error("evaluation interrupted")]
    Interrupted,

    /// A compute function panicked. Never stored on the entry; always fatal.
    #[error("Unrecoverable error while evaluating node '{node}' (requested by nodes '{requested_by}'): {cause}")]
    Unrecoverable {
        /// The key whose function panicked.
        node: String,
        /// The keys that requested it, joined with `', '`.
        requested_by: String,
        /// The panic payload, rendered as text.
        cause: String,
    },

    /// A key named a family with no registered function.
    #[error("no function registered for key family '{0}'")]
    NoSuchFamily(FamilyName),

    /// A compute function asked to be re-run without anything left to wait
    /// for.
    #[error("function for '{0}' returned no value with no deps missing")]
    InvalidRestart(NodeKey),
}

pub type Result<T> = std::result::Result<T, EvalError>;

impl EvalError {
    pub(crate) fn unrecoverable(
        node: &NodeKey,
        requested_by: &[NodeKey],
        cause: String,
    ) -> Self {
        let requested_by = requested_by
            .iter()
            .map(|key| key.to_string())
            .collect::<Vec<_>>()
            .join("', '");
        EvalError::Unrecoverable {
            node: node.to_string(),
            requested_by,
            cause,
        }
    }
}
