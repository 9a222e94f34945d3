//! The evaluation engine.
//!
//! This module hides how work is scheduled and how failures are attributed:
//! the evaluator and its worker dispatch ([`evaluator`]), the view handed to
//! compute functions ([`env`]), the function registry ([`registry`]),
//! fail-fast error attribution ([`bubble`]), cycle extraction ([`cycles`]),
//! and the observer/result surfaces ([`progress`], [`result`]).

pub mod env;
pub mod error;
pub mod evaluator;
pub mod progress;
pub mod registry;
pub mod result;

mod bubble;
mod cycles;

pub use env::Environment;
pub use error::{EvalError, Result};
pub use evaluator::{Evaluator, DEFAULT_PARALLELISM};
pub use progress::{EvaluationState, ProgressReceiver};
pub use registry::{
    ComputeFuture, ComputeResult, FunctionRegistry, FunctionRegistryBuilder, NodeFunction,
};
pub use result::EvaluationResult;
