//! Opaque node values.
//!
//! The evaluator never inspects the values it stores; it only moves them
//! between the graph and compute functions. Values are type-erased behind
//! [`NodeValue`] and shared with cheap reference-counted clones, the same way
//! flow results are type-erased in a registry of heterogeneous executors.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A payload that can be stored as the result of a computed key.
///
/// Implemented automatically for every `Debug + Send + Sync + 'static` type,
/// so plain data types qualify without any ceremony.
pub trait NodeValue: fmt::Debug + Send + Sync + 'static {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: fmt::Debug + Send + Sync + 'static> NodeValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An immutable, shared value associated with a successfully computed key.
///
/// # Examples
///
/// ```
/// use skein::Value;
///
/// let value = Value::new("contents".to_string());
/// assert_eq!(value.downcast_ref::<String>().unwrap(), "contents");
/// assert!(value.downcast_ref::<u32>().is_none());
/// ```
#[derive(Clone)]
pub struct Value(Arc<dyn NodeValue>);

impl Value {
    /// Wraps a payload into a shared value.
    pub fn new<T: NodeValue>(payload: T) -> Self {
        Self(Arc::new(payload))
    }

    /// Returns a reference to the payload if it has type `T`.
    pub fn downcast_ref<T: NodeValue>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref()
    }

    /// Returns true if the payload has type `T`.
    pub fn is<T: NodeValue>(&self) -> bool {
        (*self.0).as_any().is::<T>()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", self.0)
    }
}
