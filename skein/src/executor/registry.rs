//! The function registry.
//!
//! Each key family maps to one [`NodeFunction`]: a type-erased async compute
//! function plus a tag extractor used by the event output filter. Executors
//! for heterogeneous computations are stored behind one boxed signature, so
//! the worker can invoke any family without knowing concrete types at
//! compile time.
//!
//! The registry is immutable once built; construct it with
//! [`FunctionRegistry::builder`].

use crate::core::{FamilyName, FunctionError, NodeKey, Value};
use crate::executor::env::Environment;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What one compute invocation produces.
///
/// `Ok(Some(value))` finishes the key. `Ok(None)` means "a requested dep was
/// not built yet; re-run me once every dep of this invocation is terminal".
/// `Err` fails the key with a domain error.
pub type ComputeResult = Result<Option<Value>, FunctionError>;

/// Boxed future returned by a compute function.
pub type ComputeFuture = Pin<Box<dyn Future<Output = ComputeResult> + Send>>;

type BoxedCompute = Arc<dyn Fn(NodeKey, Environment) -> ComputeFuture + Send + Sync>;
type BoxedTagExtractor = Arc<dyn Fn(&NodeKey) -> Option<String> + Send + Sync>;

/// The compute function and tag extractor registered for one key family.
pub struct NodeFunction {
    compute: BoxedCompute,
    extract_tag: BoxedTagExtractor,
}

impl NodeFunction {
    /// Wraps an async compute function. The default tag extractor returns
    /// `None`, which makes every event of this family pass the output
    /// filter.
    pub fn new<F, Fut>(compute: F) -> Self
    where
        F: Fn(NodeKey, Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        Self {
            compute: Arc::new(move |key, env| Box::pin(compute(key, env))),
            extract_tag: Arc::new(|_| None),
        }
    }

    /// Installs a tag extractor. The extracted tag is attached to every
    /// event the function emits and matched against the reporter's output
    /// filter.
    pub fn with_tag_extractor<G>(mut self, extract: G) -> Self
    where
        G: Fn(&NodeKey) -> Option<String> + Send + Sync + 'static,
    {
        self.extract_tag = Arc::new(extract);
        self
    }

    pub(crate) fn invoke(&self, key: NodeKey, env: Environment) -> ComputeFuture {
        (self.compute)(key, env)
    }

    pub(crate) fn extract_tag(&self, key: &NodeKey) -> Option<String> {
        (self.extract_tag)(key)
    }
}

/// Immutable mapping from key family to compute function.
///
/// # Example
///
/// ```ignore
/// let registry = FunctionRegistry::builder()
///     .register("leaf", |key: NodeKey, _env: Environment| async move {
///         Ok(Some(Value::new(key.argument().to_string())))
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct FunctionRegistry {
    functions: HashMap<FamilyName, NodeFunction>,
}

impl FunctionRegistry {
    /// Starts building a registry.
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder {
            registry: FunctionRegistry::default(),
        }
    }

    /// Looks up the function for a family.
    pub fn get(&self, family: &FamilyName) -> Option<&NodeFunction> {
        self.functions.get(family)
    }

    /// Number of registered families.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Builder for [`FunctionRegistry`].
pub struct FunctionRegistryBuilder {
    registry: FunctionRegistry,
}

impl FunctionRegistryBuilder {
    /// Registers a compute function for a family. A later registration for
    /// the same family replaces the earlier one.
    pub fn register<F, Fut>(self, family: impl Into<FamilyName>, compute: F) -> Self
    where
        F: Fn(NodeKey, Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ComputeResult> + Send + 'static,
    {
        self.register_function(family, NodeFunction::new(compute))
    }

    /// Registers a prebuilt [`NodeFunction`], e.g. one carrying a tag
    /// extractor.
    pub fn register_function(
        mut self,
        family: impl Into<FamilyName>,
        function: NodeFunction,
    ) -> Self {
        self.registry.functions.insert(family.into(), function);
        self
    }

    pub fn build(self) -> FunctionRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = FunctionRegistry::builder()
            .register("leaf", |key: NodeKey, _env| async move {
                Ok(Some(Value::new(key.argument().to_string())))
            })
            .build();

        assert_eq!(registry.len(), 1);
        assert!(registry.get(&FamilyName::new("leaf")).is_some());
        assert!(registry.get(&FamilyName::new("absent")).is_none());
    }

    #[test]
    fn test_tag_extractor() {
        let function = NodeFunction::new(|_key, _env| async { Ok(None) })
            .with_tag_extractor(|key| Some(key.argument().to_string()));

        let key = NodeKey::new("test", "a");
        assert_eq!(function.extract_tag(&key), Some("a".to_string()));

        let untagged = NodeFunction::new(|_key, _env| async { Ok(None) });
        assert_eq!(untagged.extract_tag(&key), None);
    }
}
