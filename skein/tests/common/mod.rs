//! Shared test harness: a configurable node table driving one registered
//! function, so tests can declare little graphs declaratively.
//!
//! Unless a node carries a preset value or an explicit builder, its value is
//! the concatenation of its deps' values in declaration order (recovery
//! values substitute for caught failures). Unknown names act as leaves whose
//! value is their own name.

#![allow(dead_code)]

use skein::executor::ComputeFuture;
use skein::{
    Environment, ErrorInfo, EvaluationResult, EvaluationState, Evaluator, FunctionError,
    FunctionRegistry, InMemoryGraph, NodeFunction, NodeKey, ProgressReceiver, Value,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const FAMILY: &str = "test";

/// The domain error the harness throws, and the class its error deps catch.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TestError(pub String);

/// A domain error no error dep declares, for unrecoverable-by-class cases.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct UnrelatedError(pub String);

pub fn key(name: &str) -> NodeKey {
    NodeKey::new(FAMILY, name)
}

pub fn keys(names: &[&str]) -> Vec<NodeKey> {
    names.iter().map(|name| key(name)).collect()
}

type CustomBuilder = Arc<dyn Fn(NodeKey, Environment) -> ComputeFuture + Send + Sync>;

#[derive(Default, Clone)]
struct NodeConfig {
    value: Option<String>,
    deps: Vec<String>,
    error_deps: Vec<(String, String)>,
    has_error: bool,
    unrelated_error: bool,
    catastrophic: bool,
    warning: Option<String>,
    tag: Option<String>,
    builder: Option<CustomBuilder>,
}

/// Declarative graph definition shared with the registered function.
#[derive(Default, Clone)]
pub struct Harness {
    nodes: Arc<Mutex<HashMap<String, NodeConfig>>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, name: &str, edit: impl FnOnce(&mut NodeConfig)) {
        let mut nodes = self.nodes.lock().expect("harness poisoned");
        edit(nodes.entry(name.to_string()).or_default());
    }

    /// Gives the node a fixed value, ignoring any deps.
    pub fn set(&self, name: &str, value: &str) -> &Self {
        self.update(name, |config| config.value = Some(value.to_string()));
        self
    }

    pub fn clear_value(&self, name: &str) -> &Self {
        self.update(name, |config| config.value = None);
        self
    }

    pub fn add_dep(&self, name: &str, dep: &str) -> &Self {
        self.update(name, |config| config.deps.push(dep.to_string()));
        self
    }

    /// Declares a dep requested with error recovery: if the dep fails with a
    /// [`TestError`], `recovery` substitutes for its value.
    pub fn add_error_dep(&self, name: &str, dep: &str, recovery: &str) -> &Self {
        self.update(name, |config| {
            config.error_deps.push((dep.to_string(), recovery.to_string()));
        });
        self
    }

    pub fn set_has_error(&self, name: &str, has_error: bool) -> &Self {
        self.update(name, |config| config.has_error = has_error);
        self
    }

    /// Makes the node fail with an error class no error dep catches.
    pub fn set_unrelated_error(&self, name: &str) -> &Self {
        self.update(name, |config| config.unrelated_error = true);
        self
    }

    pub fn set_catastrophic(&self, name: &str) -> &Self {
        self.update(name, |config| {
            config.has_error = true;
            config.catastrophic = true;
        });
        self
    }

    pub fn set_warning(&self, name: &str, warning: &str) -> &Self {
        self.update(name, |config| config.warning = Some(warning.to_string()));
        self
    }

    pub fn set_tag(&self, name: &str, tag: &str) -> &Self {
        self.update(name, |config| config.tag = Some(tag.to_string()));
        self
    }

    /// Replaces the node's behavior with an explicit builder.
    pub fn set_builder<F, Fut>(&self, name: &str, builder: F) -> &Self
    where
        F: Fn(NodeKey, Environment) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = skein::executor::ComputeResult> + Send + 'static,
    {
        let wrapped: CustomBuilder = Arc::new(move |key, env| Box::pin(builder(key, env)));
        self.update(name, |config| config.builder = Some(wrapped));
        self
    }

    pub fn registry(&self) -> FunctionRegistry {
        let nodes = self.nodes.clone();
        let tag_nodes = self.nodes.clone();
        let function = NodeFunction::new(move |key: NodeKey, env: Environment| {
            let nodes = nodes.clone();
            async move { compute(nodes, key, env).await }
        })
        .with_tag_extractor(move |key| {
            tag_nodes
                .lock()
                .expect("harness poisoned")
                .get(key.argument())
                .and_then(|config| config.tag.clone())
        });
        FunctionRegistry::builder()
            .register_function(FAMILY, function)
            .build()
    }

    pub fn evaluator(&self, graph: &Arc<InMemoryGraph>) -> Evaluator {
        Evaluator::new(graph.clone(), self.registry())
    }
}

async fn compute(
    nodes: Arc<Mutex<HashMap<String, NodeConfig>>>,
    node_key: NodeKey,
    env: Environment,
) -> skein::executor::ComputeResult {
    let config = {
        let nodes = nodes.lock().expect("harness poisoned");
        nodes.get(node_key.argument()).cloned()
    };
    let Some(config) = config else {
        // Undeclared nodes act as leaves.
        return Ok(Some(Value::new(node_key.argument().to_string())));
    };
    if let Some(builder) = config.builder.clone() {
        return builder(node_key, env).await;
    }
    if let Some(warning) = &config.warning {
        env.warn(warning.clone());
    }

    let mut parts: Vec<String> = Vec::new();
    for (dep, recovery) in &config.error_deps {
        match env.get_value_or_match::<TestError>(&key(dep)) {
            Ok(Some(value)) => parts.push(string_of(&value)),
            Ok(None) => {}
            Err(_caught) => parts.push(recovery.clone()),
        }
    }
    let dep_keys = keys(&config.deps.iter().map(String::as_str).collect::<Vec<_>>());
    for value in env.get_values(&dep_keys).into_iter().flatten() {
        parts.push(string_of(&value));
    }
    if env.values_missing() {
        return Ok(None);
    }

    if config.has_error {
        let error = FunctionError::new(TestError(node_key.to_string()));
        return Err(if config.catastrophic {
            error.catastrophic()
        } else {
            error
        });
    }
    if config.unrelated_error {
        return Err(FunctionError::new(UnrelatedError(node_key.to_string())));
    }
    if let Some(value) = &config.value {
        return Ok(Some(Value::new(value.clone())));
    }
    Ok(Some(Value::new(parts.concat())))
}

/// Evaluates `roots` with default settings and unwraps the result.
pub async fn eval(
    harness: &Harness,
    graph: &Arc<InMemoryGraph>,
    keep_going: bool,
    roots: &[&str],
) -> EvaluationResult {
    harness
        .evaluator(graph)
        .keep_going(keep_going)
        .eval(keys(roots))
        .await
        .expect("evaluation failed")
}

pub fn string_of(value: &Value) -> String {
    value
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_else(|| format!("{:?}", value))
}

/// The string value computed for `name`, or None.
pub fn value_of(result: &EvaluationResult, name: &str) -> Option<String> {
    result.get(&key(name)).map(string_of)
}

/// Sorted argument names of an error's root causes.
pub fn cause_args(info: &ErrorInfo) -> Vec<String> {
    let mut causes: Vec<String> = info
        .root_causes()
        .iter()
        .map(|key| key.argument().to_string())
        .collect();
    causes.sort();
    causes
}

/// Argument names of a key sequence, in order.
pub fn arg_names(keys: &[NodeKey]) -> Vec<String> {
    keys.iter().map(|key| key.argument().to_string()).collect()
}

/// Progress receiver that records every callback.
#[derive(Default)]
pub struct Recorder {
    pub enqueued: Mutex<Vec<NodeKey>>,
    pub evaluated: Mutex<Vec<(NodeKey, EvaluationState)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn enqueued_args(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .enqueued
            .lock()
            .expect("recorder poisoned")
            .iter()
            .map(|key| key.argument().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn evaluated_args(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .evaluated
            .lock()
            .expect("recorder poisoned")
            .iter()
            .map(|(key, _)| key.argument().to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn state_of(&self, name: &str) -> Option<EvaluationState> {
        self.evaluated
            .lock()
            .expect("recorder poisoned")
            .iter()
            .rev()
            .find(|(key, _)| key.argument() == name)
            .map(|(_, state)| *state)
    }

    pub fn clear(&self) {
        self.enqueued.lock().expect("recorder poisoned").clear();
        self.evaluated.lock().expect("recorder poisoned").clear();
    }
}

impl ProgressReceiver for Recorder {
    fn enqueueing(&self, key: &NodeKey) {
        self.enqueued
            .lock()
            .expect("recorder poisoned")
            .push(key.clone());
    }

    fn evaluated(&self, key: &NodeKey, _value: Option<&Value>, state: EvaluationState) {
        self.evaluated
            .lock()
            .expect("recorder poisoned")
            .push((key.clone(), state));
    }
}
