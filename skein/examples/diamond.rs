//! Diamond dependency graph: two combiners sharing a pair of leaves.
//!
//! Run with: `cargo run --example diamond`

use skein::prelude::*;
use skein::Value;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // "leaf" keys carry their own argument as value; "concat" keys join the
    // values of the leaves named by their comma-separated argument.
    let registry = FunctionRegistry::builder()
        .register("leaf", |key: NodeKey, _env: Environment| async move {
            Ok(Some(Value::new(key.argument().to_string())))
        })
        .register("concat", |key: NodeKey, env: Environment| async move {
            let deps: Vec<NodeKey> = key
                .argument()
                .split(',')
                .map(|leaf| NodeKey::new("leaf", leaf))
                .collect();
            let values = env.get_values(&deps);
            if env.values_missing() {
                return Ok(None);
            }
            let mut combined = String::new();
            for value in values.into_iter().flatten() {
                combined.push_str(value.downcast_ref::<String>().expect("string value"));
            }
            Ok(Some(Value::new(combined)))
        })
        .build();

    let graph = Arc::new(InMemoryGraph::new());
    let evaluator = Evaluator::new(graph.clone(), registry).parallelism(4);

    let left = NodeKey::new("concat", "a,b");
    let right = NodeKey::new("concat", "b,c");

    // The two combiners evaluate in parallel and share the leaf "b".
    let result = evaluator.eval([left.clone(), right.clone()]).await?;
    println!("left  = {}", result.get_as::<String>(&left).unwrap());
    println!("right = {}", result.get_as::<String>(&right).unwrap());

    // A second evaluation on the same graph is served from the store.
    let result = evaluator.eval([left.clone()]).await?;
    println!("again = {}", result.get_as::<String>(&left).unwrap());

    println!("\ndependency graph:\n{}", graph.to_dot());
    Ok(())
}
