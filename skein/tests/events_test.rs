//! Diagnostic event recording, filtering, and replay.

mod common;

use common::*;
use regex::Regex;
use skein::{EventCollector, EventKind, EventMessage, InMemoryGraph, Reporter};
use std::sync::Arc;

struct Setup {
    harness: Harness,
    graph: Arc<InMemoryGraph>,
    collector: Arc<EventCollector>,
}

fn fresh() -> Setup {
    Setup {
        harness: Harness::new(),
        graph: Arc::new(InMemoryGraph::new()),
        collector: Arc::new(EventCollector::new()),
    }
}

impl Setup {
    fn reporter(&self) -> Reporter {
        Reporter::new(self.collector.clone())
    }

    async fn eval(&self, reporter: Reporter, roots: &[&str]) -> skein::EvaluationResult {
        self.harness
            .evaluator(&self.graph)
            .reporter(reporter)
            .eval(keys(roots))
            .await
            .expect("evaluation failed")
    }
}

#[tokio::test]
async fn test_simple_warning() {
    let s = fresh();
    s.harness.set("a", "a").set_warning("a", "warning on 'a'");

    let result = s.eval(s.reporter(), &["a"]).await;
    assert_eq!(value_of(&result, "a").unwrap(), "a");
    let events = s.collector.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind(), EventKind::Warning);
    assert_eq!(events[0].message().as_text(), Some("warning on 'a'"));
    assert!(!s.collector.has_errors());
}

#[tokio::test]
async fn test_warning_matches_filter() {
    let s = fresh();
    s.harness
        .set("example", "a value")
        .set_warning("example", "warning message")
        .set_tag("example", "a");

    let reporter = s.reporter().with_output_filter(Regex::new("a").unwrap());
    let result = s.eval(reporter, &["example"]).await;
    assert_eq!(value_of(&result, "example").unwrap(), "a value");
    assert_eq!(s.collector.len(), 1);
}

#[tokio::test]
async fn test_warning_with_non_matching_tag_dropped() {
    let s = fresh();
    s.harness
        .set("a", "a value")
        .set_warning("a", "warning on 'a'")
        .set_tag("a", "b");

    let reporter = s.reporter().with_output_filter(Regex::new("a").unwrap());
    let result = s.eval(reporter, &["a"]).await;
    assert_eq!(value_of(&result, "a").unwrap(), "a value");
    assert_eq!(s.collector.len(), 0);
}

#[tokio::test]
async fn test_warning_does_not_match_filter() {
    let s = fresh();
    s.harness
        .set("a", "a")
        .set_warning("a", "warning on 'a'")
        .set_tag("a", "a");

    let reporter = s.reporter().with_output_filter(Regex::new("b").unwrap());
    let result = s.eval(reporter, &["a"]).await;
    assert_eq!(value_of(&result, "a").unwrap(), "a");
    assert_eq!(s.collector.len(), 0);
}

/// A done child's events replay once per evaluation that depends on it, and
/// end up stored on the dependent key as well.
#[tokio::test]
async fn test_event_from_done_child_replayed() {
    let s = fresh();
    s.harness.set("a", "a").set_warning("a", "warning on 'a'");
    s.harness.add_dep("top", "a");

    // Build a on its own.
    s.eval(s.reporter(), &["a"]).await;
    assert_eq!(s.collector.len(), 1);
    s.collector.clear();

    // Build top: a is already done, its warning is reprinted.
    s.eval(s.reporter(), &["top"]).await;
    assert_eq!(s.collector.len(), 1);
    s.collector.clear();

    // Build top again: now the warning comes from top's own entry.
    s.eval(s.reporter(), &["top"]).await;
    assert_eq!(s.collector.len(), 1);
    assert_eq!(
        s.collector.events()[0].message().as_text(),
        Some("warning on 'a'")
    );
}

/// A failing key's events still reach the sink, but are not stored.
#[tokio::test]
async fn test_events_of_failed_key_not_stored() {
    let s = fresh();
    s.harness
        .set_has_error("error", true)
        .set_warning("error", "about to fail");

    let result = s.eval(s.reporter(), &["error"]).await;
    assert!(result.has_error());
    assert_eq!(s.collector.len(), 1);

    // Nothing was stored, so a second evaluation replays nothing.
    s.collector.clear();
    let result = s.eval(s.reporter(), &["error"]).await;
    assert!(result.has_error());
    assert_eq!(s.collector.len(), 0);
}

#[tokio::test]
async fn test_byte_messages_pass_through() {
    let s = fresh();
    let payload = vec![0u8, 159, 146, 150];
    let expected = payload.clone();
    s.harness.set_builder("bytes", move |_key, env| {
        let payload = payload.clone();
        async move {
            env.report(EventKind::Info, payload.clone());
            Ok(Some(skein::Value::new("done".to_string())))
        }
    });

    s.eval(s.reporter(), &["bytes"]).await;
    let events = s.collector.events();
    assert_eq!(events.len(), 1);
    match events[0].message() {
        EventMessage::Bytes(bytes) => assert_eq!(bytes, &expected),
        EventMessage::Text(_) => panic!("expected a byte payload"),
    }
}
