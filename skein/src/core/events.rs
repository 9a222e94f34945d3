//! Diagnostic events and the sink they are delivered to.
//!
//! Compute functions emit events (warnings, progress lines, and so on)
//! through their environment. Events recorded during the successful
//! computation of a key are stored with it and replayed to later evaluations
//! that depend on it, so a warm build still shows the warnings of its cached
//! parts.
//!
//! A [`Reporter`] forwards events to an [`EventSink`], dropping events whose
//! tag does not match its optional regex output filter. Events without a tag
//! always pass.

use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Severity of a diagnostic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Info,
    Progress,
    Warning,
    Error,
}

/// An event payload. Byte payloads are preserved as-is; no encoding is
/// assumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventMessage {
    Text(String),
    Bytes(Vec<u8>),
}

impl EventMessage {
    /// Returns the payload as text, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventMessage::Text(s) => Some(s),
            EventMessage::Bytes(_) => None,
        }
    }
}

impl From<&str> for EventMessage {
    fn from(s: &str) -> Self {
        EventMessage::Text(s.to_string())
    }
}

impl From<String> for EventMessage {
    fn from(s: String) -> Self {
        EventMessage::Text(s)
    }
}

impl From<Vec<u8>> for EventMessage {
    fn from(bytes: Vec<u8>) -> Self {
        EventMessage::Bytes(bytes)
    }
}

/// One diagnostic event.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    location: Option<String>,
    tag: Option<String>,
    message: EventMessage,
}

impl Event {
    /// Creates an event with no location or tag.
    pub fn new(kind: EventKind, message: impl Into<EventMessage>) -> Self {
        Self {
            kind,
            location: None,
            tag: None,
            message: message.into(),
        }
    }

    /// Attaches a source location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Attaches an output-filter tag.
    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn message(&self) -> &EventMessage {
        &self.message
    }
}

/// Receives diagnostic events. Implementations serialize writes internally.
pub trait EventSink: Send + Sync {
    fn report(&self, event: &Event);
}

/// Forwards events to a sink, applying an optional regex tag filter.
///
/// The filter is matched against each event's tag; events whose tag does not
/// match are dropped. Events without a tag always pass.
#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn EventSink>,
    filter: Option<Regex>,
}

impl Reporter {
    /// Creates a reporter forwarding everything to `sink`.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink, filter: None }
    }

    /// Creates a reporter that drops every event.
    pub fn discard() -> Self {
        struct Discard;
        impl EventSink for Discard {
            fn report(&self, _event: &Event) {}
        }
        Self::new(Arc::new(Discard))
    }

    /// Installs a regex output filter matched against event tags.
    pub fn with_output_filter(mut self, filter: Regex) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Returns true if an event carrying `tag` would be forwarded.
    pub fn shows_output(&self, tag: Option<&str>) -> bool {
        match (&self.filter, tag) {
            (Some(filter), Some(tag)) => filter.is_match(tag),
            _ => true,
        }
    }

    /// Forwards `event` to the sink if it passes the filter.
    pub fn report(&self, event: &Event) {
        if self.shows_output(event.tag()) {
            self.sink.report(event);
        }
    }
}

/// Stores events and later replays them, in order. Thread-safe.
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<Event>>,
    has_errors: AtomicBool,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the stored events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event collector poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().expect("event collector poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether any of the stored events was an error.
    pub fn has_errors(&self) -> bool {
        self.has_errors.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.events.lock().expect("event collector poisoned").clear();
        self.has_errors.store(false, Ordering::SeqCst);
    }

    /// Replays all stored events on the given sink, in the same order.
    pub fn replay_on(&self, sink: &dyn EventSink) {
        for event in self.events().iter() {
            sink.report(event);
        }
    }
}

impl EventSink for EventCollector {
    fn report(&self, event: &Event) {
        if event.kind() == EventKind::Error {
            self.has_errors.store(true, Ordering::SeqCst);
        }
        self.events
            .lock()
            .expect("event collector poisoned")
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_stores_in_order() {
        let collector = EventCollector::new();
        collector.report(&Event::new(EventKind::Info, "one"));
        collector.report(&Event::new(EventKind::Warning, "two"));

        let events = collector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message().as_text(), Some("one"));
        assert_eq!(events[1].message().as_text(), Some("two"));
        assert!(!collector.has_errors());
    }

    #[test]
    fn test_collector_tracks_errors() {
        let collector = EventCollector::new();
        collector.report(&Event::new(EventKind::Error, "bad"));
        assert!(collector.has_errors());
        collector.clear();
        assert!(!collector.has_errors());
        assert!(collector.is_empty());
    }

    #[test]
    fn test_reporter_filter_matches_tag() {
        let collector = Arc::new(EventCollector::new());
        let reporter = Reporter::new(collector.clone())
            .with_output_filter(Regex::new("a").expect("valid regex"));

        reporter.report(&Event::new(EventKind::Warning, "kept").with_tag(Some("a".into())));
        reporter.report(&Event::new(EventKind::Warning, "dropped").with_tag(Some("b".into())));
        // No tag always passes.
        reporter.report(&Event::new(EventKind::Warning, "untagged"));

        let events = collector.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message().as_text(), Some("kept"));
        assert_eq!(events[1].message().as_text(), Some("untagged"));
    }

    #[test]
    fn test_replay_preserves_order() {
        let first = EventCollector::new();
        first.report(&Event::new(EventKind::Info, "1"));
        first.report(&Event::new(EventKind::Error, "2"));

        let second = EventCollector::new();
        first.replay_on(&second);
        assert_eq!(second.len(), 2);
        assert!(second.has_errors());
    }

    #[test]
    fn test_byte_messages_preserved() {
        let collector = EventCollector::new();
        let payload = vec![0u8, 159, 146, 150];
        collector.report(&Event::new(EventKind::Info, payload.clone()));
        match collector.events()[0].message() {
            EventMessage::Bytes(bytes) => assert_eq!(bytes, &payload),
            EventMessage::Text(_) => panic!("expected bytes"),
        }
    }
}
