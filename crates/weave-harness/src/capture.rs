#![forbid(unsafe_code)]

//! Tracing capture for assertions on spans and events.
//!
//! ```ignore
//! let (_, capture) = with_captured_tracing(|| runtime.run_until_idle());
//! assert!(capture.spans_named("commit.root").len() >= 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

/// A span as it was opened, plus any fields recorded later.
#[derive(Debug, Clone)]
pub struct CapturedSpan {
    pub name: String,
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: tracing::Level,
    pub target: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    /// The event's message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").map(String::as_str)
    }
}

#[derive(Default)]
struct Captured {
    spans: Vec<CapturedSpan>,
    /// Span id to index in `spans`.
    open: HashMap<u64, usize>,
    events: Vec<CapturedEvent>,
}

/// `tracing_subscriber` layer that records spans and events.
pub struct CaptureLayer {
    captured: Arc<Mutex<Captured>>,
}

/// Read side of a [`CaptureLayer`].
#[derive(Clone)]
pub struct CaptureHandle {
    captured: Arc<Mutex<Captured>>,
}

impl CaptureLayer {
    #[must_use]
    pub fn new() -> (Self, CaptureHandle) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let handle = CaptureHandle {
            captured: Arc::clone(&captured),
        };
        (Self { captured }, handle)
    }

    fn with<R>(&self, f: impl FnOnce(&mut Captured) -> R) -> R {
        let mut guard = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl CaptureHandle {
    fn with<R>(&self, f: impl FnOnce(&Captured) -> R) -> R {
        let guard = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    #[must_use]
    pub fn spans(&self) -> Vec<CapturedSpan> {
        self.with(|c| c.spans.clone())
    }

    #[must_use]
    pub fn spans_named(&self, name: &str) -> Vec<CapturedSpan> {
        self.with(|c| c.spans.iter().filter(|s| s.name == name).cloned().collect())
    }

    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.with(|c| c.events.clone())
    }

    /// Events logged on `target`.
    #[must_use]
    pub fn events_for(&self, target: &str) -> Vec<CapturedEvent> {
        self.with(|c| {
            c.events
                .iter()
                .filter(|e| e.target == target)
                .cloned()
                .collect()
        })
    }
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for CaptureLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(Vec::new());
        attrs.record(&mut visitor);
        let mut fields: HashMap<String, String> = visitor.0.into_iter().collect();
        for field in attrs.metadata().fields() {
            fields.entry(field.name().to_string()).or_default();
        }
        self.with(|c| {
            c.open.insert(id.into_u64(), c.spans.len());
            c.spans.push(CapturedSpan {
                name: attrs.metadata().name().to_string(),
                fields,
            });
        });
    }

    fn on_record(
        &self,
        id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = FieldVisitor(Vec::new());
        values.record(&mut visitor);
        self.with(|c| {
            let Some(&index) = c.open.get(&id.into_u64()) else {
                return;
            };
            if let Some(span) = c.spans.get_mut(index) {
                span.fields.extend(visitor.0);
            }
        });
    }

    fn on_close(&self, id: tracing::span::Id, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        self.with(|c| {
            c.open.remove(&id.into_u64());
        });
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        let fields: HashMap<String, String> = visitor.0.into_iter().collect();
        self.with(|c| {
            c.events.push(CapturedEvent {
                level: *event.metadata().level(),
                target: event.metadata().target().to_string(),
                fields,
            });
        });
    }
}

/// Run `f` with a capturing subscriber installed on this thread.
pub fn with_captured_tracing<F, R>(f: F) -> (R, CaptureHandle)
where
    F: FnOnce() -> R,
{
    let (layer, handle) = CaptureLayer::new();
    let subscriber = tracing_subscriber::registry().with(layer);
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, handle)
}
