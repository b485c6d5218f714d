//! In-memory capture of tracing output for tests.
//!
//! Each captured event remembers the `client` recorded on the innermost
//! enclosing [`LogContext`](super::LogContext) span, so tests running several
//! connections in one process can tell whose event is whose.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::span::{Attributes, Id};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

const CLIENT_FIELD: &str = "client";

/// One captured event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Level.
    pub level: Level,
    /// Module target.
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Every other field, in recording order.
    pub fields: Vec<(String, String)>,
    /// Client of the innermost enclosing span that recorded one.
    pub client: Option<String>,
}

impl CapturedEvent {
    /// Value of the named field, if recorded.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find_map(|(key, value)| (key == name).then_some(value.as_str()))
    }
}

/// Shared handle to everything captured so far.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
    spans: Arc<Mutex<Vec<String>>>,
}

impl CapturedLogs {
    /// Snapshot of every captured event.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Events emitted inside a span tagged with `client`.
    pub fn events_for_client(&self, client: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.client.as_deref() == Some(client))
            .cloned()
            .collect()
    }

    /// Whether an event at `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == level && e.message.contains(needle))
    }

    /// Whether a span named `name` was opened.
    pub fn has_span(&self, name: &str) -> bool {
        self.spans.lock().iter().any(|s| s == name)
    }

    /// Number of events at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.events.lock().iter().filter(|e| e.level == level).count()
    }

    /// Forget everything captured so far.
    pub fn clear(&self) {
        self.events.lock().clear();
        self.spans.lock().clear();
    }
}

#[derive(Default)]
struct Recorded {
    message: String,
    fields: Vec<(String, String)>,
}

impl Recorded {
    fn push(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.push((field.name().to_owned(), value));
        }
    }

    fn take_field(&mut self, name: &str) -> Option<String> {
        let index = self.fields.iter().position(|(key, _)| key == name)?;
        Some(self.fields.remove(index).1)
    }
}

impl Visit for Recorded {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value.to_owned());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(field, value.to_string());
    }
}

/// Client recorded on a span, kept in the span's extensions.
struct SpanClient(String);

struct CaptureLayer {
    logs: CapturedLogs,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        self.logs.spans.lock().push(attrs.metadata().name().to_owned());
        let mut recorded = Recorded::default();
        attrs.record(&mut recorded);
        if let (Some(client), Some(span)) = (recorded.take_field(CLIENT_FIELD), ctx.span(id)) {
            span.extensions_mut().insert(SpanClient(client));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut recorded = Recorded::default();
        event.record(&mut recorded);
        // Scope iterates leaf first.
        let client = ctx.event_scope(event).and_then(|mut scope| {
            scope.find_map(|span| span.extensions().get::<SpanClient>().map(|c| c.0.clone()))
        });
        let metadata = event.metadata();
        self.logs.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: recorded.message,
            fields: recorded.fields,
            client,
        });
    }
}

/// Install a capturing subscriber for the current thread.
///
/// Only events emitted on this thread are seen; async tests should use a
/// current-thread runtime. Keep the guard alive for the whole test.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer { logs: logs.clone() })
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_level() {
        let (logs, _guard) = capture_logs();
        tracing::info!("connected");
        tracing::warn!("slow reply");
        tracing::warn!("late reply");
        assert_eq!(logs.count_at_level(Level::INFO), 1);
        assert_eq!(logs.count_at_level(Level::WARN), 2);
        assert!(logs.has_event(Level::WARN, "late"));
    }

    #[test]
    fn fields_recorded_by_name() {
        let (logs, _guard) = capture_logs();
        tracing::info!(topic = "a.b", replies = 3, "reply window closed");
        let events = logs.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "reply window closed");
        assert_eq!(events[0].field("topic"), Some("a.b"));
        assert_eq!(events[0].field("replies"), Some("3"));
        assert_eq!(events[0].client, None);
    }

    #[test]
    fn events_carry_innermost_client() {
        let (logs, _guard) = capture_logs();
        let outer = tracing::info_span!("simbus", client = "lab.sim.g.c1");
        let inner = tracing::info_span!("simbus", client = "lab.sim.g.c2");
        {
            let _outer = outer.enter();
            tracing::debug!("from c1");
            let _inner = inner.enter();
            tracing::debug!("from c2");
        }
        assert_eq!(logs.events_for_client("lab.sim.g.c1").len(), 1);
        let c2 = logs.events_for_client("lab.sim.g.c2");
        assert_eq!(c2.len(), 1);
        assert_eq!(c2[0].message, "from c2");
    }

    #[test]
    fn clear_forgets_everything() {
        let (logs, _guard) = capture_logs();
        let _span = tracing::info_span!("simbus").entered();
        tracing::info!("event");
        logs.clear();
        assert!(logs.events().is_empty());
        assert!(!logs.has_span("simbus"));
    }
}
