//! In-memory log capture.
//!
//! [`capture_logs`] installs a thread-local subscriber that records every
//! event's level and message, so tests can assert on what was logged and
//! how often.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Shared handle to the events recorded by [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    /// Number of events at `level` whose message contains `needle`.
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(l, msg)| *l == level && msg.contains(needle))
            .count()
    }

    /// Whether any event at `level` mentions `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.count(level, needle) > 0
    }
}

struct CaptureLayer {
    logs: CapturedLogs,
}

#[derive(Default)]
struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.0);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.logs
            .events
            .lock()
            .push((*event.metadata().level(), visitor.0));
    }
}

/// Capture events emitted on the current thread until the guard drops.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer { logs: logs.clone() })
        .set_default();
    (logs, guard)
}
