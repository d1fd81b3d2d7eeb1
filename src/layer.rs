//! `tracing` integration
//!
//! [`ShipperLayer`] turns every event into a [`LogRecord`] and submits it to a
//! [`FlushEngine`]. Events emitted by this crate or the HTTP stack beneath it
//! are skipped; shipping them would feed the engine its own diagnostics and
//! re-enter the batch lock.

use crate::engine::FlushEngine;
use crate::record::{LogLevel, LogRecord};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

const IGNORED_TARGETS: &[&str] = &[
    env!("CARGO_CRATE_NAME"),
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio",
    "tower",
];

pub struct ShipperLayer {
    engine: Arc<FlushEngine>,
}

impl ShipperLayer {
    pub fn new(engine: Arc<FlushEngine>) -> Self {
        Self { engine }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|prefix| {
        target == *prefix
            || target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with("::"))
    })
}

/// Collects the fields of one event
#[derive(Default)]
struct RecordVisitor {
    message: String,
    marker: Option<String>,
    exception: Option<String>,
    extra: String,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "marker" => self.marker = Some(value.to_string()),
            "exception" | "error" => self.exception = Some(value.to_string()),
            name => {
                let _ = write!(self.extra, " {}={}", name, value);
            }
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        let mut rendered = value.to_string();
        let mut source = value.source();
        while let Some(cause) = source {
            let _ = write!(rendered, "\ncaused by: {}", cause);
            source = cause.source();
        }

        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.exception = Some(rendered);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{:?}", value),
            "marker" => self.marker = Some(format!("{:?}", value)),
            "exception" | "error" => self.exception = Some(format!("{:?}", value)),
            name => {
                let _ = write!(self.extra, " {}={:?}", name, value);
            }
        }
    }
}

impl<S: Subscriber> Layer<S> for ShipperLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let mut record = LogRecord::new(
            LogLevel::from(metadata.level()),
            metadata.target(),
            visitor.message + &visitor.extra,
        );
        record.marker = visitor.marker;
        record.throwable = visitor
            .exception
            .map(|e| e.lines().map(str::to_string).collect());

        self.engine.submit(record);
    }
}
