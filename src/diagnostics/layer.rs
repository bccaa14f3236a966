//! Tracing layer that forwards `tracing` events into the diagnostic log.
//!
//! Events from anywhere in the process (dependencies included) are written
//! with the same line format and rotation as records emitted directly through
//! [`DiagnosticSink`].

use super::{DiagnosticSink, LogRecord, Severity, SourceLocation};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Visitor collecting the message field and any structured fields.
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn new() -> Self {
        Self {
            message: String::new(),
            fields: Vec::new(),
        }
    }

    fn finish(self, fallback: &str) -> String {
        let mut message = if self.message.is_empty() {
            fallback.to_string()
        } else {
            self.message
        };
        for field in self.fields {
            message.push(' ');
            message.push_str(&field);
        }
        message
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            // Remove surrounding quotes if present
            if self.message.len() >= 2 && self.message.starts_with('"') && self.message.ends_with('"') {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }
}

/// A tracing layer writing every event to a [`DiagnosticSink`].
#[derive(Debug, Clone)]
pub struct DiagnosticLayer {
    sink: Arc<DiagnosticSink>,
}

impl DiagnosticLayer {
    /// Layer writing to `sink`.
    pub fn new(sink: Arc<DiagnosticSink>) -> Self {
        Self { sink }
    }
}

fn severity(level: &Level) -> Severity {
    match *level {
        Level::ERROR => Severity::Error,
        Level::WARN => Severity::Warning,
        Level::INFO => Severity::Info,
        Level::DEBUG | Level::TRACE => Severity::Debug,
    }
}

impl<S> Layer<S> for DiagnosticLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = MessageVisitor::new();
        event.record(&mut visitor);
        let message = visitor.finish(metadata.name());

        let mut record = LogRecord::new(severity(metadata.level()), metadata.target(), message);
        if let (Some(file), Some(line)) = (metadata.file(), metadata.line()) {
            record = record.at(SourceLocation::new(file, line));
        }
        self.sink.emit(record);
    }
}

/// Register a [`DiagnosticLayer`] as the global tracing subscriber.
///
/// `level` is used when `RUST_LOG` is not set. Calling this when a global
/// subscriber already exists is not an error.
pub fn install_tracing(sink: Arc<DiagnosticSink>, level: &str) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| format!("Invalid log level '{level}': {e}"))?;

    tracing_subscriber::registry()
        .with(DiagnosticLayer::new(sink).with_filter(env_filter))
        .try_init()
        .or_else(|e| {
            if tracing::dispatcher::has_been_set() {
                Ok(())
            } else {
                Err(format!("Failed to initialize tracing: {}", e))
            }
        })
}
