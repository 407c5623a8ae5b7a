// Tracing Layer - Mirrors daemon logs into the browser log stream
//
// Every component logs through `tracing`; this layer copies the events into
// the telemetry log stream so the dashboard's log panel shows daemon
// activity (config saves, launch failures, ...) next to the job's own output.

use std::fmt;
use std::sync::Arc;
use tracing::{field::Visit, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::logs::LogStream;

/// Custom tracing layer that routes events into a `LogStream`
pub struct TelemetryLayer {
    logs: Arc<LogStream>,
    /// Whether to forward debug/trace events (default: false)
    show_debug: bool,
}

impl TelemetryLayer {
    pub fn new(logs: Arc<LogStream>) -> Self {
        Self {
            logs,
            show_debug: false,
        }
    }

    /// Forward debug events too
    pub fn with_debug(logs: Arc<LogStream>) -> Self {
        Self {
            logs,
            show_debug: true,
        }
    }

    fn should_forward(&self, level: &Level) -> bool {
        match *level {
            Level::ERROR | Level::WARN | Level::INFO => true,
            Level::DEBUG | Level::TRACE => self.show_debug,
        }
    }

    /// Strip module paths down to something readable
    fn format_message(&self, level: &Level, target: &str, message: &str) -> String {
        let clean_target = if let Some(own) = target.strip_prefix("trainboard::") {
            own
        } else if target.contains("::") {
            target.split("::").next().unwrap_or(target)
        } else {
            target
        };

        let prefix = match *level {
            Level::ERROR => "ERROR ",
            Level::WARN => "WARN ",
            _ => "",
        };

        match clean_target {
            "tokio" | "hyper" | "tower_http" => format!("{}{}", prefix, message),
            _ => format!("{}[{}] {}", prefix, clean_target, message),
        }
    }
}

impl<S> Layer<S> for TelemetryLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = metadata.level();

        if !self.should_forward(level) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(message) = visitor.message {
            let line = self.format_message(level, metadata.target(), &message);
            self.logs.publish(line);
        }
    }
}

/// Visitor to extract the log message from tracing events
#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value).trim_matches('"').to_string());
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn test_format_message() {
        let layer = TelemetryLayer::new(Arc::new(LogStream::new(0)));

        let msg = layer.format_message(&Level::INFO, "trainboard::session::controller", "Started");
        assert_eq!(msg, "[session::controller] Started");

        let msg = layer.format_message(&Level::WARN, "hyper::proto", "Connection reset");
        assert_eq!(msg, "WARN Connection reset");

        let msg = layer.format_message(&Level::ERROR, "reqwest::client", "boom");
        assert_eq!(msg, "ERROR [reqwest] boom");
    }

    #[test]
    fn test_debug_gate() {
        let layer = TelemetryLayer::new(Arc::new(LogStream::new(0)));
        assert!(layer.should_forward(&Level::INFO));
        assert!(!layer.should_forward(&Level::DEBUG));

        let layer = TelemetryLayer::with_debug(Arc::new(LogStream::new(0)));
        assert!(layer.should_forward(&Level::TRACE));
    }

    #[test]
    fn test_events_reach_log_stream() {
        let logs = Arc::new(LogStream::new(10));
        let subscriber =
            tracing_subscriber::registry().with(TelemetryLayer::new(Arc::clone(&logs)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(run = 3, "Run started");
            tracing::debug!("hidden");
        });

        let recent = logs.recent(10);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].text.ends_with("Run started"));
    }
}
