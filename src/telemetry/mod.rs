// Telemetry streamer
// Log-line and rendered-frame distribution for the running job

mod frames;
mod layer;
mod logs;

pub use frames::{Frame, FrameSlot, FrameStats, FrameSubscription};
pub use layer::TelemetryLayer;
pub use logs::{LogEvent, LogStream, LogSubscription};

use std::sync::Arc;

/// Log stream plus frame slot, shared by the controller and the HTTP layer.
///
/// Subscriptions never touch the session lock: producers publish straight
/// into the stream/slot and viewers read from their own handles.
pub struct Telemetry {
    logs: Arc<LogStream>,
    frames: FrameSlot,
}

impl Telemetry {
    pub fn new(log_window: usize) -> Self {
        Self::with_log_stream(Arc::new(LogStream::new(log_window)))
    }

    /// Reuse a log stream created earlier (e.g. for the tracing layer)
    pub fn with_log_stream(logs: Arc<LogStream>) -> Self {
        Self {
            logs,
            frames: FrameSlot::new(),
        }
    }

    pub fn logs(&self) -> &Arc<LogStream> {
        &self.logs
    }

    pub fn frames(&self) -> &FrameSlot {
        &self.frames
    }

    pub fn publish_log(&self, text: impl Into<String>) -> u64 {
        self.logs.publish(text)
    }

    pub fn publish_frame(&self, payload: impl Into<Arc<[u8]>>) -> Option<u64> {
        self.frames.publish(payload)
    }

    pub fn subscribe_logs(&self) -> LogSubscription {
        self.logs.subscribe()
    }

    pub fn subscribe_frames(&self) -> FrameSubscription {
        self.frames.subscribe()
    }

    /// Reset per-run state: rendering off, empty frame slot
    pub fn begin_run(&self, run_id: &str) {
        self.frames.set_rendering(false);
        self.frames.clear();
        self.logs.publish(format!("--- run {} starting ---", run_id));
    }

    pub fn end_run(&self, run_id: &str) {
        self.frames.set_rendering(false);
        self.logs.publish(format!("--- run {} stopped ---", run_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_markers_and_gate() {
        let telemetry = Telemetry::new(16);
        let mut logs = telemetry.subscribe_logs();

        telemetry.begin_run("abc");
        assert!(!telemetry.frames().is_rendering());
        telemetry.frames().set_rendering(true);
        assert!(telemetry.publish_frame(vec![1u8]).is_some());

        telemetry.end_run("abc");
        assert!(telemetry.frames().latest().is_none());
        assert!(telemetry.publish_frame(vec![2u8]).is_none());

        assert!(logs.recv().await.unwrap().text.contains("abc starting"));
        assert!(logs.recv().await.unwrap().text.contains("abc stopped"));
    }
}
