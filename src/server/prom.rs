// Prometheus metrics for the /metrics endpoint

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

use crate::session::SessionController;

#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    pub start_requests: IntCounter,
    pub launch_failures: IntCounter,
    pub stop_requests: IntCounter,
    session_state: IntGauge,
    rendering: IntGauge,
    log_subscribers: IntGauge,
    frame_subscribers: IntGauge,
    frames_published: IntGauge,
    stat_points: IntGauge,
}

impl ServerMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let start_requests = counter(
            &registry,
            "trainboard_session_start_requests",
            "Session start requests received",
        )?;
        let launch_failures = counter(
            &registry,
            "trainboard_launch_failures",
            "Training jobs that failed to launch",
        )?;
        let stop_requests = counter(
            &registry,
            "trainboard_session_stop_requests",
            "Session stop requests received",
        )?;
        let session_state = gauge(
            &registry,
            "trainboard_session_state",
            "Session state (0=stopped 1=starting 2=running 3=stopping)",
        )?;
        let rendering = gauge(&registry, "trainboard_rendering", "Whether frames are being rendered")?;
        let log_subscribers = gauge(
            &registry,
            "trainboard_log_subscribers",
            "Live log stream subscriptions",
        )?;
        let frame_subscribers = gauge(
            &registry,
            "trainboard_frame_subscribers",
            "Live frame stream subscriptions",
        )?;
        let frames_published = gauge(
            &registry,
            "trainboard_frames_published",
            "Frames published since startup",
        )?;
        let stat_points = gauge(
            &registry,
            "trainboard_stat_points",
            "Stat points held for the current run",
        )?;

        Ok(Self {
            registry,
            start_requests,
            launch_failures,
            stop_requests,
            session_state,
            rendering,
            log_subscribers,
            frame_subscribers,
            frames_published,
            stat_points,
        })
    }

    /// Refresh gauges from live state
    pub fn observe(&self, controller: &SessionController) {
        let status = controller.status();
        self.session_state.set(status.state.code());
        self.rendering.set(status.rendering as i64);

        let telemetry = controller.telemetry();
        self.log_subscribers
            .set(telemetry.logs().subscriber_count() as i64);
        let frames = telemetry.frames().stats();
        self.frame_subscribers.set(frames.subscribers as i64);
        self.frames_published.set(frames.published as i64);
        self.stat_points
            .set(controller.metrics().point_count() as i64);
    }

    /// Prometheus text exposition
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .context("Failed to encode metrics")?;
        String::from_utf8(buf).context("Metrics output is not UTF-8")
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help))
        .with_context(|| format!("Failed to create counter {}", name))?;
    registry
        .register(Box::new(counter.clone()))
        .with_context(|| format!("Failed to register counter {}", name))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help))
        .with_context(|| format!("Failed to create gauge {}", name))?;
    registry
        .register(Box::new(gauge.clone()))
        .with_context(|| format!("Failed to register gauge {}", name))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = ServerMetrics::new().unwrap();
        metrics.start_requests.inc();
        metrics.launch_failures.inc();

        let text = metrics.render().unwrap();
        assert!(text.contains("trainboard_session_start_requests 1"));
        assert!(text.contains("trainboard_launch_failures 1"));
        assert!(text.contains("# TYPE trainboard_session_state gauge"));
    }
}
