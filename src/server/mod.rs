// Trainboard - Dashboard Server Module
// HTTP surface for the session controller, configuration store and telemetry

mod handlers;
mod prom;
mod streams;

pub use handlers::{create_router, health_check, metrics_endpoint, AppError};
pub use prom::ServerMetrics;

use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::metrics::MetricsAggregator;
use crate::registry::CapabilityRegistry;
use crate::session::{SessionController, SubprocessLauncher};
use crate::store::{ConfigStore, FileBlobStore};
use crate::telemetry::{LogStream, Telemetry};

/// Main dashboard server structure
pub struct DashboardServer {
    /// Named configurations and the current edit
    store: Arc<ConfigStore>,
    /// The single training session
    controller: Arc<SessionController>,
    /// Prometheus counters and gauges
    metrics: ServerMetrics,
    bind_address: String,
    started_at: Instant,
    /// Cancelled on shutdown so long-lived streams end
    shutdown: CancellationToken,
}

impl DashboardServer {
    /// Create a server around already constructed components
    pub fn new(
        store: Arc<ConfigStore>,
        controller: Arc<SessionController>,
        bind_address: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            controller,
            metrics: ServerMetrics::new()?,
            bind_address: bind_address.into(),
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Wire up the file-backed store and subprocess launcher from settings.
    ///
    /// `logs` is the stream the tracing layer already feeds, so daemon
    /// messages and job output share one log panel.
    pub fn from_settings(settings: &Settings, logs: Arc<LogStream>) -> Result<Self> {
        let registry = Arc::new(CapabilityRegistry::builtin());
        let backend = FileBlobStore::open(&settings.configs_dir).with_context(|| {
            format!(
                "Failed to open configuration directory {}",
                settings.configs_dir.display()
            )
        })?;
        let store = Arc::new(ConfigStore::new(Arc::new(backend), registry));

        let launcher = Arc::new(SubprocessLauncher::new(
            &settings.launcher,
            &settings.runs_dir,
        ));
        let controller = Arc::new(SessionController::new(
            launcher,
            Arc::new(Telemetry::with_log_stream(logs)),
            Arc::new(MetricsAggregator::new()),
        ));

        Self::new(store, controller, settings.bind_address.clone())
    }

    /// Router with tracing and permissive CORS
    pub fn router(self: Arc<Self>) -> axum::Router {
        create_router(self)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serve until `shutdown` resolves, then stop any running job
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", self.bind_address))?;

        let server = Arc::new(self);
        let app = Arc::clone(&server).router();

        tracing::info!("Starting trainboard dashboard on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        let token = server.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                tracing::info!("Shutdown requested");
                token.cancel();
            })
            .await?;

        server.controller.shutdown().await;
        tracing::info!("Dashboard stopped");
        Ok(())
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        self.controller.telemetry()
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        self.controller.metrics()
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// Resolves once the server starts shutting down
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.shutdown.clone();
        async move { token.cancelled().await }
    }

    /// Begin shutdown of long-lived streams
    pub fn begin_shutdown(&self) {
        self.shutdown.cancel();
    }
}
