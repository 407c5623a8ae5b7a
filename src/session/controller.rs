// Session controller
//
// Owns the single training session. Status reads take a short read lock on
// the session snapshot; start/stop additionally hold the lifecycle lock for
// the whole transition so two of them can never interleave. A second caller
// that finds the lifecycle lock taken gets `Conflict` immediately instead of
// queueing behind it. Stopping runs on its own task, so a caller that gives
// up waiting cannot strand the session in `Stopping`.

use chrono::Utc;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::launcher::{JobHandle, JobLauncher, RunSpec};
use super::protocol::{ExitReport, JobEvent};
use super::types::{RenderingStatus, Session, SessionState, SessionStatus, ShaderSettings};
use crate::errors::{DashboardError, Result};
use crate::metrics::MetricsAggregator;
use crate::store::Configuration;
use crate::telemetry::Telemetry;

struct ActiveJob {
    run_id: String,
    handle: Box<dyn JobHandle>,
}

pub struct SessionController {
    session: RwLock<Session>,
    lifecycle: Arc<Mutex<Option<ActiveJob>>>,
    launcher: Arc<dyn JobLauncher>,
    telemetry: Arc<Telemetry>,
    metrics: Arc<MetricsAggregator>,
}

impl SessionController {
    pub fn new(
        launcher: Arc<dyn JobLauncher>,
        telemetry: Arc<Telemetry>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            session: RwLock::new(Session::new()),
            lifecycle: Arc::new(Mutex::new(None)),
            launcher,
            telemetry,
            metrics,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(|e| e.into_inner())
    }

    fn busy() -> DashboardError {
        DashboardError::Conflict("a session transition is already in progress".to_string())
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// Launch a job with an already validated configuration
    pub async fn start(self: &Arc<Self>, config: Configuration) -> Result<SessionStatus> {
        let mut active = self.lifecycle.try_lock().map_err(|_| Self::busy())?;

        {
            let mut session = self.write();
            if session.state != SessionState::Stopped {
                return Err(DashboardError::Conflict(format!(
                    "cannot start: session is {}",
                    session.state
                )));
            }
            session.transition(SessionState::Starting)?;
        }

        let run_id = Uuid::new_v4().simple().to_string();
        self.metrics.begin_run(&run_id);
        self.telemetry.begin_run(&run_id);

        info!(run_id = %run_id, config = %config.name, "Starting training session");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let spec = RunSpec {
            run_id: run_id.clone(),
            config: config.clone(),
        };

        match self.launcher.launch(spec, events_tx).await {
            Ok(handle) => {
                let status = {
                    let mut session = self.write();
                    session.transition(SessionState::Running)?;
                    session.started_at = Some(Utc::now());
                    session.active_config = Some(config);
                    session.run_id = Some(run_id.clone());
                    session.status()
                };

                *active = Some(ActiveJob {
                    run_id: run_id.clone(),
                    handle,
                });
                tokio::spawn(Arc::clone(self).pump(run_id.clone(), events_rx));

                info!(run_id = %run_id, "Training session running");
                Ok(status)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                self.write().transition(SessionState::Stopped)?;
                self.telemetry
                    .publish_log(format!("Failed to start training: {}", reason));
                error!(run_id = %run_id, error = %reason, "Training launch failed");
                Err(DashboardError::LaunchFailed(reason))
            }
        }
    }

    /// Ask the running job to stop and wait until it has
    pub async fn stop(self: &Arc<Self>) -> Result<SessionStatus> {
        let mut active = Arc::clone(&self.lifecycle)
            .try_lock_owned()
            .map_err(|_| Self::busy())?;

        {
            let mut session = self.write();
            if session.state != SessionState::Running {
                return Err(DashboardError::Conflict(format!(
                    "cannot stop: session is {}",
                    session.state
                )));
            }
            session.transition(SessionState::Stopping)?;
        }
        self.telemetry.frames().set_rendering(false);

        // The lifecycle guard moves into the task and is released only once
        // the session is back to Stopped
        let controller = Arc::clone(self);
        let finish = tokio::spawn(async move {
            let job = active.take();
            controller.finish_stop(job).await
        });

        match finish.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Stop task failed");
                self.write().transition(SessionState::Stopped)?;
                Ok(self.status())
            }
        }
    }

    async fn finish_stop(&self, job: Option<ActiveJob>) -> Result<SessionStatus> {
        if let Some(mut job) = job {
            info!(run_id = %job.run_id, "Stopping training session");
            match job.handle.terminate().await {
                Ok(report) => {
                    info!(run_id = %job.run_id, status = %report.description, "Training job stopped")
                }
                Err(e) => {
                    warn!(run_id = %job.run_id, error = %e, "Training job did not confirm shutdown")
                }
            }
            self.telemetry.end_run(&job.run_id);
        }

        let mut session = self.write();
        session.transition(SessionState::Stopped)?;
        session.started_at = None;
        Ok(session.status())
    }

    /// Stop the job if one is running (daemon shutdown)
    pub async fn shutdown(self: &Arc<Self>) {
        if self.status().state != SessionState::Running {
            return;
        }
        if let Err(e) = self.stop().await {
            warn!(error = %e, "Failed to stop training session during shutdown");
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status()
    }

    pub fn rendering_status(&self) -> RenderingStatus {
        RenderingStatus {
            rendering: self.read().rendering,
        }
    }

    /// Full copy of the session for diagnostics
    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    pub fn shader_settings(&self) -> ShaderSettings {
        self.read().shader_settings.clone()
    }

    /// Set one shader; unknown names are added
    pub fn toggle_shader(&self, name: &str, enabled: bool) -> ShaderSettings {
        let mut session = self.write();
        session.shader_settings.insert(name.to_string(), enabled);
        debug!(shader = name, enabled, "Shader toggled");
        session.shader_settings.clone()
    }

    pub fn toggle_all_shaders(&self, enabled: bool) -> ShaderSettings {
        let mut session = self.write();
        for value in session.shader_settings.values_mut() {
            *value = enabled;
        }
        debug!(enabled, "All shaders toggled");
        session.shader_settings.clone()
    }

    fn is_current_run(&self, run_id: &str) -> bool {
        let session = self.read();
        session.state == SessionState::Running && session.run_id.as_deref() == Some(run_id)
    }

    /// Route one run's job events until the job's output channels close
    async fn pump(self: Arc<Self>, run_id: String, mut events: mpsc::UnboundedReceiver<JobEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                JobEvent::Log(line) => {
                    self.telemetry.publish_log(line);
                }
                JobEvent::Frame(payload) => {
                    if self.is_current_run(&run_id) {
                        self.telemetry.publish_frame(payload);
                    }
                }
                JobEvent::Metric {
                    source,
                    stat,
                    step,
                    value,
                } => {
                    if self.metrics.run_id().as_deref() == Some(run_id.as_str()) {
                        self.metrics.ingest(source, &stat, step, value);
                    }
                }
                JobEvent::Rendering(rendering) => self.apply_rendering(&run_id, rendering),
                JobEvent::Exited(report) => self.on_job_exit(&run_id, report).await,
            }
        }
        debug!(run_id = %run_id, "Job event stream closed");
    }

    fn apply_rendering(&self, run_id: &str, rendering: bool) {
        let changed = {
            let mut session = self.write();
            if session.state != SessionState::Running || session.run_id.as_deref() != Some(run_id)
            {
                return;
            }
            session.set_rendering(rendering)
        };
        self.telemetry.frames().set_rendering(rendering);
        if changed {
            info!(run_id, rendering, "Rendering status changed");
        }
    }

    /// The job ended without a stop request: Running → Stopping → Stopped
    async fn on_job_exit(&self, run_id: &str, report: ExitReport) {
        let mut active = self.lifecycle.lock().await;
        if !self.is_current_run(run_id) {
            // stop() already handled this run
            return;
        }

        if let Err(e) = self.write().transition(SessionState::Stopping) {
            warn!(run_id, error = %e, "Unexpected state on job exit");
            return;
        }
        self.telemetry.frames().set_rendering(false);
        active.take();

        let line = format!("Training job exited ({})", report.description);
        self.telemetry.publish_log(line);
        if report.success {
            info!(run_id, status = %report.description, "Training job finished");
        } else {
            warn!(run_id, status = %report.description, "Training job exited unexpectedly");
        }
        self.telemetry.end_run(run_id);

        let mut session = self.write();
        if let Err(e) = session.transition(SessionState::Stopped) {
            warn!(run_id, error = %e, "Unexpected state on job exit");
        }
        session.started_at = None;
    }
}
