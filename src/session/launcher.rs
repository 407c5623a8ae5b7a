// Job launcher
//
// The controller hands a validated configuration to a `JobLauncher` and gets
// back a handle it can use to ask the job to stop. The default launcher runs
// the training script as a child process and relays its output lines as
// `JobEvent`s.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::protocol::{parse_line, ExitReport, JobEvent};
use crate::config::LauncherSettings;
use crate::store::Configuration;

/// Everything a launcher needs to start one run
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub run_id: String,
    pub config: Configuration,
}

/// Starts training jobs
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Start the job. Returning `Ok` means the handoff succeeded; output and
    /// the eventual exit are reported through `events`.
    async fn launch(
        &self,
        spec: RunSpec,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Result<Box<dyn JobHandle>>;
}

/// Control handle for one launched job
#[async_trait]
pub trait JobHandle: Send + Sync {
    /// Ask the job to shut down cooperatively and wait until it has exited
    async fn terminate(&mut self) -> Result<ExitReport>;

    /// OS process id, when there is one
    fn pid(&self) -> Option<u32> {
        None
    }
}

/// Runs the configured program as a child process
pub struct SubprocessLauncher {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    runs_dir: PathBuf,
}

impl SubprocessLauncher {
    pub fn new(settings: &LauncherSettings, runs_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: settings.program.clone(),
            args: settings.args.clone(),
            working_dir: settings.working_dir.clone(),
            runs_dir: runs_dir.into(),
        }
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    /// Write the run's configuration where the job can read it
    fn write_run_file(&self, spec: &RunSpec) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.runs_dir).with_context(|| {
            format!("Failed to create runs directory {}", self.runs_dir.display())
        })?;

        let payload = spec.config.to_payload();
        let document = json!({
            "run_id": spec.run_id,
            "name": spec.config.name,
            "training_config": payload.training_config,
            "hyperparameters": payload.hyperparameters,
            "wrappers": payload.wrappers,
            "callbacks": payload.callbacks,
        });

        let path = self.runs_dir.join(format!("{}.json", spec.run_id));
        let bytes = serde_json::to_vec_pretty(&document)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write run configuration {}", path.display()))?;
        Ok(path)
    }
}

#[async_trait]
impl JobLauncher for SubprocessLauncher {
    async fn launch(
        &self,
        spec: RunSpec,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Result<Box<dyn JobHandle>> {
        let config_path = self.write_run_file(&spec)?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--config")
            .arg(&config_path)
            .env("TRAINBOARD_RUN_ID", &spec.run_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn training job '{}'", self.program))?;
        let pid = child.id();

        info!(
            run_id = %spec.run_id,
            pid = ?pid,
            config = %config_path.display(),
            "Training job spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(relay_lines(stdout, events.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(relay_lines(stderr, events.clone()));
        }
        let stdin = child.stdin.take();

        let (terminate_tx, terminate_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise(child, stdin, terminate_rx, exit_tx, events));

        Ok(Box::new(SubprocessHandle {
            pid,
            terminate: Some(terminate_tx),
            exited: exit_rx,
        }))
    }
}

/// Forward each output line as an event until the pipe closes
async fn relay_lines<R>(reader: R, events: mpsc::UnboundedSender<JobEvent>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if events.send(parse_line(&line)).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read job output");
                break;
            }
        }
    }
}

/// Own the child until it exits, on its own or after a terminate request
async fn supervise(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    terminate_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitReport>>,
    events: mpsc::UnboundedSender<JobEvent>,
) {
    let natural = tokio::select! {
        status = child.wait() => Some(status),
        _ = terminate_rx => None,
    };

    let status = match natural {
        Some(status) => status,
        None => {
            request_shutdown(&child, &mut stdin);
            child.wait().await
        }
    };

    let report = ExitReport::from_status(status);
    debug!(status = %report.description, "Training job exited");
    let _ = events.send(JobEvent::Exited(report.clone()));
    exit_tx.send_replace(Some(report));
}

/// Cooperative shutdown: close stdin, and on Unix send SIGTERM
fn request_shutdown(child: &Child, stdin: &mut Option<ChildStdin>) {
    stdin.take();

    #[cfg(target_family = "unix")]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %e, "Failed to signal training job");
            }
        }
    }

    #[cfg(not(target_family = "unix"))]
    let _ = child;
}

struct SubprocessHandle {
    pid: Option<u32>,
    terminate: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<Option<ExitReport>>,
}

#[async_trait]
impl JobHandle for SubprocessHandle {
    async fn terminate(&mut self) -> Result<ExitReport> {
        if let Some(tx) = self.terminate.take() {
            // Err means the supervisor already finished
            let _ = tx.send(());
        }

        let report = self
            .exited
            .wait_for(|report| report.is_some())
            .await
            .context("Job supervisor ended without reporting an exit")?
            .clone();
        report.context("Job supervisor ended without reporting an exit")
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}
