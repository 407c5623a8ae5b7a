// Trainboard - Browser dashboard for a long-running RL training job
// Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::prelude::*;

use trainboard::client::{ClientConfig, DashboardClient, StatusWatcher};
use trainboard::config::{default_settings_path, load_settings, write_default_settings, Settings};
use trainboard::server::DashboardServer;
use trainboard::telemetry::{LogStream, TelemetryLayer};

#[derive(Parser, Debug)]
#[command(name = "trainboard")]
#[command(about = "Launch, watch and stop an RL training job from the browser", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the dashboard HTTP daemon
    Serve {
        /// Bind address (overrides settings)
        #[arg(long)]
        bind: Option<String>,
        /// Extra settings file layered over ~/.trainboard/config.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the valid batch sizes for a rollout shape
    BatchSizes {
        /// Steps per environment per rollout
        n_steps: u64,
        /// Number of parallel environments
        num_envs: u64,
    },
    /// Show the session status of a running daemon
    Status {
        /// Daemon address
        #[arg(long, default_value = "127.0.0.1:5000")]
        address: String,
        /// Keep polling every SECS seconds until Ctrl-C
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
    },
    /// Write the default settings file
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Serve { bind, config } => run_serve(bind, config).await,
        Command::BatchSizes { n_steps, num_envs } => {
            init_cli_tracing();
            run_batch_sizes(n_steps, num_envs)
        }
        Command::Status { address, watch } => {
            init_cli_tracing();
            run_status(address, watch).await
        }
        Command::InitConfig => {
            init_cli_tracing();
            run_init_config()
        }
    }
}

/// Tracing for short-lived CLI commands: warnings to stderr
fn init_cli_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing_log::LogTracer::init().ok();
}

/// Tracing for the daemon
///
/// Everything goes to stderr, to the optional log file, and through the
/// telemetry layer into the browser log stream.
fn init_daemon_tracing(settings: &Settings, logs: Arc<LogStream>) -> Result<()> {
    let default_level = if settings.debug_logging { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let telemetry_layer = if settings.debug_logging {
        TelemetryLayer::with_debug(logs)
    } else {
        TelemetryLayer::new(logs)
    };

    let file_layer = match &settings.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let file_writer = Arc::new(log_file);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(move || file_writer.clone())
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(telemetry_layer)
        .init();

    // Bridge log crate → tracing (for dependencies using log crate)
    tracing_log::LogTracer::init().ok();
    Ok(())
}

async fn run_serve(bind: Option<String>, config: Option<PathBuf>) -> Result<()> {
    let mut settings = load_settings(config.as_deref())?;
    if let Some(bind) = bind {
        settings.bind_address = bind;
    }

    let logs = Arc::new(LogStream::new(settings.log_window));
    init_daemon_tracing(&settings, Arc::clone(&logs))?;

    tracing::info!(
        configs = %settings.configs_dir.display(),
        runs = %settings.runs_dir.display(),
        program = %settings.launcher.program,
        "Starting trainboard"
    );

    let server = DashboardServer::from_settings(&settings, logs)?;
    server.serve(shutdown_signal()).await
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

fn run_batch_sizes(n_steps: u64, num_envs: u64) -> Result<()> {
    let sizes = trainboard::batch::resolve(n_steps, num_envs)?;
    let default = trainboard::batch::default_batch_size(&sizes);

    let listed: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
    println!("Valid batch sizes for {} x {}:", n_steps, num_envs);
    println!("  {}", listed.join(", "));
    if let Some(default) = default {
        println!("Default: {}", default);
    }
    Ok(())
}

async fn run_status(address: String, watch: Option<u64>) -> Result<()> {
    let client = DashboardClient::new(ClientConfig::with_address(address))?;

    let Some(secs) = watch else {
        let health = client.health().await?;
        let status = client.session_status().await?;
        println!("Session:   {}", status.state);
        println!("Rendering: {}", if status.rendering { "yes" } else { "no" });
        if let Some(uptime) = health.get("uptime_seconds").and_then(|v| v.as_u64()) {
            println!("Uptime:    {}s", uptime);
        }
        return Ok(());
    };

    let watcher = StatusWatcher::spawn(client, Duration::from_secs(secs.max(1)));
    let mut updates = watcher.subscribe();
    println!("Watching session status (Ctrl-C to stop)");
    println!("{} rendering={}", watcher.latest().state, watcher.latest().rendering);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *updates.borrow_and_update();
                println!("{} rendering={}", status.state, status.rendering);
            }
        }
    }

    watcher.shutdown().await;
    Ok(())
}

fn run_init_config() -> Result<()> {
    let path = default_settings_path();
    write_default_settings(&path)?;
    println!("Wrote default settings to {}", path.display());
    Ok(())
}
