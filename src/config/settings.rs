// Daemon settings

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base directory for everything the daemon keeps on disk (~/.trainboard)
pub fn trainboard_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".trainboard")
}

/// How the training job is started
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    /// Interpreter or binary to run (default: python3)
    pub program: String,
    /// Arguments placed before `--config <path>`
    pub args: Vec<String>,
    /// Working directory for the job
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["train.py".to_string()],
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// HTTP bind address (default: 127.0.0.1:5000)
    pub bind_address: String,

    /// Saved training configurations, one JSON file each
    pub configs_dir: PathBuf,

    /// Per-run configuration files handed to the job
    pub runs_dir: PathBuf,

    /// Recent log lines kept for late viewers
    pub log_window: usize,

    /// Forward debug events to the log stream
    pub debug_logging: bool,

    /// Also write daemon logs to this file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    pub launcher: LauncherSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let home = trainboard_home();
        Self {
            bind_address: "127.0.0.1:5000".to_string(),
            configs_dir: home.join("configs"),
            runs_dir: home.join("runs"),
            log_window: 500,
            debug_logging: false,
            log_file: None,
            launcher: LauncherSettings::default(),
        }
    }
}

impl Settings {
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }
}
