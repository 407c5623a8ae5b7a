// Settings loader
// Layers: built-in defaults, ~/.trainboard/config.toml, --config file, TRAINBOARD_* env

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

use super::settings::{trainboard_home, Settings};

/// ~/.trainboard/config.toml
pub fn default_settings_path() -> PathBuf {
    trainboard_home().join("config.toml")
}

/// Load settings from the standard locations plus an optional explicit file
pub fn load_settings(explicit: Option<&Path>) -> Result<Settings> {
    load_settings_from(Some(&default_settings_path()), explicit)
}

/// Load settings with an explicit user-level file location
pub fn load_settings_from(user_file: Option<&Path>, explicit: Option<&Path>) -> Result<Settings> {
    layered(user_file, explicit, environment())
}

/// `TRAINBOARD_BIND_ADDRESS`, `TRAINBOARD_LAUNCHER__PROGRAM`, ...
fn environment() -> Environment {
    Environment::with_prefix("TRAINBOARD")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn layered(
    user_file: Option<&Path>,
    explicit: Option<&Path>,
    env: Environment,
) -> Result<Settings> {
    let defaults = Config::try_from(&Settings::default())
        .context("Failed to build default settings")?;

    let mut builder = Config::builder().add_source(defaults);

    if let Some(path) = user_file {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
    }

    if let Some(path) = explicit {
        if !path.exists() {
            bail!("Settings file not found: {}", path.display());
        }
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }

    builder = builder.add_source(env);

    let settings: Settings = builder
        .build()
        .context("Failed to load settings")?
        .try_deserialize()
        .context("Invalid settings")?;

    tracing::debug!(bind = %settings.bind_address, "Settings loaded");
    Ok(settings)
}

/// Write default settings to `path`; refuses to overwrite an existing file
pub fn write_default_settings(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let contents = Settings::default().to_toml()?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
