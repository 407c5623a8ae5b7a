// Configuration module
// Daemon settings and their loading (not to be confused with training configurations)

mod loader;
mod settings;

pub use loader::{default_settings_path, load_settings, load_settings_from, write_default_settings};
pub use settings::{trainboard_home, LauncherSettings, Settings};
