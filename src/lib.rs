// Trainboard - Browser dashboard for a long-running RL training job
// Library exports

pub mod batch; // Batch-size divisor resolver
pub mod client; // HTTP client and status watcher
pub mod config; // Daemon settings
pub mod errors;
pub mod metrics; // Per-step stat series
pub mod registry; // Wrapper/callback capability catalogue
pub mod server; // HTTP daemon
pub mod session; // Job lifecycle and launcher
pub mod store; // Named training configurations
pub mod telemetry; // Log and frame streaming

pub use errors::{DashboardError, Result};
