// HTTP client for the dashboard daemon
//
// DashboardClient wraps the REST endpoints; StatusWatcher polls session
// status in the background for viewers that wait on rendering.

mod dashboard_client;
mod watcher;

pub use dashboard_client::{ClientConfig, DashboardClient};
pub use watcher::StatusWatcher;
