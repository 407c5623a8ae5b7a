// Session module
// Lifecycle of the single training job and the adapter that launches it

mod controller;
mod launcher;
mod protocol;
mod types;

pub use controller::SessionController;
pub use launcher::{JobHandle, JobLauncher, RunSpec, SubprocessLauncher};
pub use protocol::{parse_line, ExitReport, JobEvent};
pub use types::{
    RenderingStatus, Session, SessionState, SessionStatus, ShaderSettings, DEFAULT_SHADERS,
};
