// Session state types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{DashboardError, Result};
use crate::store::Configuration;

/// Visual filters applied by the frame viewer, all off at startup
pub const DEFAULT_SHADERS: [&str; 5] = [
    "radial_distortion",
    "scanlines",
    "dot_mask",
    "rolling_lines",
    "gamma_correction",
];

pub type ShaderSettings = BTreeMap<String, bool>;

/// Lifecycle state of the single training job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }

    /// Numeric encoding for the state gauge
    pub fn code(&self) -> i64 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
        }
    }

    /// Legal edges: Stopped→Starting→Running→Stopping→Stopped, plus Starting→Stopped
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot returned by status polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub rendering: bool,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Stopped,
            rendering: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderingStatus {
    pub rendering: bool,
}

/// The one process-wide session, owned by the controller
#[derive(Debug, Clone)]
pub struct Session {
    pub state: SessionState,
    pub rendering: bool,
    pub shader_settings: ShaderSettings,
    /// Configuration of the current (or most recent) run
    pub active_config: Option<Configuration>,
    pub started_at: Option<DateTime<Utc>>,
    pub run_id: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Stopped,
            rendering: false,
            shader_settings: DEFAULT_SHADERS
                .iter()
                .map(|name| (name.to_string(), false))
                .collect(),
            active_config: None,
            started_at: None,
            run_id: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            rendering: self.rendering,
        }
    }

    /// Move to `next`, or fail with `Conflict` if the edge is not legal
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DashboardError::Conflict(format!(
                "cannot go from {} to {}",
                self.state, next
            )));
        }
        self.state = next;
        if next != SessionState::Running {
            self.rendering = false;
        }
        Ok(())
    }

    /// Rendering can only be on while running; returns whether the flag changed
    pub fn set_rendering(&mut self, rendering: bool) -> bool {
        let rendering = rendering && self.state == SessionState::Running;
        let changed = self.rendering != rendering;
        self.rendering = rendering;
        changed
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_stopped_with_default_shaders() {
        let session = Session::new();
        assert_eq!(session.status(), SessionStatus::default());
        assert_eq!(session.shader_settings.len(), 5);
        assert!(session.shader_settings.values().all(|on| !on));
    }

    #[test]
    fn test_full_cycle_and_failure_edge() {
        let mut session = Session::new();
        session.transition(SessionState::Starting).unwrap();
        session.transition(SessionState::Stopped).unwrap();

        session.transition(SessionState::Starting).unwrap();
        session.transition(SessionState::Running).unwrap();
        session.transition(SessionState::Stopping).unwrap();
        session.transition(SessionState::Stopped).unwrap();
    }

    #[test]
    fn test_illegal_transition_is_conflict() {
        let mut session = Session::new();
        let err = session.transition(SessionState::Stopping).unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(session.state, SessionState::Stopped);

        // Same-state requests are not silently accepted
        assert!(session.transition(SessionState::Stopped).is_err());
    }

    #[test]
    fn test_rendering_only_while_running() {
        let mut session = Session::new();
        assert!(!session.set_rendering(true));
        assert!(!session.rendering);

        session.transition(SessionState::Starting).unwrap();
        session.transition(SessionState::Running).unwrap();
        assert!(session.set_rendering(true));
        assert!(session.rendering);

        session.transition(SessionState::Stopping).unwrap();
        assert!(!session.rendering);
    }

    #[test]
    fn test_status_wire_shape() {
        let json = serde_json::to_value(SessionStatus::default()).unwrap();
        assert_eq!(json, serde_json::json!({"state": "stopped", "rendering": false}));
    }
}
