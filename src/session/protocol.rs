// Job output line protocol
//
// The training job talks to the daemon through its stdout/stderr. Lines that
// start with a directive are structured events; everything else is plain log
// output.
//
//   @metric <monitor|training> <stat> <step> <value>
//   @frame <base64 image bytes>
//   @rendering on|off

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::metrics::StatSource;

/// Something the running job reported
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Log(String),
    Frame(Vec<u8>),
    Metric {
        source: StatSource,
        stat: String,
        step: u64,
        value: f64,
    },
    Rendering(bool),
    Exited(ExitReport),
}

/// How the job process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub success: bool,
    pub code: Option<i32>,
    pub description: String,
}

impl ExitReport {
    pub fn from_status(status: std::io::Result<std::process::ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                success: status.success(),
                code: status.code(),
                description: status.to_string(),
            },
            Err(e) => Self {
                success: false,
                code: None,
                description: format!("failed to wait for job: {}", e),
            },
        }
    }
}

/// Classify one output line. Malformed directives fall back to log lines so
/// nothing the job prints is lost.
pub fn parse_line(line: &str) -> JobEvent {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(directive) = line.strip_prefix('@') else {
        return JobEvent::Log(line.to_string());
    };

    let (keyword, rest) = directive
        .split_once(char::is_whitespace)
        .unwrap_or((directive, ""));
    let rest = rest.trim();

    let parsed = match keyword {
        "metric" => parse_metric(rest),
        "frame" => STANDARD.decode(rest).ok().map(JobEvent::Frame),
        "rendering" => match rest.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Some(JobEvent::Rendering(true)),
            "off" | "false" | "0" => Some(JobEvent::Rendering(false)),
            _ => None,
        },
        _ => None,
    };

    parsed.unwrap_or_else(|| {
        tracing::debug!(line, "Unrecognised job directive, treating as log output");
        JobEvent::Log(line.to_string())
    })
}

fn parse_metric(rest: &str) -> Option<JobEvent> {
    let mut parts = rest.split_whitespace();
    let source = parts.next()?.parse::<StatSource>().ok()?;
    let stat = parts.next()?.to_string();
    let step = parts.next()?.parse::<u64>().ok()?;
    let value = parts.next()?.parse::<f64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(JobEvent::Metric {
        source,
        stat,
        step,
        value,
    })
}
