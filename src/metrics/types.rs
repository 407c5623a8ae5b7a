// Metrics data types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::DashboardError;

/// Which side of the job produced a stat
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatSource {
    /// Environment monitor (episode rewards, lengths, ...)
    Monitor,
    /// Learner statistics (losses, kl, ...)
    Training,
}

impl StatSource {
    pub const ALL: [StatSource; 2] = [StatSource::Monitor, StatSource::Training];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Training => "training",
        }
    }
}

impl fmt::Display for StatSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatSource {
    type Err = DashboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monitor" => Ok(Self::Monitor),
            "training" => Ok(Self::Training),
            other => Err(DashboardError::validation(
                "source",
                format!("unknown stat source '{}' (expected monitor or training)", other),
            )),
        }
    }
}

/// One step of a series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub step: u64,
    pub value: f64,
}

/// Per-source series for one stat; both sources are always present
pub type StatSeries = BTreeMap<StatSource, Vec<SeriesPoint>>;

/// Query result keyed by stat name
pub type MetricsQueryResult = BTreeMap<String, StatSeries>;

fn default_group_by() -> String {
    "step".to_string()
}

/// Body of a metrics query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsQuery {
    pub stat_keys: Vec<String>,
    #[serde(default = "default_group_by")]
    pub group_by: String,
}

/// Result of dividing two summed stats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Ratio {
    Finite(f64),
    /// 0 / 0
    Undefined,
    /// x / 0 with x != 0
    Unbounded,
}

impl Ratio {
    pub fn of(numerator: f64, denominator: f64) -> Self {
        if denominator == 0.0 {
            if numerator == 0.0 {
                Ratio::Undefined
            } else {
                Ratio::Unbounded
            }
        } else {
            Ratio::Finite(numerator / denominator)
        }
    }

    pub fn as_finite(&self) -> Option<f64> {
        match self {
            Ratio::Finite(v) => Some(*v),
            _ => None,
        }
    }
}
