// Metrics aggregator
//
// Per-step numeric series keyed by (source, stat). Each run starts from an
// empty accumulation; the previous run's series stay queryable until then.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::types::{MetricsQueryResult, Ratio, SeriesPoint, StatSeries, StatSource};
use crate::errors::{DashboardError, Result};

type SeriesKey = (StatSource, String);

pub struct MetricsAggregator {
    series: DashMap<SeriesKey, BTreeMap<u64, f64>>,
    run_id: RwLock<Option<String>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            series: DashMap::new(),
            run_id: RwLock::new(None),
        }
    }

    /// Drop all series and scope new ingests to `run_id`
    pub fn begin_run(&self, run_id: &str) {
        self.series.clear();
        let mut current = self.run_id.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(run_id.to_string());
        tracing::debug!(run_id, "Metrics accumulation reset");
    }

    /// Run the current series belong to
    pub fn run_id(&self) -> Option<String> {
        self.run_id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Record a value; a repeated (source, stat, step) overwrites the old one
    pub fn ingest(&self, source: StatSource, stat: &str, step: u64, value: f64) {
        self.series
            .entry((source, stat.to_string()))
            .or_default()
            .insert(step, value);
    }

    /// Series for each requested stat, ordered by step, for every source.
    /// Unknown stats come back as empty series.
    pub fn query(&self, stat_keys: &[String], group_by: &str) -> Result<MetricsQueryResult> {
        if group_by != "step" {
            return Err(DashboardError::InvalidArgument(format!(
                "unsupported group_by '{}' (only 'step' is supported)",
                group_by
            )));
        }

        let mut result = MetricsQueryResult::new();
        for stat in stat_keys {
            let mut per_source = StatSeries::new();
            for source in StatSource::ALL {
                per_source.insert(source, self.series_for(source, stat));
            }
            result.insert(stat.clone(), per_source);
        }
        Ok(result)
    }

    fn series_for(&self, source: StatSource, stat: &str) -> Vec<SeriesPoint> {
        self.series
            .get(&(source, stat.to_string()))
            .map(|points| {
                points
                    .iter()
                    .map(|(&step, &value)| SeriesPoint { step, value })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn sum(&self, source: StatSource, stat: &str) -> f64 {
        self.series
            .get(&(source, stat.to_string()))
            .map(|points| points.values().sum())
            .unwrap_or(0.0)
    }

    /// sum(numerator) / sum(denominator) for one source
    pub fn derived_ratio(&self, numerator: &str, denominator: &str, source: StatSource) -> Ratio {
        Ratio::of(self.sum(source, numerator), self.sum(source, denominator))
    }

    /// Stat names seen for a source, sorted
    pub fn stat_names(&self, source: StatSource) -> Vec<String> {
        let mut names: Vec<String> = self
            .series
            .iter()
            .filter(|entry| entry.key().0 == source)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// Total stored points across all series
    pub fn point_count(&self) -> usize {
        self.series.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_orders_by_step_per_source() {
        let metrics = MetricsAggregator::new();
        metrics.ingest(StatSource::Monitor, "reward", 30, 3.0);
        metrics.ingest(StatSource::Monitor, "reward", 10, 1.0);
        metrics.ingest(StatSource::Training, "reward", 20, 2.0);

        let result = metrics.query(&["reward".to_string()], "step").unwrap();
        let reward = &result["reward"];
        let steps: Vec<u64> = reward[&StatSource::Monitor].iter().map(|p| p.step).collect();
        assert_eq!(steps, vec![10, 30]);
        assert_eq!(reward[&StatSource::Training].len(), 1);
    }

    #[test]
    fn test_duplicate_step_last_write_wins() {
        let metrics = MetricsAggregator::new();
        metrics.ingest(StatSource::Training, "loss", 5, 0.9);
        metrics.ingest(StatSource::Training, "loss", 5, 0.4);

        let result = metrics.query(&["loss".to_string()], "step").unwrap();
        assert_eq!(
            result["loss"][&StatSource::Training],
            vec![SeriesPoint { step: 5, value: 0.4 }]
        );
        assert_eq!(metrics.point_count(), 1);
    }

    #[test]
    fn test_unknown_stat_is_empty_not_error() {
        let metrics = MetricsAggregator::new();
        let result = metrics.query(&["nope".to_string()], "step").unwrap();
        assert!(result["nope"].values().all(|s| s.is_empty()));
        assert_eq!(result["nope"].len(), 2);
    }

    #[test]
    fn test_unsupported_group_by() {
        let metrics = MetricsAggregator::new();
        let err = metrics.query(&[], "episode").unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn test_derived_ratio() {
        let metrics = MetricsAggregator::new();
        assert_eq!(
            metrics.derived_ratio("wins", "games", StatSource::Monitor),
            Ratio::Undefined
        );

        metrics.ingest(StatSource::Monitor, "wins", 1, 4.0);
        metrics.ingest(StatSource::Monitor, "wins", 2, 6.0);
        assert_eq!(
            metrics.derived_ratio("wins", "games", StatSource::Monitor),
            Ratio::Unbounded
        );

        metrics.ingest(StatSource::Monitor, "games", 1, 5.0);
        assert_eq!(
            metrics.derived_ratio("wins", "games", StatSource::Monitor),
            Ratio::Finite(2.0)
        );
        // Other source is untouched
        assert_eq!(
            metrics.derived_ratio("wins", "games", StatSource::Training),
            Ratio::Undefined
        );
    }

    #[test]
    fn test_begin_run_starts_fresh() {
        let metrics = MetricsAggregator::new();
        metrics.begin_run("run-1");
        metrics.ingest(StatSource::Monitor, "reward", 1, 1.0);
        assert_eq!(metrics.stat_names(StatSource::Monitor), vec!["reward"]);

        metrics.begin_run("run-2");
        assert_eq!(metrics.point_count(), 0);
        assert_eq!(metrics.run_id().as_deref(), Some("run-2"));
    }
}
