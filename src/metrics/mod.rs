// Metrics module
// Per-step stat series from the running job, grouped queries and ratios

mod aggregator;
mod types;

pub use aggregator::MetricsAggregator;
pub use types::{
    MetricsQuery, MetricsQueryResult, Ratio, SeriesPoint, StatSeries, StatSource,
};
