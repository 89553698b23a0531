//! Buffered metric aggregation: `Counter`/`Gauge`/`Timer` submission, a
//! periodic flush into per-minute bucket keys on a [`crate::cache::CacheEngine`],
//! and a reader that reconstructs time-series summaries over arbitrary
//! ranges.

pub mod aggregator;
pub mod key;
pub mod reader;

pub use aggregator::{MetricAggregator, MetricAggregatorConfig};
pub use key::{bucket_key, minute_bucket, MetricKind};
pub use reader::{CounterPoint, CounterStats, GaugePoint, GaugeStats, MetricsReader, TimerPoint, TimerStats};
