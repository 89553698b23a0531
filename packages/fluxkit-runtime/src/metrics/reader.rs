//! Time-series reconstruction over ranges of per-minute bucket keys.

use fluxkit_core::Clock;

use crate::cache::CacheEngine;

use super::key::{bucket_key, bucket_range, bucket_start_millis, MetricKind};

/// One minute's worth of a counter, as returned by [`MetricsReader::get_counter_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterPoint {
    pub time_millis: i64,
    pub count: i64,
}

/// Summary returned by [`MetricsReader::get_counter_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct CounterStats {
    pub points: Vec<CounterPoint>,
    pub sum: i64,
}

/// One minute's worth of a gauge, as returned by [`MetricsReader::get_gauge_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugePoint {
    pub time_millis: i64,
    pub max: f64,
    pub last: f64,
}

/// Summary returned by [`MetricsReader::get_gauge_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeStats {
    pub points: Vec<GaugePoint>,
    /// Max across the whole range.
    pub max: f64,
    /// Last non-empty value in the range, scanning from the end.
    pub last: f64,
}

/// One minute's worth of timing data, as returned by [`MetricsReader::get_timer_stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimerPoint {
    pub time_millis: i64,
    pub count: i64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

/// Summary returned by [`MetricsReader::get_timer_stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct TimerStats {
    pub points: Vec<TimerPoint>,
    pub count: i64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub average: f64,
}

/// Reconstructs the time-series summaries a [`super::aggregator::MetricAggregator`]
/// wrote into a [`CacheEngine`]. Read-only, and holds no state of its own:
/// every call reads straight from the cache, so results are eventually
/// consistent with respect to in-flight flushes (no read-your-write
/// guarantee for the current minute, per the aggregator's flush cut).
pub struct MetricsReader<S, C> {
    cache: CacheEngine<S, C>,
    key_prefix: String,
}

impl<S, C> MetricsReader<S, C>
where
    S: fluxkit_core::Serializer + Send + Sync + 'static,
    C: Clock + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(cache: CacheEngine<S, C>, key_prefix: impl Into<String>) -> Self {
        Self {
            cache,
            key_prefix: key_prefix.into(),
        }
    }

    /// Sum of `counter:<name>` buckets over `[start, end]`, inclusive.
    #[must_use]
    pub fn get_counter_stats(&self, name: &str, start_millis: i64, end_millis: i64) -> CounterStats {
        let points: Vec<CounterPoint> = bucket_range(start_millis, end_millis)
            .into_iter()
            .map(|bucket| {
                let key = bucket_key(&self.key_prefix, MetricKind::Counter, name, bucket, None);
                let count = self.cache.get_i64(&key).unwrap_or(0);
                CounterPoint {
                    time_millis: bucket_start_millis(bucket),
                    count,
                }
            })
            .collect();
        let sum = points.iter().map(|p| p.count).sum();
        CounterStats { points, sum }
    }

    /// Convenience accessor used by `WaitForCounter`: just the sum.
    #[must_use]
    pub fn get_counter_sum(&self, name: &str, start_millis: i64, end_millis: i64) -> i64 {
        self.get_counter_stats(name, start_millis, end_millis).sum
    }

    /// Max/last reconstruction for a gauge over `[start, end]`, inclusive.
    #[must_use]
    pub fn get_gauge_stats(&self, name: &str, start_millis: i64, end_millis: i64) -> GaugeStats {
        let points: Vec<GaugePoint> = bucket_range(start_millis, end_millis)
            .into_iter()
            .filter_map(|bucket| {
                let max_key = bucket_key(&self.key_prefix, MetricKind::Gauge, name, bucket, Some("max"));
                let last_key = bucket_key(&self.key_prefix, MetricKind::Gauge, name, bucket, Some("last"));
                let max = self.cache.get_f64(&max_key);
                let last = self.cache.get_f64(&last_key);
                match (max, last) {
                    (Some(max), Some(last)) => Some(GaugePoint {
                        time_millis: bucket_start_millis(bucket),
                        max,
                        last,
                    }),
                    _ => None,
                }
            })
            .collect();

        let max = points.iter().map(|p| p.max).fold(f64::NEG_INFINITY, f64::max);
        let last = points.last().map_or(0.0, |p| p.last);
        GaugeStats {
            points,
            max: if max.is_finite() { max } else { 0.0 },
            last,
        }
    }

    /// Count/total/min/max/average reconstruction for a timer over
    /// `[start, end]`, inclusive.
    #[must_use]
    pub fn get_timer_stats(&self, name: &str, start_millis: i64, end_millis: i64) -> TimerStats {
        let points: Vec<TimerPoint> = bucket_range(start_millis, end_millis)
            .into_iter()
            .filter_map(|bucket| {
                let cnt_key = bucket_key(&self.key_prefix, MetricKind::Timing, name, bucket, Some("cnt"));
                let tot_key = bucket_key(&self.key_prefix, MetricKind::Timing, name, bucket, Some("tot"));
                let min_key = bucket_key(&self.key_prefix, MetricKind::Timing, name, bucket, Some("min"));
                let max_key = bucket_key(&self.key_prefix, MetricKind::Timing, name, bucket, Some("max"));
                let count = self.cache.get_i64(&cnt_key)?;
                let total = self.cache.get_i64(&tot_key)? as f64;
                let min = self.cache.get_f64(&min_key)?;
                let max = self.cache.get_f64(&max_key)?;
                Some(TimerPoint {
                    time_millis: bucket_start_millis(bucket),
                    count,
                    total,
                    min,
                    max,
                })
            })
            .collect();

        let count: i64 = points.iter().map(|p| p.count).sum();
        let total: f64 = points.iter().map(|p| p.total).sum();
        let min = points.iter().map(|p| p.min).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.max).fold(f64::NEG_INFINITY, f64::max);
        let average = if count > 0 { total / count as f64 } else { 0.0 };

        TimerStats {
            points,
            count,
            total,
            min: if min.is_finite() { min } else { 0.0 },
            max: if max.is_finite() { max } else { 0.0 },
            average,
        }
    }
}
