//! Bucket key grammar shared by the aggregator's writer and reader.
//!
//! `<prefix> "m:" ("c"|"g"|"t") ":" <name> ":" <intervalMinutes> ":" <bucket>
//! (":" ("cnt"|"tot"|"max"|"min"|"last"))?` -- `<bucket>` is the integer
//! minute index since 2015-01-01T00:00:00Z UTC, so writer and reader agree
//! regardless of machine clock drift beyond UTC rounding.

/// 2015-01-01T00:00:00Z, in milliseconds since the Unix epoch.
pub const EPOCH_2015_MILLIS: i64 = 1_420_070_400_000;

/// Bucket width. The aggregator only ever deals in one-minute buckets.
pub const MILLIS_PER_MINUTE: i64 = 60_000;

/// The `intervalMinutes` segment of every bucket key this crate writes.
pub const INTERVAL_MINUTES: u32 = 1;

/// The three submission kinds, and the single-letter code each maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Timing,
}

impl MetricKind {
    fn code(self) -> &'static str {
        match self {
            MetricKind::Counter => "c",
            MetricKind::Gauge => "g",
            MetricKind::Timing => "t",
        }
    }
}

/// Minute bucket index for `timestamp_millis`, per the bucket key formula.
#[must_use]
pub fn minute_bucket(timestamp_millis: i64) -> i64 {
    (timestamp_millis - EPOCH_2015_MILLIS).div_euclid(MILLIS_PER_MINUTE)
}

/// Start-of-bucket timestamp for `bucket`, the inverse of [`minute_bucket`].
#[must_use]
pub fn bucket_start_millis(bucket: i64) -> i64 {
    EPOCH_2015_MILLIS + bucket * MILLIS_PER_MINUTE
}

/// Builds a bucket key. `suffix` is `None` for the bare counter key, `Some`
/// for gauge/timing's `cnt`/`tot`/`max`/`min`/`last` aggregates.
#[must_use]
pub fn bucket_key(prefix: &str, kind: MetricKind, name: &str, bucket: i64, suffix: Option<&str>) -> String {
    let mut key = format!(
        "{prefix}m:{}:{name}:{INTERVAL_MINUTES}:{bucket}",
        kind.code()
    );
    if let Some(suffix) = suffix {
        key.push(':');
        key.push_str(suffix);
    }
    key
}

/// Every bucket index in `[start, end]`, inclusive, each floored to a minute.
#[must_use]
pub fn bucket_range(start_millis: i64, end_millis: i64) -> Vec<i64> {
    let first = minute_bucket(start_millis);
    let last = minute_bucket(end_millis);
    (first..=last).collect()
}
