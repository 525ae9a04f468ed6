use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Half-open civil-time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A normalized upstream measurement. The natural key is
/// `(dataset, timestamp, grouping_key)`; `value` is `None` when the upstream
/// published the slot without a figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub timestamp: NaiveDateTime,
    pub grouping_key: String,
    pub value: Option<f64>,
}

/// One aggregated interval of a civil day. `period` is the 1-based interval
/// index; `interval_label` is the human form ("00:00-00:15").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub trade_date: NaiveDate,
    pub period: u16,
    pub interval_label: String,
    pub grouping_key: String,
    pub mean: f64,
    pub median: f64,
    pub last_value: f64,
    pub sample_count: u32,
}

/// Outcome of one pipeline run. Failed chunk bounds are listed explicitly so
/// an operator (or the auditor) can target exactly those ranges for re-run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub dataset: String,
    pub dry_run: bool,
    pub chunks_ok: u32,
    pub chunks_failed: Vec<TimeRange>,
    pub records_written: u64,
    pub records_rejected: u64,
    pub intervals_aggregated: u64,
}

impl IngestionReport {
    pub fn new(dataset: &str, dry_run: bool) -> Self {
        Self {
            dataset: dataset.to_string(),
            dry_run,
            chunks_ok: 0,
            chunks_failed: Vec::new(),
            records_written: 0,
            records_rejected: 0,
            intervals_aggregated: 0,
        }
    }

    /// True when the plan was empty: nothing attempted, nothing failed.
    pub fn is_noop(&self) -> bool {
        self.chunks_ok == 0 && self.chunks_failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 11, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn range_contains_is_half_open() {
        let range = TimeRange::new(dt(1, 0, 0), dt(2, 0, 0));
        assert!(range.contains(dt(1, 0, 0)));
        assert!(range.contains(dt(1, 23, 59)));
        assert!(!range.contains(dt(2, 0, 0)));
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(TimeRange::new(dt(2, 0, 0), dt(1, 0, 0)).is_empty());
        assert!(TimeRange::new(dt(1, 0, 0), dt(1, 0, 0)).is_empty());
    }
}
