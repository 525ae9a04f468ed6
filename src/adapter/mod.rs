//! Fetch-adapter boundary.
//!
//! Everything upstream-specific lives behind [`FetchAdapter`]: one call per
//! chunk, loosely-typed rows out, and a transient/permanent split on failure.
//! Retry and backoff policy belongs to the adapter implementation, never to
//! the ingestion pipeline.

pub mod http_csv;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use crate::dataset::Dataset;
use crate::ingest::structs::{RawRecord, TimeRange};

#[derive(Error, Debug, Clone)]
pub enum FetchError {
    /// Network or availability failure; the chunk is retried on the next
    /// scheduled run.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// The resource genuinely has no data for the range; surfaced for
    /// operator review, never retried automatically.
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Loosely-typed row as decoded from the upstream payload. Normalization into
/// [`RawRecord`] happens in [`map_rows`]; the engine never sees these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub timestamp: String,
    pub grouping_key: String,
    pub value: String,
}

#[cfg_attr(test, automock)]
pub trait FetchAdapter {
    /// Fetch all rows for `resource` within the half-open `range`.
    fn fetch(&self, resource: &str, range: TimeRange) -> Result<Vec<RawRow>, FetchError>;
}

/// Result of normalizing one chunk of upstream rows.
#[derive(Debug, Default)]
pub struct MappedBatch {
    pub records: Vec<RawRecord>,
    pub rejected: u64,
}

/// Normalize loosely-typed rows into fixed-shape records.
///
/// Rows with a malformed timestamp or an unparseable value are dropped and
/// counted; the first rejection per batch is logged with the offending row so
/// upstream format drift shows up in the logs without flooding them.
pub fn map_rows(dataset: &Dataset, rows: Vec<RawRow>) -> MappedBatch {
    let mut batch = MappedBatch::default();
    let mut logged_sample = false;

    for row in rows {
        let reject = |reason: &str, row: &RawRow, logged: &mut bool| {
            if !*logged {
                warn!(
                    dataset = %dataset.name,
                    timestamp = %row.timestamp,
                    value = %row.value,
                    reason,
                    "dropping malformed row (first sample of this batch)"
                );
                *logged = true;
            }
        };

        let timestamp = match NaiveDateTime::parse_from_str(&row.timestamp, &dataset.timestamp_format) {
            Ok(ts) => ts,
            Err(_) => {
                reject("malformed timestamp", &row, &mut logged_sample);
                batch.rejected += 1;
                continue;
            }
        };

        let trimmed = row.value.trim();
        let value = if trimmed.is_empty() {
            None
        } else {
            match trimmed.parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    reject("unparseable value", &row, &mut logged_sample);
                    batch.rejected += 1;
                    continue;
                }
            }
        };

        let grouping_key = if row.grouping_key.is_empty() {
            dataset.default_grouping_key().to_string()
        } else {
            row.grouping_key
        };

        batch.records.push(RawRecord {
            timestamp,
            grouping_key,
            value,
        });
    }

    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn test_dataset() -> Dataset {
        Dataset {
            name: "system_imbalance".to_string(),
            source: "ceps".to_string(),
            resource: "AktualniSystemovaOdchylkaCR".to_string(),
            grouping_keys: vec!["CZ".to_string()],
            resolution_minutes: 1,
            aggregate_interval_minutes: 15,
            utc_offset_minutes: 60,
            epoch_floor: NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            lag_minutes: 60,
            max_span_days: 7,
            timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
            timestamp_column: "timestamp".to_string(),
            value_column: "value".to_string(),
            grouping_column: None,
            url_template: None,
        }
    }

    fn row(ts: &str, value: &str) -> RawRow {
        RawRow {
            timestamp: ts.to_string(),
            grouping_key: String::new(),
            value: value.to_string(),
        }
    }

    #[test]
    fn maps_valid_rows() {
        let batch = map_rows(&test_dataset(), vec![row("2025-03-01 12:00:00", "42.5")]);
        assert_eq!(batch.rejected, 0);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].value, Some(42.5));
        assert_eq!(batch.records[0].grouping_key, "CZ");
    }

    #[test]
    fn empty_value_becomes_null() {
        let batch = map_rows(&test_dataset(), vec![row("2025-03-01 12:00:00", "  ")]);
        assert_eq!(batch.rejected, 0);
        assert_eq!(batch.records[0].value, None);
    }

    #[test]
    fn malformed_timestamp_is_dropped_and_counted() {
        let batch = map_rows(
            &test_dataset(),
            vec![row("not-a-date", "1.0"), row("2025-03-01 12:00:00", "2.0")],
        );
        assert_eq!(batch.rejected, 1);
        assert_eq!(batch.records.len(), 1);
    }

    #[test]
    fn unparseable_value_is_dropped_and_counted() {
        let batch = map_rows(&test_dataset(), vec![row("2025-03-01 12:00:00", "n/a")]);
        assert_eq!(batch.rejected, 1);
        assert!(batch.records.is_empty());
    }

    #[test]
    fn explicit_grouping_key_is_kept() {
        let mut r = row("2025-03-01 12:00:00", "1.0");
        r.grouping_key = "CZ".to_string();
        let batch = map_rows(&test_dataset(), vec![r]);
        assert_eq!(batch.records[0].grouping_key, "CZ");
    }
}
