//! Dataset definitions: one named time series per upstream resource.
//!
//! A dataset couples the upstream identity `(source, resource)` with the
//! cadence parameters the engine needs: raw resolution, aggregate interval,
//! civil timezone, epoch floor, publication lag and the maximum query span
//! the upstream accepts per request.

use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::common::constants::*;

/// Configuration-level error for invalid dataset definitions.
#[derive(Debug, thiserror::Error)]
#[error("invalid dataset '{dataset}': {reason}")]
pub struct DatasetConfigError {
    pub dataset: String,
    pub reason: String,
}

/// A named time series plus its grouping dimension and cadence parameters.
///
/// Identity is `(source, resource)`; `name` is the storage slug. Datasets are
/// append/update only and are never deleted by the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub name: String,
    pub source: String,
    pub resource: String,
    /// Declared grouping-key domain (e.g. country codes). Records carrying a
    /// key outside this list fail partition routing.
    pub grouping_keys: Vec<String>,
    #[serde(default = "default_resolution_minutes")]
    pub resolution_minutes: u32,
    #[serde(default = "default_aggregate_interval_minutes")]
    pub aggregate_interval_minutes: u32,
    /// Fixed civil-timezone offset of the upstream's timestamps, in minutes
    /// east of UTC. Timestamps are never reinterpreted once assigned.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Backfill start when the store is empty.
    pub epoch_floor: NaiveDate,
    /// Publication delay: data newer than `now - lag` is not yet finalized.
    #[serde(default = "default_lag_minutes")]
    pub lag_minutes: i64,
    /// Maximum span the upstream accepts per request.
    #[serde(default = "default_max_span_days")]
    pub max_span_days: i64,
    #[serde(default = "default_timestamp_format")]
    pub timestamp_format: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    #[serde(default = "default_value_column")]
    pub value_column: String,
    /// CSV column holding the grouping key; absent means every row belongs to
    /// the first declared grouping key.
    #[serde(default)]
    pub grouping_column: Option<String>,
    /// Fetch URL template with `{resource}`, `{start}` and `{end}`
    /// placeholders. Datasets without one can only be ingested through a
    /// caller-supplied adapter.
    #[serde(default)]
    pub url_template: Option<String>,
}

fn default_resolution_minutes() -> u32 {
    DEFAULT_RESOLUTION_MINUTES
}

fn default_aggregate_interval_minutes() -> u32 {
    DEFAULT_AGGREGATE_INTERVAL_MINUTES
}

fn default_lag_minutes() -> i64 {
    DEFAULT_LAG_MINUTES
}

fn default_max_span_days() -> i64 {
    DEFAULT_MAX_SPAN_DAYS
}

fn default_timestamp_format() -> String {
    DEFAULT_TIMESTAMP_FORMAT.to_string()
}

fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

fn default_value_column() -> String {
    DEFAULT_VALUE_COLUMN.to_string()
}

impl Dataset {
    pub fn validate(&self) -> Result<(), DatasetConfigError> {
        let fail = |reason: String| DatasetConfigError {
            dataset: self.name.clone(),
            reason,
        };

        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(fail("name must be a non-empty [a-z0-9_] slug".to_string()));
        }
        if self.grouping_keys.is_empty() {
            return Err(fail("at least one grouping key must be declared".to_string()));
        }
        if self.resolution_minutes == 0 || MINUTES_PER_DAY % self.resolution_minutes != 0 {
            return Err(fail(format!(
                "resolution_minutes {} must divide a civil day",
                self.resolution_minutes
            )));
        }
        if self.aggregate_interval_minutes == 0 || MINUTES_PER_DAY % self.aggregate_interval_minutes != 0 {
            return Err(fail(format!(
                "aggregate_interval_minutes {} must divide a civil day",
                self.aggregate_interval_minutes
            )));
        }
        if self.aggregate_interval_minutes < self.resolution_minutes {
            return Err(fail("aggregate interval must be coarser than the raw resolution".to_string()));
        }
        if self.max_span_days <= 0 {
            return Err(fail(format!("max_span_days {} must be positive", self.max_span_days)));
        }
        if self.lag_minutes < 0 {
            return Err(fail(format!("lag_minutes {} must not be negative", self.lag_minutes)));
        }
        if FixedOffset::east_opt(self.utc_offset_minutes * 60).is_none() {
            return Err(fail(format!("utc_offset_minutes {} is out of range", self.utc_offset_minutes)));
        }
        Ok(())
    }

    /// One raw-resolution step; the increment between consecutive timestamps.
    pub fn one_unit(&self) -> Duration {
        Duration::minutes(self.resolution_minutes as i64)
    }

    pub fn lag(&self) -> Duration {
        Duration::minutes(self.lag_minutes)
    }

    pub fn max_span(&self) -> Duration {
        Duration::days(self.max_span_days)
    }

    /// Expected raw records per complete civil day, per grouping key.
    pub fn slots_per_day(&self) -> u32 {
        MINUTES_PER_DAY / self.resolution_minutes
    }

    /// Expected aggregate intervals per complete civil day, per grouping key.
    pub fn intervals_per_day(&self) -> u32 {
        MINUTES_PER_DAY / self.aggregate_interval_minutes
    }

    /// Current wall-clock instant in the dataset's civil timezone.
    pub fn civil_now(&self) -> NaiveDateTime {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
        Utc::now().with_timezone(&offset).naive_local()
    }

    pub fn floor_instant(&self) -> NaiveDateTime {
        self.epoch_floor.and_hms_opt(0, 0, 0).unwrap_or_default()
    }

    pub fn is_declared_key(&self, grouping_key: &str) -> bool {
        self.grouping_keys.iter().any(|k| k == grouping_key)
    }

    /// Fallback grouping key for upstreams without a grouping column.
    pub fn default_grouping_key(&self) -> &str {
        &self.grouping_keys[0]
    }
}
