//! Roll fine-grained raw records into fixed-length civil-day intervals.
//!
//! Per non-empty interval: mean, median (50th percentile with linear
//! interpolation between order statistics) and the last-observed value.
//! Empty intervals are not written, so an absent aggregate means "no raw
//! data", distinguishable from a zero value. Re-running a date recomputes
//! from current raw records and overwrites prior aggregates.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Timelike};
use tracing::{debug, info};

use crate::common::constants::MINUTES_PER_DAY;
use crate::dataset::Dataset;
use crate::ingest::structs::AggregateRecord;
use crate::store::errors::StoreError;
use crate::store::storage::{PartitionedStore, StoredRaw};

/// Aggregate one trade date. Returns the number of intervals written.
pub fn aggregate(
    dataset: &Dataset,
    store: &mut PartitionedStore,
    trade_date: NaiveDate,
) -> Result<usize, StoreError> {
    let raw = store.raw_for_date(dataset, trade_date)?;
    if raw.is_empty() {
        debug!(dataset = %dataset.name, %trade_date, "no raw records, nothing to aggregate");
        return Ok(0);
    }

    let interval_minutes = dataset.aggregate_interval_minutes;
    let mut buckets: BTreeMap<(String, u16), Vec<&StoredRaw>> = BTreeMap::new();
    for record in &raw {
        let minute_of_day = record.timestamp.hour() * 60 + record.timestamp.minute();
        let period = (minute_of_day / interval_minutes + 1) as u16;
        buckets
            .entry((record.grouping_key.clone(), period))
            .or_default()
            .push(record);
    }

    let mut aggregates = Vec::new();
    for ((grouping_key, period), records) in buckets {
        let mut samples: Vec<(chrono::NaiveDateTime, f64)> = records
            .iter()
            .filter_map(|r| r.value.map(|v| (r.timestamp, v)))
            .collect();
        if samples.is_empty() {
            // Every slot in the interval was published without a figure.
            continue;
        }
        samples.sort_by_key(|(ts, _)| *ts);

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let median = percentile_50(&values);
        let last_value = samples[samples.len() - 1].1;

        aggregates.push(AggregateRecord {
            trade_date,
            period,
            interval_label: interval_label(period, interval_minutes),
            grouping_key,
            mean,
            median,
            last_value,
            sample_count: values.len() as u32,
        });
    }

    let written = aggregates.len();
    store.upsert_aggregates(dataset, &aggregates)?;
    info!(
        dataset = %dataset.name,
        %trade_date,
        intervals = written,
        "aggregated trade date"
    );
    Ok(written)
}

/// 50th percentile with linear interpolation between order statistics.
fn percentile_50(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = 0.5 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

/// Human interval label, e.g. period 1 of 15-minute intervals is
/// "00:00-00:15"; the last interval of the day ends at "24:00".
fn interval_label(period: u16, interval_minutes: u32) -> String {
    let start = (period as u32 - 1) * interval_minutes;
    let end = period as u32 * interval_minutes;
    let fmt = |minutes: u32| {
        if minutes == MINUTES_PER_DAY {
            "24:00".to_string()
        } else {
            format!("{:02}:{:02}", minutes / 60, minutes % 60)
        }
    };
    format!("{}-{}", fmt(start), fmt(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::structs::RawRecord;
    use crate::store::storage::PartitionedStore;
    use chrono::NaiveDateTime;
    use tempfile::TempDir;

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

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn minute(m: u32) -> NaiveDateTime {
        date().and_hms_opt(m / 60, m % 60, 0).unwrap()
    }

    fn full_day_records() -> Vec<RawRecord> {
        // One record per minute, value = minute index.
        (0..1440)
            .map(|m| RawRecord {
                timestamp: minute(m),
                grouping_key: "CZ".to_string(),
                value: Some(m as f64),
            })
            .collect()
    }

    #[test]
    fn full_day_statistics_per_interval() {
        let tmp = TempDir::new().unwrap();
        let dataset = test_dataset();
        let mut store = PartitionedStore::open(tmp.path(), &dataset).unwrap();
        store.upsert_raw(&dataset, &full_day_records()).unwrap();

        let written = aggregate(&dataset, &mut store, date()).unwrap();
        assert_eq!(written, 96);

        let aggs = store.aggregates_for_date(&dataset, date()).unwrap();
        assert_eq!(aggs.len(), 96);
        for agg in &aggs {
            let base = (agg.period as f64 - 1.0) * 15.0;
            // Minutes base..base+14: mean and interpolated median are both
            // the middle value, last observed is the final minute.
            assert!((agg.mean - (base + 7.0)).abs() < 1e-9);
            assert!((agg.median - (base + 7.0)).abs() < 1e-9);
            assert_eq!(agg.last_value, base + 14.0);
            assert_eq!(agg.sample_count, 15);
        }
        assert_eq!(aggs[0].interval_label, "00:00-00:15");
        assert_eq!(aggs[95].interval_label, "23:45-24:00");
    }

    #[test]
    fn empty_intervals_are_not_written() {
        let tmp = TempDir::new().unwrap();
        let dataset = test_dataset();
        let mut store = PartitionedStore::open(tmp.path(), &dataset).unwrap();

        // Only the first quarter hour has data.
        let records: Vec<RawRecord> = (0..15)
            .map(|m| RawRecord {
                timestamp: minute(m),
                grouping_key: "CZ".to_string(),
                value: Some(1.0),
            })
            .collect();
        store.upsert_raw(&dataset, &records).unwrap();

        let written = aggregate(&dataset, &mut store, date()).unwrap();
        assert_eq!(written, 1);
        let aggs = store.aggregates_for_date(&dataset, date()).unwrap();
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].period, 1);
    }

    #[test]
    fn all_null_interval_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let dataset = test_dataset();
        let mut store = PartitionedStore::open(tmp.path(), &dataset).unwrap();

        let records: Vec<RawRecord> = (0..15)
            .map(|m| RawRecord {
                timestamp: minute(m),
                grouping_key: "CZ".to_string(),
                value: None,
            })
            .collect();
        store.upsert_raw(&dataset, &records).unwrap();

        assert_eq!(aggregate(&dataset, &mut store, date()).unwrap(), 0);
    }

    #[test]
    fn rerun_recomputes_from_current_raw() {
        let tmp = TempDir::new().unwrap();
        let dataset = test_dataset();
        let mut store = PartitionedStore::open(tmp.path(), &dataset).unwrap();

        store.upsert_raw(&dataset, &full_day_records()).unwrap();
        aggregate(&dataset, &mut store, date()).unwrap();

        // Re-ingest minute 0 with a corrected value; re-aggregation must
        // pick it up and overwrite the first interval.
        store
            .upsert_raw(
                &dataset,
                &[RawRecord {
                    timestamp: minute(0),
                    grouping_key: "CZ".to_string(),
                    value: Some(1500.0),
                }],
            )
            .unwrap();
        aggregate(&dataset, &mut store, date()).unwrap();

        let aggs = store.aggregates_for_date(&dataset, date()).unwrap();
        assert_eq!(aggs.len(), 96);
        let first = &aggs[0];
        let expected_mean = (1500.0 + (1..15).sum::<i32>() as f64) / 15.0;
        assert!((first.mean - expected_mean).abs() < 1e-9);
    }

    #[test]
    fn median_interpolates_between_order_statistics() {
        assert_eq!(percentile_50(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(percentile_50(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(percentile_50(&[5.0]), 5.0);
        assert_eq!(percentile_50(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }
}
