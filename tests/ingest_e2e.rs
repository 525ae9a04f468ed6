//! End-to-end ingestion scenarios against a real temp-dir store, driving the
//! public API only: a scripted adapter stands in for the upstream.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use tempfile::TempDir;

use grid_feeder::adapter::{FetchAdapter, FetchError, RawRow};
use grid_feeder::audit;
use grid_feeder::dataset::Dataset;
use grid_feeder::ingest::{IngestionPipeline, TimeRange};
use grid_feeder::store::storage::PartitionedStore;

fn dataset() -> Dataset {
    Dataset {
        name: "system_imbalance".to_string(),
        source: "ceps".to_string(),
        resource: "AktualniSystemovaOdchylkaCR".to_string(),
        grouping_keys: vec!["CZ".to_string()],
        resolution_minutes: 1,
        aggregate_interval_minutes: 15,
        utc_offset_minutes: 60,
        epoch_floor: NaiveDate::from_ymd_opt(2025, 11, 1).unwrap(),
        lag_minutes: 1440,
        max_span_days: 1,
        timestamp_format: "%Y-%m-%d %H:%M:%S".to_string(),
        timestamp_column: "timestamp".to_string(),
        value_column: "value".to_string(),
        grouping_column: None,
        url_template: None,
    }
}

fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 11, d).unwrap().and_hms_opt(h, m, 0).unwrap()
}

/// Upstream stand-in: serves one row per minute, optionally omitting a window
/// of minutes and failing whole chunks.
struct ScriptedUpstream {
    omit: Option<(NaiveDateTime, NaiveDateTime)>,
    fail_chunk_starting_at: Option<NaiveDateTime>,
}

impl ScriptedUpstream {
    fn new() -> Self {
        Self {
            omit: None,
            fail_chunk_starting_at: None,
        }
    }
}

impl FetchAdapter for ScriptedUpstream {
    fn fetch(&self, _resource: &str, range: TimeRange) -> Result<Vec<RawRow>, FetchError> {
        if self.fail_chunk_starting_at == Some(range.start) {
            return Err(FetchError::Transient("upstream unavailable".to_string()));
        }

        let mut rows = Vec::new();
        let mut ts = range.start;
        while ts < range.end {
            let omitted = self
                .omit
                .map(|(from, to)| ts >= from && ts <= to)
                .unwrap_or(false);
            if !omitted {
                rows.push(RawRow {
                    timestamp: ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                    grouping_key: String::new(),
                    value: format!("{:.1}", (ts.and_utc().timestamp() % 600) as f64 / 10.0),
                });
            }
            ts += Duration::minutes(1);
        }
        Ok(rows)
    }
}

#[test]
fn backfill_aggregate_and_audit_a_complete_day() {
    let tmp = TempDir::new().unwrap();
    let ds = dataset();
    let mut store = PartitionedStore::open(tmp.path(), &ds).unwrap();
    let upstream = ScriptedUpstream::new();

    let range = TimeRange::new(dt(1, 0, 0), dt(2, 0, 0));
    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    let report = pipeline.run(Some(range)).unwrap();
    drop(pipeline);

    assert_eq!(report.chunks_ok, 1);
    assert!(report.chunks_failed.is_empty());
    assert_eq!(report.records_written, 1440);
    assert_eq!(report.intervals_aggregated, 96);

    let audit_report = audit::audit(&ds, &store, dt(1, 0, 0).date(), dt(1, 0, 0).date()).unwrap();
    assert!(audit_report.is_complete());
}

#[test]
fn audit_pinpoints_the_gap_an_upstream_outage_left() {
    let tmp = TempDir::new().unwrap();
    let ds = dataset();
    let mut store = PartitionedStore::open(tmp.path(), &ds).unwrap();

    let mut upstream = ScriptedUpstream::new();
    upstream.omit = Some((dt(1, 11, 40), dt(1, 11, 55))); // minutes 700..=715

    let range = TimeRange::new(dt(1, 0, 0), dt(2, 0, 0));
    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    let report = pipeline.run(Some(range)).unwrap();
    drop(pipeline);
    assert_eq!(report.records_written, 1424);

    let audit_report = audit::audit(&ds, &store, dt(1, 0, 0).date(), dt(1, 0, 0).date()).unwrap();
    let day = &audit_report.days[0];
    assert_eq!(day.raw_count, 1424);
    assert_eq!(day.raw_expected, 1440);
    assert_eq!(day.missing.len(), 1);
    assert_eq!(day.missing[0].start, dt(1, 11, 40));
    assert_eq!(day.missing[0].end, dt(1, 11, 56));
    assert_eq!(day.missing[0].count, 16);
}

#[test]
fn failed_chunk_is_recoverable_by_targeted_rerun() {
    let tmp = TempDir::new().unwrap();
    let ds = dataset();
    let mut store = PartitionedStore::open(tmp.path(), &ds).unwrap();

    // First pass: day 2 of 3 fails.
    let mut upstream = ScriptedUpstream::new();
    upstream.fail_chunk_starting_at = Some(dt(2, 0, 0));

    let range = TimeRange::new(dt(1, 0, 0), dt(4, 0, 0));
    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    let report = pipeline.run(Some(range)).unwrap();
    drop(pipeline);

    assert_eq!(report.chunks_ok, 2);
    assert_eq!(report.chunks_failed, vec![TimeRange::new(dt(2, 0, 0), dt(3, 0, 0))]);

    // Second pass re-runs exactly the reported failed range.
    let upstream = ScriptedUpstream::new();
    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    let rerun = pipeline.run(Some(report.chunks_failed[0])).unwrap();
    drop(pipeline);

    assert_eq!(rerun.chunks_ok, 1);
    assert_eq!(rerun.records_written, 1440);

    let audit_report = audit::audit(&ds, &store, dt(1, 0, 0).date(), dt(3, 0, 0).date()).unwrap();
    assert!(audit_report.is_complete());
}

#[test]
fn rerun_over_same_range_changes_nothing() {
    let tmp = TempDir::new().unwrap();
    let ds = dataset();
    let mut store = PartitionedStore::open(tmp.path(), &ds).unwrap();
    let upstream = ScriptedUpstream::new();

    let range = TimeRange::new(dt(1, 0, 0), dt(2, 0, 0));
    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    pipeline.run(Some(range)).unwrap();
    drop(pipeline);

    let before: Vec<_> = store
        .raw_in_range(&ds, range)
        .unwrap()
        .into_iter()
        .map(|r| (r.timestamp, r.value))
        .collect();

    let mut pipeline = IngestionPipeline::new(&ds, &upstream, &mut store);
    pipeline.run(Some(range)).unwrap();
    drop(pipeline);

    let after: Vec<_> = store
        .raw_in_range(&ds, range)
        .unwrap()
        .into_iter()
        .map(|r| (r.timestamp, r.value))
        .collect();

    assert_eq!(before, after);
}
