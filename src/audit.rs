//! Consistency auditor: read-only completeness checks over the store.
//!
//! Per day, compares observed raw and aggregate cardinalities against the
//! expected counts derived from the dataset's resolution, surfaces NULL value
//! fields, and reports missing sub-ranges as contiguous `[start, end)` runs
//! rather than enumerating every absent timestamp. The report is how an
//! operator decides what to re-backfill.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::info;

use crate::dataset::Dataset;
use crate::store::errors::StoreError;
use crate::store::storage::PartitionedStore;

/// A contiguous run of absent expected timestamps within one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingRange {
    pub grouping_key: String,
    pub start: NaiveDateTime,
    /// Exclusive end: the first expected timestamp after the run that is
    /// present (or the end of the day).
    pub end: NaiveDateTime,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAudit {
    pub date: NaiveDate,
    pub raw_count: u64,
    pub raw_expected: u64,
    pub aggregate_count: u64,
    pub aggregate_expected: u64,
    pub null_values: u64,
    pub missing: Vec<MissingRange>,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub dataset: String,
    pub days: Vec<DayAudit>,
    /// Trade dates with raw records but no aggregates.
    pub raw_only_dates: Vec<NaiveDate>,
    /// Trade dates with aggregates but no raw records.
    pub aggregate_only_dates: Vec<NaiveDate>,
}

impl AuditReport {
    pub fn is_complete(&self) -> bool {
        self.days.iter().all(|d| d.complete)
            && self.raw_only_dates.is_empty()
            && self.aggregate_only_dates.is_empty()
    }
}

/// Audit every day in the inclusive date range. Never mutates the store.
pub fn audit(
    dataset: &Dataset,
    store: &PartitionedStore,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<AuditReport, StoreError> {
    let mut report = AuditReport {
        dataset: dataset.name.clone(),
        days: Vec::new(),
        raw_only_dates: Vec::new(),
        aggregate_only_dates: Vec::new(),
    };

    let gk_count = dataset.grouping_keys.len() as u64;
    let mut date = start;
    while date <= end {
        let raw = store.raw_for_date(dataset, date)?;
        let aggregates = store.aggregates_for_date(dataset, date)?;

        let raw_count = raw.len() as u64;
        let aggregate_count = aggregates.len() as u64;
        let null_values = raw.iter().filter(|r| r.value.is_none()).count() as u64;

        let mut missing = Vec::new();
        for gk in &dataset.grouping_keys {
            let present: Vec<u32> = raw
                .iter()
                .filter(|r| &r.grouping_key == gk)
                .map(|r| (r.timestamp.hour() * 60 + r.timestamp.minute()) / dataset.resolution_minutes)
                .collect();
            missing.extend(missing_runs(dataset, date, gk, &present));
        }

        if raw_count > 0 && aggregate_count == 0 {
            report.raw_only_dates.push(date);
        }
        if aggregate_count > 0 && raw_count == 0 {
            report.aggregate_only_dates.push(date);
        }

        let raw_expected = dataset.slots_per_day() as u64 * gk_count;
        let aggregate_expected = dataset.intervals_per_day() as u64 * gk_count;
        let complete = raw_count == raw_expected
            && aggregate_count == aggregate_expected
            && null_values == 0
            && missing.is_empty();

        report.days.push(DayAudit {
            date,
            raw_count,
            raw_expected,
            aggregate_count,
            aggregate_expected,
            null_values,
            missing,
            complete,
        });

        date += Duration::days(1);
    }

    let incomplete = report.days.iter().filter(|d| !d.complete).count();
    info!(
        dataset = %dataset.name,
        days = report.days.len(),
        incomplete,
        "audit finished"
    );
    Ok(report)
}

/// Collapse absent slot indices into `[start, end)` runs.
fn missing_runs(dataset: &Dataset, date: NaiveDate, grouping_key: &str, present: &[u32]) -> Vec<MissingRange> {
    let slots = dataset.slots_per_day();
    let step = dataset.one_unit();
    let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();

    let mut present_flags = vec![false; slots as usize];
    for &slot in present {
        if (slot as usize) < present_flags.len() {
            present_flags[slot as usize] = true;
        }
    }

    let mut runs = Vec::new();
    let mut run_start: Option<u32> = None;
    for slot in 0..slots {
        if !present_flags[slot as usize] {
            run_start.get_or_insert(slot);
        } else if let Some(first) = run_start.take() {
            runs.push(make_range(grouping_key, midnight, step, first, slot));
        }
    }
    if let Some(first) = run_start {
        runs.push(make_range(grouping_key, midnight, step, first, slots));
    }
    runs
}

fn make_range(
    grouping_key: &str,
    midnight: NaiveDateTime,
    step: Duration,
    first_slot: u32,
    end_slot: u32,
) -> MissingRange {
    MissingRange {
        grouping_key: grouping_key.to_string(),
        start: midnight + step * first_slot as i32,
        end: midnight + step * end_slot as i32,
        count: end_slot - first_slot,
    }
}
