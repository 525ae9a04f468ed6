//! Ingestion pipeline: resolver → planner → fetch adapter → store, one
//! dataset per run.
//!
//! Chunks are processed strictly sequentially in ascending time order; that
//! ordering is what makes "max persisted timestamp" a valid backfill cursor
//! under partial failure. A chunk's upstream failure is recorded and the run
//! continues; only store-level and configuration errors abort the whole run.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::adapter::{map_rows, FetchAdapter};
use crate::aggregate;
use crate::dataset::Dataset;
use crate::store::storage::PartitionedStore;

use super::errors::IngestError;
use super::planner;
use super::resolver;
use super::structs::{IngestionReport, RawRecord, TimeRange};

pub struct IngestionPipeline<'a, A: FetchAdapter> {
    dataset: &'a Dataset,
    adapter: &'a A,
    store: &'a mut PartitionedStore,
    dry_run: bool,
}

impl<'a, A: FetchAdapter> IngestionPipeline<'a, A> {
    pub fn new(dataset: &'a Dataset, adapter: &'a A, store: &'a mut PartitionedStore) -> Self {
        Self {
            dataset,
            adapter,
            store,
            dry_run: false,
        }
    }

    /// In dry-run mode fetch, parse and plan exactly as usual but replace
    /// every writer call with counting; the store is never touched.
    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    /// Run one ingestion job. Without a range override the backfill resolver
    /// derives the missing range from the store; an up-to-date dataset is a
    /// normal no-op, not an error.
    pub fn run(&mut self, range_override: Option<TimeRange>) -> Result<IngestionReport, IngestError> {
        let mut report = IngestionReport::new(&self.dataset.name, self.dry_run);

        let range = match range_override {
            Some(range) if range.is_empty() => {
                info!(dataset = %self.dataset.name, %range, "requested range is empty, nothing to do");
                return Ok(report);
            }
            Some(range) => range,
            None => match resolver::resolve(self.dataset, self.store)? {
                Some(range) => range,
                None => return Ok(report),
            },
        };

        info!(
            dataset = %self.dataset.name,
            %range,
            dry_run = self.dry_run,
            "starting ingestion run"
        );

        let mut touched_dates: BTreeSet<NaiveDate> = BTreeSet::new();

        for chunk in planner::plan(range, self.dataset.max_span()) {
            match self.adapter.fetch(&self.dataset.resource, chunk) {
                Err(err) => {
                    // Failure isolation: one chunk must not abort the
                    // backfill of subsequent, independent chunks.
                    warn!(
                        dataset = %self.dataset.name,
                        chunk = %chunk,
                        transient = err.is_transient(),
                        error = %err,
                        "chunk failed, continuing with next chunk"
                    );
                    report.chunks_failed.push(chunk);
                }
                Ok(rows) => {
                    let mapped = map_rows(self.dataset, rows);
                    report.records_rejected += mapped.rejected;

                    let mut records: Vec<RawRecord> = Vec::with_capacity(mapped.records.len());
                    let mut out_of_bounds = 0u64;
                    for record in mapped.records {
                        if chunk.contains(record.timestamp) {
                            records.push(record);
                        } else {
                            out_of_bounds += 1;
                        }
                    }
                    if out_of_bounds > 0 {
                        warn!(
                            dataset = %self.dataset.name,
                            chunk = %chunk,
                            count = out_of_bounds,
                            "dropping records outside chunk bounds"
                        );
                        report.records_rejected += out_of_bounds;
                    }

                    if self.dry_run {
                        report.records_written += records.len() as u64;
                        report.chunks_ok += 1;
                        continue;
                    }

                    // Store-level failures are run-level faults, not chunk
                    // failures; abort instead of skipping ahead.
                    let written = self.store.upsert_raw(self.dataset, &records)?;
                    report.records_written += written;
                    report.chunks_ok += 1;
                    touched_dates.extend(records.iter().map(|r| r.timestamp.date()));
                }
            }
        }

        if !self.dry_run {
            for date in touched_dates {
                report.intervals_aggregated +=
                    aggregate::aggregate(self.dataset, self.store, date)? as u64;
            }
        }

        if report.is_noop() {
            info!(dataset = %self.dataset.name, "empty plan, nothing ingested");
        } else {
            info!(
                dataset = %self.dataset.name,
                chunks_ok = report.chunks_ok,
                chunks_failed = report.chunks_failed.len(),
                records_written = report.records_written,
                records_rejected = report.records_rejected,
                intervals_aggregated = report.intervals_aggregated,
                "ingestion run finished"
            );
        }
        Ok(report)
    }
}
