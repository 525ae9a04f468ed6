//! Backfill resolver: derive the missing range for a dataset from the store
//! itself.
//!
//! There is no cursor file; the boundary between persisted and not-yet-fetched
//! time is recomputed from `max(timestamp)` on every run, so the store is the
//! only persisted state.

use chrono::NaiveDateTime;
use tracing::{debug, info};

use crate::dataset::Dataset;
use crate::store::errors::StoreError;
use crate::store::storage::PartitionedStore;

use super::structs::TimeRange;

/// Resolve the range to backfill, up to `now - lag` in the dataset's civil
/// timezone. `None` means the dataset is already up to date; with sub-hour
/// cron cadences this is the common case, not an error.
pub fn resolve(dataset: &Dataset, store: &PartitionedStore) -> Result<Option<TimeRange>, StoreError> {
    resolve_at(dataset, store, dataset.civil_now())
}

/// Deterministic variant of [`resolve`] taking the current civil instant.
pub fn resolve_at(
    dataset: &Dataset,
    store: &PartitionedStore,
    now: NaiveDateTime,
) -> Result<Option<TimeRange>, StoreError> {
    let horizon = now - dataset.lag();

    let start = match store.max_raw_timestamp()? {
        Some(latest) => {
            debug!(dataset = %dataset.name, %latest, "cursor derived from store");
            latest + dataset.one_unit()
        }
        None => {
            debug!(dataset = %dataset.name, floor = %dataset.epoch_floor, "store empty, starting at epoch floor");
            dataset.floor_instant()
        }
    };

    if start >= horizon {
        info!(dataset = %dataset.name, %start, %horizon, "already up to date, nothing to do");
        return Ok(None);
    }

    Ok(Some(TimeRange::new(start, horizon)))
}
