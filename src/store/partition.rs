//! Partition routing: a pure function from `(grouping_key, time)` to the
//! named LMDB database a record lands in.
//!
//! Raw and aggregate rows partition by grouping key and civil year, so a new
//! market area or a new year opens a new database on first write instead of
//! failing. Routing never reads existing data.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::common::constants::{AGG_PARTITION_PREFIX, RAW_PARTITION_PREFIX};
use crate::dataset::Dataset;

use super::errors::StoreError;

/// Which side of the store a partition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionKind {
    Raw,
    Aggregate,
}

/// Registry entry for a physical partition, persisted in the dataset's
/// environment so queries can enumerate partitions without scanning disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub kind: PartitionKind,
    pub grouping_key: String,
    pub year: i32,
}

impl PartitionMeta {
    pub fn db_name(&self) -> String {
        let prefix = match self.kind {
            PartitionKind::Raw => RAW_PARTITION_PREFIX,
            PartitionKind::Aggregate => AGG_PARTITION_PREFIX,
        };
        format!("{}_{}_{}", prefix, self.grouping_key, self.year)
    }
}

/// Route a raw record to its partition. Fails when the grouping key is not in
/// the dataset's declared domain.
pub fn route_raw(
    dataset: &Dataset,
    grouping_key: &str,
    timestamp: NaiveDateTime,
) -> Result<PartitionMeta, StoreError> {
    check_domain(dataset, grouping_key)?;
    Ok(PartitionMeta {
        kind: PartitionKind::Raw,
        grouping_key: grouping_key.to_string(),
        year: timestamp.year(),
    })
}

/// Route an aggregate record to its partition by trade date.
pub fn route_aggregate(
    dataset: &Dataset,
    grouping_key: &str,
    trade_date: NaiveDate,
) -> Result<PartitionMeta, StoreError> {
    check_domain(dataset, grouping_key)?;
    Ok(PartitionMeta {
        kind: PartitionKind::Aggregate,
        grouping_key: grouping_key.to_string(),
        year: trade_date.year(),
    })
}

fn check_domain(dataset: &Dataset, grouping_key: &str) -> Result<(), StoreError> {
    if dataset.is_declared_key(grouping_key) {
        Ok(())
    } else {
        Err(StoreError::PartitionRouting(format!(
            "grouping key '{}' is outside the declared domain of dataset '{}'",
            grouping_key, dataset.name
        )))
    }
}
