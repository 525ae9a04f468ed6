//! LMDB-backed partitioned store.
//!
//! One environment per dataset; every physical partition is a named database
//! inside that environment, so a chunk batch that spans partitions still
//! commits in a single write transaction. Partitions are created on first
//! write and recorded in a registry database, which is how queries enumerate
//! them after reopen.

use std::ops::Bound;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::common::constants::{LMDB_MAP_SIZE, LMDB_MAX_DBS, LMDB_MAX_READERS, PARTITION_REGISTRY_DB_NAME};
use crate::dataset::Dataset;
use crate::ingest::structs::{AggregateRecord, RawRecord, TimeRange};

use super::errors::StoreError;
use super::partition::{route_aggregate, route_raw, PartitionKind, PartitionMeta};

/// Persisted raw-record shape. `ingested_at` is provenance (UTC epoch
/// milliseconds), refreshed on every upsert and excluded from identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRaw {
    pub timestamp: NaiveDateTime,
    pub grouping_key: String,
    pub value: Option<f64>,
    pub ingested_at: i64,
}

type RawDb = Database<Str, SerdeBincode<StoredRaw>>;
type AggDb = Database<Str, SerdeBincode<AggregateRecord>>;
type RegistryDb = Database<Str, SerdeBincode<PartitionMeta>>;

#[derive(Debug, Clone, Serialize)]
pub struct PartitionStats {
    pub name: String,
    pub kind: PartitionKind,
    pub records: u64,
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub partitions: Vec<PartitionStats>,
    pub total_records: u64,
}

pub struct PartitionedStore {
    env: Env,
    registry: RegistryDb,
    raw_dbs: FxHashMap<String, RawDb>,
    agg_dbs: FxHashMap<String, AggDb>,
}

/// Raw keys sort by timestamp: zero-padded epoch milliseconds of the naive
/// civil instant.
fn ts_key(ts: NaiveDateTime) -> String {
    format!("{:015}", ts.and_utc().timestamp_millis())
}

/// Aggregate keys sort by trade date then period.
fn agg_key(trade_date: NaiveDate, period: u16) -> String {
    format!("{}:{:03}", trade_date, period)
}

fn open_environment(path: &Path) -> Result<Env, StoreError> {
    unsafe {
        EnvOpenOptions::new()
            .map_size(LMDB_MAP_SIZE)
            .max_dbs(LMDB_MAX_DBS)
            .max_readers(LMDB_MAX_READERS)
            .open(path)
    }
    .map_err(|e| {
        StoreError::Connection(format!(
            "failed to open store environment at '{}': {}",
            path.display(),
            e
        ))
    })
}

impl PartitionedStore {
    /// Open (or create) the store for one dataset under `base_path`.
    pub fn open(base_path: &Path, dataset: &Dataset) -> Result<Self, StoreError> {
        let dir = base_path.join(&dataset.name);
        std::fs::create_dir_all(&dir).map_err(|e| {
            StoreError::DirectoryCreation(format!(
                "failed to create store directory '{}': {}",
                dir.display(),
                e
            ))
        })?;

        let env = open_environment(&dir)?;

        let mut wtxn = env.write_txn()?;
        let registry: RegistryDb = env.create_database(&mut wtxn, Some(PARTITION_REGISTRY_DB_NAME))?;
        wtxn.commit()?;

        let mut raw_dbs = FxHashMap::default();
        let mut agg_dbs = FxHashMap::default();
        {
            let rtxn = env.read_txn()?;
            let mut known = Vec::new();
            for entry in registry.iter(&rtxn)? {
                let (name, meta) = entry?;
                known.push((name.to_string(), meta));
            }
            for (name, meta) in known {
                match meta.kind {
                    PartitionKind::Raw => {
                        if let Some(db) =
                            env.open_database::<Str, SerdeBincode<StoredRaw>>(&rtxn, Some(name.as_str()))?
                        {
                            raw_dbs.insert(name, db);
                        }
                    }
                    PartitionKind::Aggregate => {
                        if let Some(db) =
                            env.open_database::<Str, SerdeBincode<AggregateRecord>>(&rtxn, Some(name.as_str()))?
                        {
                            agg_dbs.insert(name, db);
                        }
                    }
                }
            }
        }

        info!(
            dataset = %dataset.name,
            partitions = raw_dbs.len() + agg_dbs.len(),
            path = %dir.display(),
            "opened partitioned store"
        );

        Ok(Self {
            env,
            registry,
            raw_dbs,
            agg_dbs,
        })
    }

    /// Upsert a batch of raw records in one write transaction.
    ///
    /// The whole batch commits or none of it does; the backfill cursor
    /// invariant ("max persisted timestamp implies everything before it is
    /// persisted") depends on this boundary. Records with the same natural
    /// key overwrite all value fields and refresh the provenance timestamp.
    pub fn upsert_raw(&mut self, dataset: &Dataset, records: &[RawRecord]) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        // Route everything before opening the transaction so a routing error
        // leaves the store untouched.
        let mut routed = Vec::with_capacity(records.len());
        for record in records {
            let meta = route_raw(dataset, &record.grouping_key, record.timestamp)?;
            routed.push((meta.db_name(), meta, record));
        }

        let ingested_at = Utc::now().timestamp_millis();
        let mut created: Vec<(String, RawDb)> = Vec::new();
        let mut wtxn = self.env.write_txn()?;

        for (name, meta, record) in &routed {
            let db = match self.raw_dbs.get(name) {
                Some(db) => *db,
                None => match created.iter().find(|(n, _)| n == name) {
                    Some((_, db)) => *db,
                    None => {
                        let db: RawDb = self.env.create_database(&mut wtxn, Some(name.as_str()))?;
                        self.registry.put(&mut wtxn, name, meta)?;
                        debug!(partition = %name, "created raw partition on first write");
                        created.push((name.clone(), db));
                        db
                    }
                },
            };
            let stored = StoredRaw {
                timestamp: record.timestamp,
                grouping_key: record.grouping_key.clone(),
                value: record.value,
                ingested_at,
            };
            db.put(&mut wtxn, &ts_key(record.timestamp), &stored)?;
        }

        wtxn.commit()?;
        self.raw_dbs.extend(created);

        debug!(dataset = %dataset.name, count = records.len(), "upserted raw batch");
        Ok(records.len() as u64)
    }

    /// Upsert aggregate records with the same transactional semantics as
    /// [`Self::upsert_raw`].
    pub fn upsert_aggregates(
        &mut self,
        dataset: &Dataset,
        records: &[AggregateRecord],
    ) -> Result<u64, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut routed = Vec::with_capacity(records.len());
        for record in records {
            let meta = route_aggregate(dataset, &record.grouping_key, record.trade_date)?;
            routed.push((meta.db_name(), meta, record));
        }

        let mut created: Vec<(String, AggDb)> = Vec::new();
        let mut wtxn = self.env.write_txn()?;

        for (name, meta, record) in &routed {
            let db = match self.agg_dbs.get(name) {
                Some(db) => *db,
                None => match created.iter().find(|(n, _)| n == name) {
                    Some((_, db)) => *db,
                    None => {
                        let db: AggDb = self.env.create_database(&mut wtxn, Some(name.as_str()))?;
                        self.registry.put(&mut wtxn, name, meta)?;
                        debug!(partition = %name, "created aggregate partition on first write");
                        created.push((name.clone(), db));
                        db
                    }
                },
            };
            db.put(&mut wtxn, &agg_key(record.trade_date, record.period), record)?;
        }

        wtxn.commit()?;
        self.agg_dbs.extend(created);

        debug!(dataset = %dataset.name, count = records.len(), "upserted aggregate batch");
        Ok(records.len() as u64)
    }

    /// Maximum persisted raw timestamp across all partitions; the backfill
    /// cursor is derived from this on every run.
    pub fn max_raw_timestamp(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let mut latest: Option<NaiveDateTime> = None;
        for db in self.raw_dbs.values() {
            if let Some((_key, record)) = db.last(&rtxn)? {
                if latest.map_or(true, |cur| record.timestamp > cur) {
                    latest = Some(record.timestamp);
                }
            }
        }
        Ok(latest)
    }

    /// All raw records with `range.start <= timestamp < range.end`, sorted by
    /// timestamp then grouping key.
    pub fn raw_in_range(&self, dataset: &Dataset, range: TimeRange) -> Result<Vec<StoredRaw>, StoreError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let rtxn = self.env.read_txn()?;
        let start_key = ts_key(range.start);
        let end_key = ts_key(range.end);
        let mut out = Vec::new();
        for year in range.start.year()..=range.end.year() {
            for gk in &dataset.grouping_keys {
                let name = PartitionMeta {
                    kind: PartitionKind::Raw,
                    grouping_key: gk.clone(),
                    year,
                }
                .db_name();
                let Some(db) = self.raw_dbs.get(&name) else { continue };
                let bounds = (Bound::Included(&start_key[..]), Bound::Excluded(&end_key[..]));
                for entry in db.range(&rtxn, &bounds)? {
                    let (_key, record) = entry?;
                    if range.contains(record.timestamp) {
                        out.push(record);
                    }
                }
            }
        }
        out.sort_by(|a, b| (a.timestamp, &a.grouping_key).cmp(&(b.timestamp, &b.grouping_key)));
        Ok(out)
    }

    pub fn raw_for_date(&self, dataset: &Dataset, date: NaiveDate) -> Result<Vec<StoredRaw>, StoreError> {
        let start = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        self.raw_in_range(dataset, TimeRange::new(start, start + chrono::Duration::days(1)))
    }

    /// All aggregate records for one trade date, sorted by period then
    /// grouping key.
    pub fn aggregates_for_date(
        &self,
        dataset: &Dataset,
        date: NaiveDate,
    ) -> Result<Vec<AggregateRecord>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let start_key = agg_key(date, 0);
        let end_key = agg_key(date, 999);
        let mut out = Vec::new();
        for gk in &dataset.grouping_keys {
            let name = PartitionMeta {
                kind: PartitionKind::Aggregate,
                grouping_key: gk.clone(),
                year: date.year(),
            }
            .db_name();
            let Some(db) = self.agg_dbs.get(&name) else { continue };
            let bounds = (Bound::Included(&start_key[..]), Bound::Included(&end_key[..]));
            for entry in db.range(&rtxn, &bounds)? {
                let (_key, record) = entry?;
                out.push(record);
            }
        }
        out.sort_by(|a, b| (a.period, &a.grouping_key).cmp(&(b.period, &b.grouping_key)));
        Ok(out)
    }

    /// Per-partition record counts and bounds.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let rtxn = self.env.read_txn()?;
        let mut partitions = Vec::new();
        let mut total_records = 0u64;

        for (name, db) in &self.raw_dbs {
            let records = db.len(&rtxn)?;
            let earliest = db.first(&rtxn)?.map(|(_, r)| r.timestamp);
            let latest = db.last(&rtxn)?.map(|(_, r)| r.timestamp);
            partitions.push(PartitionStats {
                name: name.clone(),
                kind: PartitionKind::Raw,
                records,
                earliest,
                latest,
            });
            total_records += records;
        }
        for (name, db) in &self.agg_dbs {
            let records = db.len(&rtxn)?;
            partitions.push(PartitionStats {
                name: name.clone(),
                kind: PartitionKind::Aggregate,
                records,
                earliest: None,
                latest: None,
            });
            total_records += records;
        }

        partitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(StoreStats {
            partitions,
            total_records,
        })
    }
}
