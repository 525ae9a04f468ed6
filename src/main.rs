use std::path::PathBuf;
use std::process::ExitCode;

use chrono::{Duration, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{error, info, warn};

use grid_feeder::adapter::http_csv::HttpCsvAdapter;
use grid_feeder::aggregate;
use grid_feeder::audit;
use grid_feeder::dataset::Dataset;
use grid_feeder::ingest::{IngestError, IngestionPipeline, TimeRange};
use grid_feeder::logging::{cleanup_old_logs, init_dual_logging, LogRotation, LoggingConfig};
use grid_feeder::store::storage::PartitionedStore;

#[derive(Parser)]
#[command(
    name = "grid_feeder",
    about = "Electricity-market time-series ingestion and reconciliation engine"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable debug logging.
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill datasets. Without range flags the missing range is derived
    /// from the store's own maximum timestamp.
    Ingest {
        /// Dataset to ingest; omit to run every configured dataset.
        #[arg(long)]
        dataset: Option<String>,

        /// Start date (YYYY-MM-DD) of an explicit backfill range.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), inclusive. Defaults to yesterday.
        #[arg(long)]
        end: Option<String>,

        /// Fetch, parse and plan as usual but write nothing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Recompute aggregate intervals from current raw records.
    Aggregate {
        #[arg(long)]
        dataset: String,

        /// Single trade date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// First trade date of a range (YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Last trade date of a range (YYYY-MM-DD), inclusive.
        #[arg(long)]
        end: Option<String>,
    },
    /// Check store completeness for a date range; read-only.
    Audit {
        #[arg(long)]
        dataset: String,

        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,

        /// Emit the full report as JSON on stdout.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Storage configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct StorageTomlConfig {
    pub path: String,
}

/// Logging configuration from config.toml
#[derive(Debug, Clone, Deserialize)]
struct LoggingTomlConfig {
    pub log_dir: Option<String>,
    pub level_filter: Option<String>,
    pub rotation: Option<String>, // "daily" or "hourly"
    pub console_timestamps: Option<bool>,
    pub file_json_format: Option<bool>,
    pub cleanup_days: Option<u32>,
}

/// Full TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
struct TomlConfig {
    pub storage: StorageTomlConfig,
    pub logging: Option<LoggingTomlConfig>,
    #[serde(rename = "dataset")]
    pub datasets: Vec<Dataset>,
}

fn load_config(path: &PathBuf) -> Result<TomlConfig, IngestError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| IngestError::Config(format!("cannot read '{}': {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| IngestError::Config(format!("cannot parse '{}': {}", path.display(), e)))?;
    if config.datasets.is_empty() {
        return Err(IngestError::Config("no datasets configured".to_string()));
    }
    for dataset in &config.datasets {
        dataset.validate()?;
    }
    Ok(config)
}

fn build_logging_config(toml: Option<LoggingTomlConfig>, debug: bool) -> (LoggingConfig, u32) {
    let mut config = LoggingConfig::default();
    let mut cleanup_days = 30;
    if let Some(log_config) = toml {
        if let Some(dir) = log_config.log_dir {
            config.log_dir = dir;
        }
        if let Some(filter) = log_config.level_filter {
            config.level_filter = filter;
        }
        config.rotation = match log_config.rotation.as_deref() {
            Some("hourly") => LogRotation::Hourly,
            _ => LogRotation::Daily,
        };
        if let Some(ts) = log_config.console_timestamps {
            config.console_timestamps = ts;
        }
        if let Some(json) = log_config.file_json_format {
            config.file_json_format = json;
        }
        cleanup_days = log_config.cleanup_days.unwrap_or(30);
    }
    if debug {
        config.level_filter = "debug,grid_feeder=debug".to_string();
    }
    (config, cleanup_days)
}

fn parse_date(value: &str) -> Result<NaiveDate, IngestError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| IngestError::Config(format!("invalid date '{}', expected YYYY-MM-DD", value)))
}

fn find_dataset<'a>(config: &'a TomlConfig, name: &str) -> Result<&'a Dataset, IngestError> {
    config
        .datasets
        .iter()
        .find(|d| d.name == name)
        .ok_or_else(|| IngestError::Config(format!("unknown dataset '{}'", name)))
}

fn select_datasets<'a>(config: &'a TomlConfig, name: Option<&str>) -> Result<Vec<&'a Dataset>, IngestError> {
    match name {
        Some(name) => Ok(vec![find_dataset(config, name)?]),
        None => Ok(config.datasets.iter().collect()),
    }
}

/// Turn `--start`/`--end` dates into a half-open civil range. `--end` is
/// inclusive and defaults to yesterday in the dataset's civil timezone.
fn explicit_range(
    dataset: &Dataset,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<TimeRange>, IngestError> {
    let Some(start) = start else {
        if end.is_some() {
            return Err(IngestError::Config("--end requires --start".to_string()));
        }
        return Ok(None);
    };
    let start_date = parse_date(start)?;
    let end_date = match end {
        Some(end) => parse_date(end)?,
        None => dataset.civil_now().date() - Duration::days(1),
    };
    if end_date < start_date {
        return Err(IngestError::Config(format!(
            "start date {} is after end date {}",
            start_date, end_date
        )));
    }
    let start_instant = start_date.and_hms_opt(0, 0, 0).unwrap_or_default();
    let end_instant = (end_date + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap_or_default();
    Ok(Some(TimeRange::new(start_instant, end_instant)))
}

fn run_ingest(
    config: &TomlConfig,
    dataset: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
    dry_run: bool,
) -> Result<(), IngestError> {
    let base_path = PathBuf::from(&config.storage.path);
    for ds in select_datasets(config, dataset)? {
        let range = explicit_range(ds, start, end)?;
        let mut store = PartitionedStore::open(&base_path, ds)?;
        let adapter = HttpCsvAdapter::for_dataset(ds)?;

        let mut pipeline = IngestionPipeline::new(ds, &adapter, &mut store).dry_run(dry_run);
        let report = pipeline.run(range)?;

        for failed in &report.chunks_failed {
            warn!(dataset = %ds.name, range = %failed, "chunk failed, target this range for re-run");
        }
    }
    Ok(())
}

fn run_aggregate(
    config: &TomlConfig,
    dataset: &str,
    date: Option<&str>,
    start: Option<&str>,
    end: Option<&str>,
) -> Result<(), IngestError> {
    let ds = find_dataset(config, dataset)?;
    let (from, to) = match (date, start, end) {
        (Some(date), None, None) => {
            let d = parse_date(date)?;
            (d, d)
        }
        (None, Some(start), Some(end)) => (parse_date(start)?, parse_date(end)?),
        _ => {
            return Err(IngestError::Config(
                "pass either --date or both --start and --end".to_string(),
            ))
        }
    };
    if to < from {
        return Err(IngestError::Config(format!("start date {} is after end date {}", from, to)));
    }

    let mut store = PartitionedStore::open(&PathBuf::from(&config.storage.path), ds)?;
    let mut total = 0usize;
    let mut current = from;
    while current <= to {
        total += aggregate::aggregate(ds, &mut store, current)?;
        current += Duration::days(1);
    }
    info!(dataset = %ds.name, %from, %to, intervals = total, "aggregation finished");
    Ok(())
}

fn run_audit(
    config: &TomlConfig,
    dataset: &str,
    start: &str,
    end: &str,
    json: bool,
) -> Result<(), IngestError> {
    let ds = find_dataset(config, dataset)?;
    let store = PartitionedStore::open(&PathBuf::from(&config.storage.path), ds)?;

    let stats = store.stats()?;
    info!(
        dataset = %ds.name,
        partitions = stats.partitions.len(),
        total_records = stats.total_records,
        "store statistics"
    );

    let report = audit::audit(ds, &store, parse_date(start)?, parse_date(end)?)?;

    if json {
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|e| IngestError::Config(format!("cannot render audit report: {}", e)))?;
        println!("{}", rendered);
        return Ok(());
    }

    for day in &report.days {
        if day.complete {
            info!(date = %day.date, raw = day.raw_count, aggregates = day.aggregate_count, "complete");
        } else {
            warn!(
                date = %day.date,
                raw = format!("{}/{}", day.raw_count, day.raw_expected),
                aggregates = format!("{}/{}", day.aggregate_count, day.aggregate_expected),
                null_values = day.null_values,
                missing_runs = day.missing.len(),
                "incomplete"
            );
            for run in &day.missing {
                warn!(
                    grouping_key = %run.grouping_key,
                    start = %run.start,
                    end = %run.end,
                    count = run.count,
                    "missing sub-range"
                );
            }
        }
    }
    for date in &report.raw_only_dates {
        warn!(%date, "raw records present but no aggregates");
    }
    for date in &report.aggregate_only_dates {
        warn!(%date, "aggregates present but no raw records");
    }
    Ok(())
}

fn run(cli: &Cli, config: &TomlConfig) -> Result<(), IngestError> {
    match &cli.command {
        Commands::Ingest {
            dataset,
            start,
            end,
            dry_run,
        } => run_ingest(config, dataset.as_deref(), start.as_deref(), end.as_deref(), *dry_run),
        Commands::Aggregate {
            dataset,
            date,
            start,
            end,
        } => run_aggregate(config, dataset, date.as_deref(), start.as_deref(), end.as_deref()),
        Commands::Audit {
            dataset,
            start,
            end,
            json,
        } => run_audit(config, dataset, start, end, *json),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            return ExitCode::from(2);
        }
    };

    let (logging_config, cleanup_days) = build_logging_config(config.logging.clone(), cli.debug);
    let log_dir = logging_config.log_dir.clone();
    let _guard = match init_dual_logging(logging_config) {
        Ok(guard) => Some(guard),
        Err(err) => {
            eprintln!("failed to initialize logging: {}", err);
            None
        }
    };
    if let Err(err) = cleanup_old_logs(&log_dir, cleanup_days) {
        warn!("log cleanup failed: {}", err);
    }

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {}", err);
            ExitCode::FAILURE
        }
    }
}
