/// Database and storage constants
// LMDB Configuration
pub const LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB per dataset
pub const LMDB_MAX_DBS: u32 = 512;
pub const LMDB_MAX_READERS: u32 = 256;

// Database names
pub const PARTITION_REGISTRY_DB_NAME: &str = "partitions";

// Partition name prefixes
pub const RAW_PARTITION_PREFIX: &str = "raw";
pub const AGG_PARTITION_PREFIX: &str = "agg";

// Time constants
pub const MINUTES_PER_DAY: u32 = 1440;

// Default dataset parameters
pub const DEFAULT_RESOLUTION_MINUTES: u32 = 1;
pub const DEFAULT_AGGREGATE_INTERVAL_MINUTES: u32 = 15;
pub const DEFAULT_LAG_MINUTES: i64 = 1440; // data finalized one day behind
pub const DEFAULT_MAX_SPAN_DAYS: i64 = 7;
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "timestamp";
pub const DEFAULT_VALUE_COLUMN: &str = "value";

// HTTP adapter defaults
pub const HTTP_TIMEOUT_SECONDS: u64 = 30;
pub const HTTP_MAX_ATTEMPTS: u32 = 3;
pub const HTTP_RETRY_BASE_DELAY_MS: u64 = 500;
