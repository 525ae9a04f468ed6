use thiserror::Error;

use crate::dataset::DatasetConfigError;
use crate::store::errors::StoreError;

/// Run-level errors. Everything here aborts the run and surfaces to the
/// operator through a non-zero exit; per-chunk upstream failures never reach
/// this type.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Dataset(#[from] DatasetConfigError),
}
