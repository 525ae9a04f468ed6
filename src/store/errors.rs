use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Heed error: {0}")]
    Heed(#[from] heed::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store connection error: {0}")]
    Connection(String),
    #[error("Partition routing error: {0}")]
    PartitionRouting(String),
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("Directory creation error: {0}")]
    DirectoryCreation(String),
}

impl StoreError {
    /// Routing failures are data-model errors and abort the run; they must
    /// never be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::PartitionRouting(_) | StoreError::Connection(_) | StoreError::ConstraintViolation(_)
        )
    }
}
