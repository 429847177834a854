// Typed errors at the library boundary.
// Repository plumbing stays on anyhow; callers match on these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),

    #[error("Stored {created} transactions before failing: {source}")]
    PartialSubmit {
        created: usize,
        #[source]
        source: Box<StoreError>,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug, PartialEq)]
pub enum PreviewError {
    #[error("No transaction group at index {0}")]
    GroupOutOfRange(usize),

    #[error("Group {0} is already stored and cannot be assigned")]
    DuplicateGroup(usize),

    #[error("Job {0} does not accept this kind of transaction")]
    IneligibleJob(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid sales tax percentage: {0}")]
    InvalidSalesTax(String),

    #[error("Settings storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
