pub mod command;
pub mod feeds;

use async_trait::async_trait;

use crate::process::CommandError;
use crate::sink::DeliveryReport;
use crate::store::{LocalDataStore, StoreError};

pub use command::CommandJob;
pub use feeds::FeedJob;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("data store error: {0}")]
    Store(#[from] StoreError),

    #[error("job command failed: {0}")]
    Command(#[from] CommandError),
}

/// What a job run did. External commands only report success, so their counts stay zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSummary {
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub new_items: usize,
    pub retained_items: usize,
    pub state_written: bool,
    pub delivery: Option<DeliveryReport>,
}

/// The processing step of a run. It may only write inside the data store.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, store: &LocalDataStore) -> Result<JobSummary, JobError>;
}
