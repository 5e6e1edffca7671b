use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use super::{JobError, JobRunner, JobSummary};
use crate::process::run_to_completion;
use crate::store::LocalDataStore;

/// Env var telling the external job where the data store lives.
pub const DATA_DIR_ENV: &str = "FEEDPIPE_DATA_DIR";

/// Runs an external processing script, e.g. `python3 main.py`.
pub struct CommandJob {
    argv: Vec<String>,
    repo_dir: PathBuf,
    timeout: Duration,
}

impl CommandJob {
    pub fn new(argv: Vec<String>, repo_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            argv,
            repo_dir,
            timeout,
        }
    }
}

#[async_trait]
impl JobRunner for CommandJob {
    async fn run(&self, store: &LocalDataStore) -> Result<JobSummary, JobError> {
        let data_dir = store.root().to_string_lossy().into_owned();
        tracing::info!(command = %self.argv.join(" "), "running job command");
        run_to_completion(
            &self.argv,
            &self.repo_dir,
            &[(DATA_DIR_ENV, data_dir.as_str())],
            self.timeout,
        )
        .await?;
        Ok(JobSummary::default())
    }
}
