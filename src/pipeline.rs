//! One pipeline run: lock, prepare, execute, diff, publish.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::job::{JobError, JobRunner, JobSummary};
use crate::lock::{LockError, RunLock};
use crate::prepare::{EnvironmentPreparer, PrepareError};
use crate::publish::{PublishOutcome, PublishRequest, Publisher};
use crate::schedule::Trigger;
use crate::store::{diff, ChangeSet, LocalDataStore, StoreError};

const DEFAULT_COMMIT_MESSAGE: &str = "Update RSS feed data";
const DEFAULT_BOOTSTRAP_MESSAGE: &str = "Initialize data directory";

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Preparing,
    Running,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Preparing => "preparing",
            Stage::Running => "running",
            Stage::Publishing => "publishing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("another run is in progress ({0})")]
    AlreadyRunning(#[source] LockError),

    #[error("run lock: {0}")]
    Lock(#[source] LockError),

    #[error("environment setup failed: {0}")]
    Setup(#[from] PrepareError),

    #[error("could not initialize data store: {0}")]
    Bootstrap(#[source] StoreError),

    #[error("could not snapshot data store: {0}")]
    Snapshot(#[source] StoreError),

    #[error("job failed: {0}")]
    Execution(#[from] JobError),
}

impl From<LockError> for PipelineError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Held { .. } => PipelineError::AlreadyRunning(e),
            LockError::Io { .. } => PipelineError::Lock(e),
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub trigger: Trigger,
    pub job: JobSummary,
    pub changes: ChangeSet,
    pub publish: PublishOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// 0 on success; 2 when `strict` and publishing only partially succeeded.
    pub fn exit_code(&self, strict: bool) -> i32 {
        if strict && self.publish.is_warning() {
            2
        } else {
            0
        }
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

pub struct Pipeline {
    preparer: Box<dyn EnvironmentPreparer>,
    job: Box<dyn JobRunner>,
    store: LocalDataStore,
    publisher: Option<Publisher>,
    lock: Option<(PathBuf, Duration)>,
    commit_message: String,
    bootstrap_message: String,
}

impl Pipeline {
    pub fn new(preparer: Box<dyn EnvironmentPreparer>, job: Box<dyn JobRunner>, store: LocalDataStore) -> Self {
        Self {
            preparer,
            job,
            store,
            publisher: None,
            lock: None,
            commit_message: DEFAULT_COMMIT_MESSAGE.to_string(),
            bootstrap_message: DEFAULT_BOOTSTRAP_MESSAGE.to_string(),
        }
    }

    /// Without a publisher, change sets are left in the working tree.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_lock(mut self, path: PathBuf, stale_after: Duration) -> Self {
        self.lock = Some((path, stale_after));
        self
    }

    pub fn with_messages(mut self, commit: impl Into<String>, bootstrap: impl Into<String>) -> Self {
        self.commit_message = commit.into();
        self.bootstrap_message = bootstrap.into();
        self
    }

    pub fn store(&self) -> &LocalDataStore {
        &self.store
    }

    pub async fn run(&self, trigger: Trigger) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();
        let mut stage = Stage::Idle;
        tracing::info!(%trigger, "pipeline run starting");

        let result = self.run_stages(&mut stage, trigger, started_at).await;
        match &result {
            Ok(report) => {
                advance(&mut stage, Stage::Done);
                tracing::info!(
                    new_items = report.job.new_items,
                    changed = report.changes.len(),
                    publish = %report.publish,
                    elapsed_ms = report.elapsed().num_milliseconds(),
                    "pipeline run finished"
                );
            }
            Err(e) => {
                let failed_in = stage;
                advance(&mut stage, Stage::Failed);
                tracing::error!(stage = %failed_in, error = %e, "pipeline run failed");
            }
        }
        result
    }

    async fn run_stages(
        &self,
        stage: &mut Stage,
        trigger: Trigger,
        started_at: DateTime<Utc>,
    ) -> Result<RunReport, PipelineError> {
        let _lock = match &self.lock {
            Some((path, stale_after)) => Some(RunLock::acquire(path, *stale_after)?),
            None => None,
        };

        advance(stage, Stage::Preparing);
        let prepared = self.preparer.prepare().await?;
        if let Some(manifest) = &prepared.manifest {
            tracing::debug!(manifest = %manifest.display(), "environment ready");
        }

        // The store is only touched once setup has succeeded.
        let created = self.store.ensure().map_err(PipelineError::Bootstrap)?;
        let bootstrap = self.needs_bootstrap(created).await;
        let before = self.store.snapshot().map_err(PipelineError::Snapshot)?;

        advance(stage, Stage::Running);
        let job = match self.job.run(&self.store).await {
            Ok(summary) => summary,
            Err(e) => {
                // Nothing is published, but the directory still has to survive.
                if let Err(ensure_err) = self.store.ensure() {
                    tracing::warn!(error = %ensure_err, "could not restore data store after job failure");
                }
                return Err(e.into());
            }
        };

        // The job may have removed the directory; the placeholder comes back either way.
        self.store.ensure().map_err(PipelineError::Bootstrap)?;
        let after = self.store.snapshot().map_err(PipelineError::Snapshot)?;
        let changes = diff(&before, &after);
        tracing::info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "data store diff"
        );

        advance(stage, Stage::Publishing);
        let mut requests = Vec::with_capacity(2);
        if bootstrap {
            requests.push(PublishRequest {
                message: self.bootstrap_message.clone(),
                changes: ChangeSet::single_added(self.store.placeholder()),
            });
        }
        requests.push(PublishRequest {
            message: self.commit_message.clone(),
            changes: changes.clone(),
        });

        let publish = match &self.publisher {
            Some(publisher) => publisher.publish(requests).await,
            None => {
                let pending: usize = requests.iter().map(|r| r.changes.len()).sum();
                if pending == 0 {
                    PublishOutcome::NoChanges
                } else {
                    tracing::info!(pending, "publishing disabled, leaving changes uncommitted");
                    PublishOutcome::Skipped { pending }
                }
            }
        };
        if publish.is_warning() {
            tracing::warn!(outcome = %publish, "publish did not complete");
        }

        Ok(RunReport {
            trigger,
            job,
            changes,
            publish,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// A freshly created or untracked placeholder gets its own commit.
    async fn needs_bootstrap(&self, created: bool) -> bool {
        let Some(publisher) = &self.publisher else {
            return created;
        };
        if created {
            return true;
        }
        match publisher.is_tracked(self.store.placeholder()).await {
            Ok(tracked) => !tracked,
            Err(e) => {
                tracing::warn!(error = %e, "could not check placeholder tracking, assuming untracked");
                true
            }
        }
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    tracing::info!(from = %stage, to = %next, "stage transition");
    *stage = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prepare::{NoopPreparer, PrepareReport};
    use crate::process::CommandError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct WriteFile {
        name: &'static str,
        body: &'static str,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobRunner for WriteFile {
        async fn run(&self, store: &LocalDataStore) -> Result<JobSummary, JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(store.root().join(self.name), self.body).unwrap();
            Ok(JobSummary::default())
        }
    }

    struct FailingPreparer;

    #[async_trait]
    impl EnvironmentPreparer for FailingPreparer {
        async fn prepare(&self) -> Result<PrepareReport, PrepareError> {
            Err(PrepareError::Install(CommandError::Empty))
        }
    }

    fn job(calls: &Arc<AtomicUsize>) -> Box<WriteFile> {
        Box::new(WriteFile {
            name: "output.json",
            body: "{}\n",
            calls: calls.clone(),
        })
    }

    #[tokio::test]
    async fn test_unpublished_run_reports_pending() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let store = LocalDataStore::new(tmp.path().join("data"), ".gitkeep");
        let pipeline = Pipeline::new(Box::new(NoopPreparer), job(&calls), store);

        let report = pipeline.run(Trigger::Manual).await.unwrap();
        // Placeholder bootstrap plus output.json.
        assert_eq!(report.publish, PublishOutcome::Skipped { pending: 2 });
        assert_eq!(report.changes.added, vec![PathBuf::from("output.json")]);
        assert_eq!(report.exit_code(true), 0);

        let again = pipeline.run(Trigger::Manual).await.unwrap();
        assert_eq!(again.publish, PublishOutcome::NoChanges);
        assert!(again.changes.is_empty());
    }

    #[tokio::test]
    async fn test_setup_failure_skips_job_and_store() {
        let tmp = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let store = LocalDataStore::new(tmp.path().join("data"), ".gitkeep");
        let pipeline = Pipeline::new(Box::new(FailingPreparer), job(&calls), store);

        let err = pipeline.run(Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, PipelineError::Setup(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!tmp.path().join("data").exists());
    }

    struct WipeAndFail;

    #[async_trait]
    impl JobRunner for WipeAndFail {
        async fn run(&self, store: &LocalDataStore) -> Result<JobSummary, JobError> {
            std::fs::remove_dir_all(store.root()).unwrap();
            Err(JobError::Command(CommandError::Empty))
        }
    }

    #[tokio::test]
    async fn test_store_restored_after_job_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let store = LocalDataStore::new(tmp.path().join("data"), ".gitkeep");
        let pipeline = Pipeline::new(Box::new(NoopPreparer), Box::new(WipeAndFail), store);

        let err = pipeline.run(Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, PipelineError::Execution(_)));
        assert!(tmp.path().join("data/.gitkeep").is_file());
    }

    #[tokio::test]
    async fn test_held_lock_is_already_running() {
        let tmp = tempfile::tempdir().unwrap();
        let lock_path = tmp.path().join(".feedpipe.lock");
        let _held = RunLock::acquire(&lock_path, Duration::from_secs(3600)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let store = LocalDataStore::new(tmp.path().join("data"), ".gitkeep");
        let pipeline = Pipeline::new(Box::new(NoopPreparer), job(&calls), store)
            .with_lock(lock_path, Duration::from_secs(3600));

        let err = pipeline.run(Trigger::Manual).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exit_code_strict_only_on_warning() {
        let report = RunReport {
            trigger: Trigger::Manual,
            job: JobSummary::default(),
            changes: ChangeSet::default(),
            publish: PublishOutcome::PushRejected {
                commits: vec!["abc".into()],
                reason: "rejected".into(),
            },
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        assert_eq!(report.exit_code(false), 0);
        assert_eq!(report.exit_code(true), 2);
    }
}
