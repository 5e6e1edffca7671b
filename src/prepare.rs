//! Environment preparation: install the declared dependency manifest before the job runs.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::PrepareConfig;
use crate::process::{run_to_completion, CommandError};

#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error("dependency manifest not found: {0}")]
    ManifestMissing(PathBuf),

    #[error("dependency install failed: {0}")]
    Install(#[from] CommandError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    pub manifest: Option<PathBuf>,
    pub elapsed: Duration,
}

#[async_trait]
pub trait EnvironmentPreparer: Send + Sync {
    async fn prepare(&self) -> Result<PrepareReport, PrepareError>;
}

/// Nothing to install.
pub struct NoopPreparer;

#[async_trait]
impl EnvironmentPreparer for NoopPreparer {
    async fn prepare(&self) -> Result<PrepareReport, PrepareError> {
        Ok(PrepareReport {
            manifest: None,
            elapsed: Duration::ZERO,
        })
    }
}

/// Runs the installer with the manifest path appended, e.g. `python3 -m pip install -r requirements.txt`.
pub struct CommandPreparer {
    install_command: Vec<String>,
    manifest: PathBuf,
    repo_dir: PathBuf,
    timeout: Duration,
}

impl CommandPreparer {
    pub fn new(config: &PrepareConfig, manifest: PathBuf, repo_dir: PathBuf) -> Self {
        Self {
            install_command: config.install_command.clone(),
            manifest,
            repo_dir,
            timeout: Duration::from_secs(config.timeout_s),
        }
    }

    /// Build from config; `NoopPreparer` when no manifest is declared.
    pub fn from_config(config: &PrepareConfig, repo_dir: PathBuf) -> Box<dyn EnvironmentPreparer> {
        match &config.manifest {
            Some(manifest) => Box::new(Self::new(config, manifest.clone(), repo_dir)),
            None => Box::new(NoopPreparer),
        }
    }
}

#[async_trait]
impl EnvironmentPreparer for CommandPreparer {
    async fn prepare(&self) -> Result<PrepareReport, PrepareError> {
        let manifest_path = self.repo_dir.join(&self.manifest);
        if !manifest_path.is_file() {
            return Err(PrepareError::ManifestMissing(manifest_path));
        }

        let mut argv = self.install_command.clone();
        argv.push(self.manifest.to_string_lossy().into_owned());

        tracing::info!(manifest = %self.manifest.display(), installer = %argv[0], "installing dependencies");
        let started = Instant::now();
        run_to_completion(&argv, &self.repo_dir, &[], self.timeout).await?;

        let elapsed = started.elapsed();
        tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "dependencies installed");
        Ok(PrepareReport {
            manifest: Some(self.manifest.clone()),
            elapsed,
        })
    }
}
