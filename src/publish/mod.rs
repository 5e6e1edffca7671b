pub mod git;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::store::ChangeSet;

pub use git::GitStore;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`git {command}` exited with {status}: {stderr}")]
    Git {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("push rejected: {0}")]
    PushRejected(String),
}

/// Secret value (push token, sink token). Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Replace every occurrence of the secret in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "***")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Commit author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub remote: String,
    pub branch: String,
}

/// Version-controlled store the publisher writes to. Paths are relative to the repository root.
#[async_trait]
pub trait VersionedStore: Send + Sync {
    async fn is_tracked(&self, path: &Path) -> Result<bool, PublishError>;
    async fn stage(&self, paths: &[PathBuf]) -> Result<(), PublishError>;
    async fn has_staged_changes(&self, paths: &[PathBuf]) -> Result<bool, PublishError>;
    /// Commit exactly `paths`; returns the new commit id.
    async fn commit(&self, message: &str, author: &Identity, paths: &[PathBuf]) -> Result<String, PublishError>;
    async fn push(&self, target: &PushTarget, credential: Option<&Credential>) -> Result<(), PublishError>;
}

/// One commit's worth of changes.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub message: String,
    pub changes: ChangeSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    NoChanges,
    /// Publishing disabled for this run; `pending` paths were left uncommitted.
    Skipped { pending: usize },
    Published { commits: Vec<String> },
    CommitFailed { reason: String },
    /// Commits were made locally but the remote refused them.
    PushRejected { commits: Vec<String>, reason: String },
}

impl PublishOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            PublishOutcome::CommitFailed { .. } | PublishOutcome::PushRejected { .. }
        )
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::NoChanges => write!(f, "no changes"),
            PublishOutcome::Skipped { pending } => write!(f, "skipped ({} pending paths)", pending),
            PublishOutcome::Published { commits } => write!(f, "published {} commit(s)", commits.len()),
            PublishOutcome::CommitFailed { reason } => write!(f, "commit failed: {}", reason),
            PublishOutcome::PushRejected { commits, reason } => {
                write!(f, "push rejected after {} commit(s): {}", commits.len(), reason)
            }
        }
    }
}

/// Commits change sets under the data directory and pushes them once.
pub struct Publisher {
    store: Arc<dyn VersionedStore>,
    /// Data directory relative to the repository root.
    data_prefix: PathBuf,
    author: Identity,
    target: PushTarget,
    credential: Option<Credential>,
}

impl Publisher {
    pub fn new(
        store: Arc<dyn VersionedStore>,
        data_prefix: impl Into<PathBuf>,
        author: Identity,
        target: PushTarget,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            store,
            data_prefix: data_prefix.into(),
            author,
            target,
            credential,
        }
    }

    /// Whether a data-store path (relative to the store root) is tracked.
    pub async fn is_tracked(&self, path: &Path) -> Result<bool, PublishError> {
        self.store.is_tracked(&self.data_prefix.join(path)).await
    }

    pub async fn publish(&self, requests: Vec<PublishRequest>) -> PublishOutcome {
        let mut commits = Vec::new();

        for request in requests {
            if request.changes.is_empty() {
                continue;
            }
            let paths: Vec<PathBuf> = request
                .changes
                .paths()
                .into_iter()
                .map(|p| self.data_prefix.join(p))
                .collect();

            match self.commit_paths(&request.message, &paths).await {
                Ok(Some(id)) => {
                    tracing::info!(commit = %id, paths = paths.len(), message = %request.message, "committed");
                    commits.push(id);
                }
                Ok(None) => {
                    tracing::info!(message = %request.message, "nothing staged, skipping commit");
                }
                Err(e) => {
                    let reason = self.redact(&e.to_string());
                    tracing::warn!(error = %reason, "commit failed");
                    if commits.is_empty() {
                        return PublishOutcome::CommitFailed { reason };
                    }
                    return PublishOutcome::PushRejected {
                        commits,
                        reason: format!("not pushed after commit failure: {}", reason),
                    };
                }
            }
        }

        if commits.is_empty() {
            tracing::info!("nothing to publish");
            return PublishOutcome::NoChanges;
        }

        match self.store.push(&self.target, self.credential.as_ref()).await {
            Ok(()) => {
                tracing::info!(
                    remote = %self.target.remote,
                    branch = %self.target.branch,
                    commits = commits.len(),
                    "pushed"
                );
                PublishOutcome::Published { commits }
            }
            Err(e) => {
                let reason = self.redact(&e.to_string());
                tracing::warn!(
                    remote = %self.target.remote,
                    branch = %self.target.branch,
                    error = %reason,
                    "push rejected, commits remain local"
                );
                PublishOutcome::PushRejected { commits, reason }
            }
        }
    }

    async fn commit_paths(&self, message: &str, paths: &[PathBuf]) -> Result<Option<String>, PublishError> {
        self.store.stage(paths).await?;
        if !self.store.has_staged_changes(paths).await? {
            return Ok(None);
        }
        let id = self.store.commit(message, &self.author, paths).await?;
        Ok(Some(id))
    }

    fn redact(&self, text: &str) -> String {
        match &self.credential {
            Some(c) => c.redact(text),
            None => text.to_string(),
        }
    }
}
