//! At-most-one-run guard shared across processes through a lock file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another run holds {path} (pid {}, since {since})", describe_pid(.pid))]
    Held {
        path: PathBuf,
        pid: Option<u32>,
        since: DateTime<Utc>,
    },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_pid(pid: &Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |p| p.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held for the duration of a run; the file is removed on drop if it is still ours.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    info: LockInfo,
}

impl RunLock {
    /// Take the lock. A lock older than `stale_after` is replaced. The age of a
    /// lock whose contents can't be read (e.g. one being written right now) comes
    /// from the file's modification time.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, LockError> {
        let io = |source: std::io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        match Self::create(path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(io(e)),
        }

        let existing = read_info(path);
        let since = match &existing {
            Some(info) => info.acquired_at,
            None => match std::fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                // Released between our attempt and now.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::create_or_held(path),
                Err(e) => return Err(io(e)),
            },
        };

        let age = Utc::now().signed_duration_since(since);
        let fresh = age.to_std().map(|a| a < stale_after).unwrap_or(true);
        if fresh {
            return Err(LockError::Held {
                path: path.to_path_buf(),
                pid: existing.map(|i| i.pid),
                since,
            });
        }

        tracing::warn!(
            path = %path.display(),
            pid = existing.as_ref().map(|i| i.pid),
            since = %since.to_rfc3339(),
            "replacing stale run lock"
        );
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io(e)),
        }
        let lock = Self::create_or_held(path)?;

        // Another process may have raced the takeover and replaced our file.
        match read_info(path) {
            Some(info) if info == lock.info => Ok(lock),
            other => Err(LockError::Held {
                path: path.to_path_buf(),
                pid: other.as_ref().map(|i| i.pid),
                since: other.map_or_else(Utc::now, |i| i.acquired_at),
            }),
        }
    }

    fn create_or_held(path: &Path) -> Result<Self, LockError> {
        match Self::create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_info(path);
                Err(LockError::Held {
                    path: path.to_path_buf(),
                    pid: holder.as_ref().map(|i| i.pid),
                    since: holder.map_or_else(Utc::now, |i| i.acquired_at),
                })
            }
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn create(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let encoded = serde_json::to_vec(&info).map_err(std::io::Error::other)?;
        file.write_all(&encoded)?;
        Ok(Self {
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_info(path: &Path) -> Option<LockInfo> {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if read_info(&self.path).as_ref() != Some(&self.info) {
            tracing::warn!(path = %self.path.display(), "run lock was taken over, leaving it in place");
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove run lock");
        }
    }
}
