pub mod snapshot;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub use snapshot::{diff, ChangeSet, Snapshot};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Whether a write actually changed the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

/// The on-disk directory that accumulates job output between runs.
///
/// The directory always holds a zero-byte placeholder so that it survives
/// in version control when it has no other content.
#[derive(Debug, Clone)]
pub struct LocalDataStore {
    root: PathBuf,
    placeholder: String,
}

impl LocalDataStore {
    pub fn new(root: impl Into<PathBuf>, placeholder: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            placeholder: placeholder.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Placeholder path relative to the store root.
    pub fn placeholder(&self) -> &Path {
        Path::new(&self.placeholder)
    }

    /// Create the directory and placeholder if missing. Returns true if the
    /// placeholder had to be created.
    pub fn ensure(&self) -> Result<bool, StoreError> {
        std::fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let placeholder = self.root.join(&self.placeholder);
        if placeholder.is_file() {
            return Ok(false);
        }
        std::fs::write(&placeholder, b"").map_err(|e| StoreError::io(&placeholder, e))?;
        tracing::info!(path = %placeholder.display(), "created data store placeholder");
        Ok(true)
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Snapshot::capture(&self.root)
    }

    /// Read a JSON state file. `Ok(None)` when it does not exist yet.
    pub fn read_state<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.root.join(name);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.clone(),
            source,
        })?;
        Ok(Some(value))
    }

    /// Write a JSON state file through a temp file and rename. Identical
    /// content leaves the file untouched.
    pub fn write_state<T: Serialize>(&self, name: &str, value: &T) -> Result<WriteOutcome, StoreError> {
        let mut encoded = serde_json::to_vec_pretty(value)?;
        encoded.push(b'\n');

        let path = self.root.join(name);
        if let Ok(existing) = std::fs::read(&path) {
            if existing == encoded {
                return Ok(WriteOutcome::Unchanged);
            }
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = temp_path_for(&path);
        std::fs::write(&tmp, &encoded).map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(StoreError::io(&path, e));
        }
        Ok(WriteOutcome::Written)
    }
}

/// `dir/name` -> `dir/.name.tmp`
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
