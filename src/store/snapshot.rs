use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::StoreError;

/// Content digests of every file under a directory, keyed by path relative to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, [u8; 32]>,
}

impl Snapshot {
    /// Walk `root` and hash each regular file. A missing root is an empty snapshot.
    pub fn capture(root: &Path) -> Result<Self, StoreError> {
        let mut files = BTreeMap::new();
        if !root.exists() {
            return Ok(Self { files });
        }

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry.map_err(|e| StoreError::Walk {
                path: root.to_path_buf(),
                source: e,
            })?;
            if !entry.file_type().is_file() || is_temp_file(entry.path()) {
                continue;
            }
            let bytes = std::fs::read(entry.path()).map_err(|e| StoreError::io(entry.path(), e))?;
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.insert(rel, Sha256::digest(&bytes).into());
        }
        Ok(Self { files })
    }

    #[cfg(test)]
    pub(crate) fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Self {
        let files = entries
            .into_iter()
            .map(|(p, bytes)| (PathBuf::from(p), Sha256::digest(bytes).into()))
            .collect();
        Self { files }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
}

/// Paths that differ between two snapshots, each list sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Every touched path, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.removed)
            .cloned()
            .collect();
        all.sort();
        all
    }

    pub fn single_added(path: impl Into<PathBuf>) -> Self {
        Self {
            added: vec![path.into()],
            ..Self::default()
        }
    }
}

/// Compare two snapshots of the same directory.
pub fn diff(before: &Snapshot, after: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for (path, digest) in &after.files {
        match before.files.get(path) {
            None => changes.added.push(path.clone()),
            Some(old) if old != digest => changes.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    for path in before.files.keys() {
        if !after.files.contains_key(path) {
            changes.removed.push(path.clone());
        }
    }
    changes
}
