//! Snapshot of a watched tree and the diff that drives incremental sync.
//!
//! A diff never commits file changes by itself: it returns them in walk
//! order and the caller calls [`Snapshot::commit`] for each one it actually
//! delivered. A change that is not committed is seen again on the next
//! cycle. Directories are recorded but never reported.

use std::collections::{BTreeMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tether_core::{portable_path, ChangeStatus};

use crate::error::{io_err, SyncError};
use crate::ignore::IgnoreSet;
use crate::{perm, walk};

/// Metadata remembered per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryMeta {
    pub modified: SystemTime,
    pub mode: u32,
    pub is_dir: bool,
}

impl EntryMeta {
    pub fn from_metadata(meta: &Metadata) -> std::io::Result<Self> {
        Ok(Self {
            modified: meta.modified()?,
            mode: perm::mode_bits(meta),
            is_dir: meta.is_dir(),
        })
    }

    /// Strictly newer mtime or any mode change.
    fn changed_since(&self, previous: &EntryMeta) -> bool {
        self.modified > previous.modified || self.mode != previous.mode
    }
}

/// A pending file-level change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub status: ChangeStatus,
    /// Path relative to the snapshot root.
    pub rel: PathBuf,
    /// Absolute path on disk.
    pub path: PathBuf,
    /// Metadata observed for create/update; `None` for delete.
    pub meta: Option<EntryMeta>,
}

impl Change {
    /// `rel` with `/` separators, as sent over the wire.
    pub fn portable_path(&self) -> String {
        portable_path(&self.rel)
    }
}

/// Last observed metadata for every non-ignored path under a root.
#[derive(Debug, Clone)]
pub struct Snapshot {
    root: PathBuf,
    entries: BTreeMap<PathBuf, EntryMeta>,
}

impl Snapshot {
    /// Walk `root` once and record everything not ignored.
    pub fn scan(root: &Path, ignores: &IgnoreSet) -> Result<Self, SyncError> {
        let mut snapshot = Self {
            root: root.to_path_buf(),
            entries: BTreeMap::new(),
        };
        for entry in walk::tree(root, ignores) {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }
            let Some(meta) = snapshot.observe(entry.path())? else {
                continue;
            };
            let rel = snapshot.relative(entry.path());
            snapshot.entries.insert(rel, meta);
        }
        tracing::debug!(
            "initial scan of {} recorded {} entries",
            root.display(),
            snapshot.entries.len()
        );
        Ok(snapshot)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rel: &Path) -> Option<&EntryMeta> {
        self.entries.get(rel)
    }

    pub fn contains(&self, rel: &Path) -> bool {
        self.entries.contains_key(rel)
    }

    /// Compare the tree against the snapshot.
    ///
    /// Ignored paths (and their descendants) are purged without producing
    /// deletes. Returns creates and updates in walk order, followed by
    /// deletes in path order.
    pub fn diff(&mut self, ignores: &IgnoreSet) -> Result<Vec<Change>, SyncError> {
        let root = self.root.clone();
        let before = self.entries.len();
        self.entries.retain(|rel, _| !ignores.excludes(&root.join(rel)));
        if self.entries.len() != before {
            tracing::debug!(
                "purged {} newly ignored entries under {}",
                before - self.entries.len(),
                root.display()
            );
        }

        let mut visited = HashSet::new();
        let mut changes = Vec::new();

        for entry in walk::tree(&root, ignores) {
            let entry = entry?;
            if entry.depth() == 0 {
                continue;
            }
            let Some(meta) = self.observe(entry.path())? else {
                continue;
            };
            let rel = self.relative(entry.path());

            let status = match self.entries.get(&rel) {
                None => Some(ChangeStatus::Create),
                Some(previous) if meta.changed_since(previous) => Some(ChangeStatus::Update),
                Some(_) => None,
            };
            visited.insert(rel.clone());

            match status {
                Some(status) if !meta.is_dir => changes.push(Change {
                    status,
                    path: entry.path().to_path_buf(),
                    rel,
                    meta: Some(meta),
                }),
                _ => {
                    self.entries.insert(rel, meta);
                }
            }
        }

        let missing: Vec<PathBuf> = self
            .entries
            .keys()
            .filter(|rel| !visited.contains(*rel))
            .cloned()
            .collect();
        for rel in missing {
            let is_dir = self.entries.get(&rel).map(|m| m.is_dir).unwrap_or(false);
            if is_dir {
                self.entries.remove(&rel);
                continue;
            }
            changes.push(Change {
                status: ChangeStatus::Delete,
                path: root.join(&rel),
                rel,
                meta: None,
            });
        }

        Ok(changes)
    }

    /// Record a delivered change.
    pub fn commit(&mut self, change: &Change) {
        match (change.status, change.meta) {
            (ChangeStatus::Delete, _) | (_, None) => {
                self.entries.remove(&change.rel);
            }
            (_, Some(meta)) => {
                self.entries.insert(change.rel.clone(), meta);
            }
        }
    }

    fn relative(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf())
    }

    /// lstat `path`; `None` if it disappeared since the walk listed it.
    fn observe(&self, path: &Path) -> Result<Option<EntryMeta>, SyncError> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_err(path, err)),
        };
        EntryMeta::from_metadata(&meta)
            .map(Some)
            .map_err(|e| io_err(path, e))
    }
}
