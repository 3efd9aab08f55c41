//! Sorted, ignore-aware traversal shared by the archiver and the snapshot.

use std::io::ErrorKind;
use std::path::Path;

use walkdir::{DirEntry, WalkDir};

use crate::error::SyncError;
use crate::ignore::IgnoreSet;

/// Walk `root` in lexical order, directories before their children.
///
/// Ignored paths are pruned together with everything below them. Symlinks
/// are reported but never followed. Entries that vanish between listing and
/// stat are dropped; any other failure is returned.
pub fn tree<'a>(
    root: &'a Path,
    ignores: &'a IgnoreSet,
) -> impl Iterator<Item = Result<DirEntry, SyncError>> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| !ignores.contains(entry.path()))
        .filter_map(move |entry| match entry {
            Ok(entry) => Some(Ok(entry)),
            Err(err)
                if err.depth() > 0
                    && err.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound) =>
            {
                tracing::debug!("entry vanished during walk: {err}");
                None
            }
            Err(err) => Some(Err(SyncError::Walk {
                root: root.to_path_buf(),
                source: err,
            })),
        })
}
