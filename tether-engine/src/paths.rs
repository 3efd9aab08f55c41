use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tether_core::ServiceName;

pub const UPLOAD_SUFFIX: &str = "_upload.tgz";

/// Staging file for one watcher's bootstrap archive.
///
/// `<staging>/<service>-<pid>-<seq>_upload.tgz`; the pid and per-syncer
/// sequence keep concurrent watchers and sessions apart.
pub fn upload_artifact(staging_dir: &Path, service: &ServiceName, seq: usize) -> PathBuf {
    let safe: String = service
        .0
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    staging_dir.join(format!(
        "{safe}-{}-{seq}{UPLOAD_SUFFIX}",
        std::process::id()
    ))
}

/// Remove a staging file; a missing file counts as removed.
pub fn remove_artifact(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}
