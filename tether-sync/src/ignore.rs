//! Ignore resolution.
//!
//! The ignore set for a root is recomputed on every call so edits to
//! [`IGNORE_FILE`] take effect on the next poll without a restart. Patterns
//! are globs relative to the root and are expanded against the filesystem,
//! so the result only ever contains paths that exist at call time.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Component, Path, PathBuf};

use crate::error::{io_err, SyncError};

/// Always excluded: tether's own metadata dir and VCS dirs.
pub const BUILTIN_IGNORES: &[&str] = &[".tether", ".hg", ".git", ".svn", ".bzr"];

/// Per-root ignore file, one glob per line.
pub const IGNORE_FILE: &str = ".tetherignore";

/// Concrete paths excluded from watching and archiving.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreSet {
    paths: BTreeSet<PathBuf>,
}

impl IgnoreSet {
    /// `true` if `path` itself was matched.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// `true` if `path` was matched or sits below a matched directory.
    pub fn excludes(&self, path: &Path) -> bool {
        path.ancestors().any(|p| self.paths.contains(p))
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        self.paths.iter()
    }
}

impl FromIterator<PathBuf> for IgnoreSet {
    fn from_iter<I: IntoIterator<Item = PathBuf>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

/// Read user patterns from `<root>/.tetherignore`.
///
/// A missing file yields no patterns. Blank lines are skipped.
pub fn read_patterns(root: &Path) -> Result<Vec<String>, SyncError> {
    let path = root.join(IGNORE_FILE);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(path, err)),
    };

    let mut patterns = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err(&path, e))?;
        let pattern = line.trim_end();
        if pattern.trim().is_empty() {
            continue;
        }
        patterns.push(pattern.to_string());
    }
    Ok(patterns)
}

/// Resolve the ignore set for `root`: built-ins plus `.tetherignore`
/// patterns, each expanded to the paths it currently matches.
pub fn resolve(root: &Path) -> Result<IgnoreSet, SyncError> {
    let user = read_patterns(root)?;
    let patterns = BUILTIN_IGNORES
        .iter()
        .map(|p| p.to_string())
        .chain(user);

    // glob drops a leading `./` from its results while walkdir keeps it, so
    // matches are re-rooted onto `root` to compare equal to walked paths.
    let base: PathBuf = root
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let mut prefix = glob::Pattern::escape(&base.to_string_lossy());
    if !prefix.is_empty() && !prefix.ends_with(std::path::MAIN_SEPARATOR) {
        prefix.push(std::path::MAIN_SEPARATOR);
    }

    let mut paths = BTreeSet::new();
    for pattern in patterns {
        let relative = pattern.trim_start_matches(&['/', '\\'][..]);
        let full = format!("{prefix}{relative}");
        let matches = glob::glob(&full).map_err(|source| SyncError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        for matched in matches {
            let matched = matched?;
            let rel = matched.strip_prefix(&base).unwrap_or(&matched);
            paths.insert(root.join(rel));
        }
    }

    tracing::debug!("resolved {} ignored paths under {}", paths.len(), root.display());
    Ok(IgnoreSet { paths })
}
