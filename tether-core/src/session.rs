//! Session file: which local directories sync to which services.
//!
//! # Layout
//!
//! ```text
//! <app>/
//!   tether.yaml      (session: settings + service list)
//!   web/             (a watched path)
//!     .tetherignore  (optional, per watched root)
//! ```
//!
//! # API pattern
//!
//! - `load_at(path)` / `save_at(path, …)` take an explicit file path.
//! - `discover_from(dir)` walks up from `dir` looking for [`SESSION_FILE`].
//!
//! Settings are resolved here once and handed to the engine explicitly; the
//! engine never reads configuration on its own.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SessionError};
use crate::types::Service;

/// File name looked up by [`discover_from`].
pub const SESSION_FILE: &str = "tether.yaml";

/// How many directories above the start directory discovery will look.
pub const DISCOVERY_DEPTH: usize = 5;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub poll_interval_ms: u64,
    pub bootstrap_attempts: u32,
    pub bootstrap_retry_delay_ms: u64,
    pub health_attempts: u32,
    pub health_retry_delay_ms: u64,
    /// Upper bound on a single HTTP request to a satellite, upload included.
    pub request_timeout_ms: u64,
    /// Where bootstrap archives are staged before upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            bootstrap_attempts: 1000,
            bootstrap_retry_delay_ms: 50,
            health_attempts: 1000,
            health_retry_delay_ms: 8,
            request_timeout_ms: 300_000,
            staging_dir: None,
        }
    }
}

impl SyncSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn bootstrap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.bootstrap_retry_delay_ms)
    }

    pub fn health_retry_delay(&self) -> Duration {
        Duration::from_millis(self.health_retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Configured staging dir, else `<cache>/tether`, else `<tmp>/tether`.
    pub fn staging_dir(&self) -> PathBuf {
        if let Some(dir) = &self.staging_dir {
            return dir.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("tether")
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One service plus the local directory bound to it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    #[serde(flatten)]
    pub service: Service,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Root of `tether.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub settings: SyncSettings,
    #[serde(default)]
    pub services: Vec<SessionEntry>,
}

impl Session {
    /// Entries with a bound path, with relative paths resolved against `base`.
    pub fn bindings(&self, base: &Path) -> Vec<(PathBuf, Service)> {
        self.services
            .iter()
            .filter_map(|entry| {
                let path = entry.path.as_ref()?;
                let path = if path.is_relative() {
                    base.join(path)
                } else {
                    path.clone()
                };
                Some((path, entry.service.clone()))
            })
            .collect()
    }

    fn validate(&self, path: &Path) -> Result<(), SessionError> {
        let mut seen = HashSet::new();
        for entry in &self.services {
            if entry.service.name.0.trim().is_empty() {
                return Err(SessionError::Invalid {
                    path: path.to_path_buf(),
                    reason: "service with empty name".to_string(),
                });
            }
            if !seen.insert(&entry.service.name) {
                return Err(SessionError::Invalid {
                    path: path.to_path_buf(),
                    reason: format!("duplicate service name '{}'", entry.service.name),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate a session file.
///
/// Returns `SessionError::NotFound` if absent and `SessionError::Parse`
/// (with path + line context) if the YAML is malformed.
pub fn load_at(path: &Path) -> Result<Session, SessionError> {
    if !path.exists() {
        return Err(SessionError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Session::default());
    }
    let session: Session = serde_yaml::from_str(&contents).map_err(|e| SessionError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    session.validate(path)?;
    Ok(session)
}

/// Find [`SESSION_FILE`] in `start` or one of its parents.
pub fn discover_from(start: &Path) -> Result<PathBuf, SessionError> {
    let mut dir = Some(start);
    for _ in 0..DISCOVERY_DEPTH {
        let Some(current) = dir else { break };
        let candidate = current.join(SESSION_FILE);
        match std::fs::symlink_metadata(&candidate) {
            Ok(_) => return Ok(candidate),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(candidate, err)),
        }
        dir = current.parent();
    }
    Err(SessionError::NotFound {
        path: start.join(SESSION_FILE),
    })
}

/// Save a session atomically: write `<path>.tmp`, then rename over `path`.
pub fn save_at(path: &Path, session: &Session) -> Result<(), SessionError> {
    session.validate(path)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(session)?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
