//! In-process stand-in for a satellite, driven entirely by the test.
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tether_core::{ChangeStatus, Service, SyncSettings};
use tether_engine::{Endpoint, EngineError, FileTransfer, Transport};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub status: ChangeStatus,
    pub path: String,
    pub content: Option<String>,
}

#[derive(Default)]
pub struct FakeSatellite {
    /// Bootstrap attempts left to refuse before accepting.
    refusals: AtomicUsize,
    refuse_forever: bool,
    reject_transfers: bool,
    /// Paths deleted from disk just before the transfer reads them.
    vanish: Mutex<HashSet<String>>,
    /// Paths whose source cannot be read.
    deny: Mutex<HashSet<String>>,
    /// Every path a transfer was attempted for, in order.
    pub attempted: Mutex<Vec<String>>,
    pub bootstraps: AtomicUsize,
    pub received: Mutex<Vec<Received>>,
}

impl FakeSatellite {
    pub fn accepting() -> Self {
        Self::default()
    }

    pub fn refusing(times: usize) -> Self {
        Self {
            refusals: AtomicUsize::new(times),
            ..Self::default()
        }
    }

    pub fn never_up() -> Self {
        Self {
            refuse_forever: true,
            ..Self::default()
        }
    }

    pub fn rejecting_transfers() -> Self {
        Self {
            reject_transfers: true,
            ..Self::default()
        }
    }

    pub fn vanish(&self, path: &str) {
        self.vanish.lock().unwrap().insert(path.to_string());
    }

    pub fn deny(&self, path: &str) {
        self.deny.lock().unwrap().insert(path.to_string());
    }

    pub fn attempts_for(&self, path: &str) -> usize {
        self.attempted
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == path)
            .count()
    }

    pub fn bootstrap_count(&self) -> usize {
        self.bootstraps.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

fn refused(service: &Service) -> EngineError {
    EngineError::SyncUnavailable {
        address: service.address.clone(),
    }
}

impl Transport for FakeSatellite {
    async fn check_health(&self, _service: &Service) -> Result<(), EngineError> {
        Ok(())
    }

    async fn bootstrap(&self, service: &Service, archive: &Path) -> Result<(), EngineError> {
        assert!(archive.is_file(), "bootstrap archive must be staged");
        self.bootstraps.fetch_add(1, Ordering::SeqCst);
        if self.refuse_forever {
            return Err(refused(service));
        }
        let left = self.refusals.load(Ordering::SeqCst);
        if left > 0 {
            self.refusals.store(left - 1, Ordering::SeqCst);
            return Err(refused(service));
        }
        Ok(())
    }

    async fn transfer(
        &self,
        service: &Service,
        transfer: FileTransfer<'_>,
    ) -> Result<(), EngineError> {
        self.attempted
            .lock()
            .unwrap()
            .push(transfer.path.to_string());
        let denied = self.deny.lock().unwrap().contains(transfer.path);
        if denied {
            return Err(EngineError::Io {
                path: transfer.source.unwrap_or(Path::new(transfer.path)).to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            });
        }
        if self.reject_transfers {
            return Err(EngineError::Rejected {
                endpoint: Endpoint::Incremental,
                address: service.address.clone(),
                path: Some(transfer.path.to_string()),
                status: "error".into(),
                message: "read-only filesystem".into(),
            });
        }
        let content = match transfer.source {
            Some(source) => {
                let vanished = self.vanish.lock().unwrap().remove(transfer.path);
                if vanished {
                    let _ = std::fs::remove_file(source);
                }
                let text = tokio::fs::read_to_string(source)
                    .await
                    .map_err(|source_err| EngineError::Io {
                        path: source.to_path_buf(),
                        source: source_err,
                    })?;
                Some(text)
            }
            None => None,
        };
        self.received.lock().unwrap().push(Received {
            status: transfer.status,
            path: transfer.path.to_string(),
            content,
        });
        Ok(())
    }
}

/// Fast settings with staging under `stage`.
pub fn quick_settings(stage: &Path) -> SyncSettings {
    SyncSettings {
        poll_interval_ms: 20,
        bootstrap_attempts: 1000,
        bootstrap_retry_delay_ms: 5,
        health_attempts: 3,
        health_retry_delay_ms: 5,
        request_timeout_ms: 2_000,
        staging_dir: Some(PathBuf::from(stage)),
    }
}

pub async fn recv<T>(rx: &mut mpsc::Receiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

/// Write `dest` atomically so a poll never sees it half-written.
/// `age_secs` pushes the mtime into the future to make an update visible.
pub fn put(scratch: &Path, dest: &Path, content: &str, age_secs: u64) {
    let staged = scratch.join(format!(
        "scratch-{}",
        dest.file_name().unwrap().to_string_lossy()
    ));
    std::fs::write(&staged, content).unwrap();
    if age_secs > 0 {
        let later = std::time::SystemTime::now() + Duration::from_secs(age_secs);
        filetime::set_file_mtime(&staged, filetime::FileTime::from_system_time(later)).unwrap();
    }
    std::fs::rename(&staged, dest).unwrap();
}
