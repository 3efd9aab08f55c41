//! One watched directory bound to one service.
//!
//! A watcher scans its tree, uploads the full archive once, then polls for
//! file-level changes until its cancellation token fires. Fatal errors are
//! reported once on the errors channel and end the watcher.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::{ChangeEvent, Service, SyncSettings};
use tether_sync::{pack_to_file, resolve_ignores, Snapshot, SyncError};

use crate::error::EngineError;
use crate::paths::remove_artifact;
use crate::uploader::{FileTransfer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    InitialScan,
    BootstrapUpload,
    PollLoop,
    Stopped,
}

/// Sending halves shared by every watcher of one syncer.
#[derive(Debug, Clone)]
pub(crate) struct Outputs {
    pub events: mpsc::Sender<ChangeEvent>,
    pub bootstrapped: mpsc::Sender<Service>,
    pub errors: mpsc::Sender<EngineError>,
}

pub(crate) struct Watcher<T> {
    root: PathBuf,
    service: Service,
    transport: Arc<T>,
    settings: SyncSettings,
    artifact: PathBuf,
    cancel: CancellationToken,
    phase: Phase,
}

impl<T: Transport> Watcher<T> {
    pub fn new(
        root: PathBuf,
        service: Service,
        transport: Arc<T>,
        settings: SyncSettings,
        artifact: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root,
            service,
            transport,
            settings,
            artifact,
            cancel,
            phase: Phase::Idle,
        }
    }

    /// Drive the watcher to completion. Returns the phase it stopped from.
    pub async fn run(mut self, outputs: Outputs) -> Phase {
        let result = self.drive(&outputs).await;
        let last = self.phase;
        self.enter(Phase::Stopped);
        match result {
            Ok(()) => {
                tracing::debug!(service = %self.service.name, phase = ?last, "watcher stopped");
            }
            Err(err) => {
                let err = err.for_service(&self.service.name);
                tracing::error!(phase = ?last, error = %err, "watcher failed");
                tokio::select! {
                    biased;
                    _ = outputs.errors.send(err) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }
        last
    }

    fn enter(&mut self, phase: Phase) {
        tracing::trace!(service = %self.service.name, from = ?self.phase, to = ?phase, "watcher phase");
        self.phase = phase;
    }

    async fn drive(&mut self, outputs: &Outputs) -> Result<(), EngineError> {
        self.enter(Phase::InitialScan);
        let root = self.root.clone();
        let mut snapshot = blocking(move || {
            let ignores = resolve_ignores(&root)?;
            Snapshot::scan(&root, &ignores)
        })
        .await?;
        tracing::debug!(service = %self.service.name, entries = snapshot.len(), "initial scan complete");
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.enter(Phase::BootstrapUpload);
        if !self.bootstrap().await? {
            return Ok(());
        }
        tracing::info!(service = %self.service.name, root = %self.root.display(), "bootstrap complete");
        if !self.emit(&outputs.bootstrapped, self.service.clone()).await {
            return Ok(());
        }

        self.enter(Phase::PollLoop);
        let interval = self.settings.poll_interval();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            snapshot = match self.poll(snapshot, outputs).await? {
                Some(snapshot) => snapshot,
                None => return Ok(()),
            };
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Pack the tree, upload it, and clean up the staged archive.
    /// `Ok(false)` means cancelled before the satellite accepted it.
    async fn bootstrap(&self) -> Result<bool, EngineError> {
        let root = self.root.clone();
        let artifact = self.artifact.clone();
        let summary = blocking(move || pack_to_file(&root, &artifact)).await?;
        tracing::debug!(
            service = %self.service.name,
            files = summary.files,
            symlinks = summary.symlinks,
            bytes = summary.bytes,
            "bootstrap archive staged"
        );

        let result = self.upload_with_retry().await;
        if let Err(err) = remove_artifact(&self.artifact) {
            tracing::warn!(path = %self.artifact.display(), error = %err, "failed to remove bootstrap archive");
        }
        result
    }

    async fn upload_with_retry(&self) -> Result<bool, EngineError> {
        let attempts = self.settings.bootstrap_attempts.max(1);
        let delay = self.settings.bootstrap_retry_delay();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.bootstrap(&self.service, &self.artifact).await {
                Ok(()) => return Ok(true),
                Err(err) if err.is_transient() && attempt < attempts => {
                    tracing::debug!(service = %self.service.name, attempt, error = %err, "bootstrap not accepted yet, retrying");
                }
                Err(err) => return Err(err),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One poll cycle. Returns the snapshot for the next cycle, or `None`
    /// when the watcher should stop.
    async fn poll(
        &self,
        snapshot: Snapshot,
        outputs: &Outputs,
    ) -> Result<Option<Snapshot>, EngineError> {
        let root = self.root.clone();
        let (mut snapshot, changes) = blocking(move || {
            let mut snapshot = snapshot;
            let ignores = resolve_ignores(&root)?;
            let changes = snapshot.diff(&ignores)?;
            Ok::<_, SyncError>((snapshot, changes))
        })
        .await?;

        for change in changes {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            let path = change.portable_path();
            let transfer = FileTransfer {
                status: change.status,
                path: &path,
                source: change
                    .status
                    .carries_content()
                    .then_some(change.path.as_path()),
            };
            match self.transport.transfer(&self.service, transfer).await {
                Ok(()) => {}
                Err(err) if err.is_vanished() => {
                    // Gone before it could be read; the next cycle reports the delete.
                    tracing::debug!(service = %self.service.name, path = %path, "changed file vanished");
                    continue;
                }
                Err(err) if err.is_permission_denied() => {
                    tracing::warn!(service = %self.service.name, path = %path, error = %err, "skipping unreadable file");
                    snapshot.commit(&change);
                    continue;
                }
                Err(err) => return Err(err),
            }
            snapshot.commit(&change);

            let event = ChangeEvent::new(self.service.name.clone(), change.status, path);
            tracing::debug!(%event, "change synced");
            if !self.emit(&outputs.events, event).await {
                return Ok(None);
            }
        }
        Ok(Some(snapshot))
    }

    /// Send unless cancelled. `false` means stop.
    async fn emit<V>(&self, tx: &mpsc::Sender<V>, value: V) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = tx.send(value) => sent.is_ok(),
        }
    }
}

async fn blocking<R, F>(work: F) -> Result<R, EngineError>
where
    F: FnOnce() -> Result<R, SyncError> + Send + 'static,
    R: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(err) => Err(EngineError::Join {
            task: "filesystem",
            message: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    use tempfile::TempDir;
    use tether_core::ChangeStatus;

    #[derive(Default)]
    struct Recording {
        bootstraps: Mutex<usize>,
        transfers: Mutex<Vec<(ChangeStatus, String)>>,
    }

    impl Transport for Recording {
        async fn check_health(&self, _service: &Service) -> Result<(), EngineError> {
            Ok(())
        }

        async fn bootstrap(&self, _service: &Service, archive: &Path) -> Result<(), EngineError> {
            assert!(archive.exists(), "archive is staged before upload");
            *self.bootstraps.lock().unwrap() += 1;
            Ok(())
        }

        async fn transfer(
            &self,
            _service: &Service,
            transfer: FileTransfer<'_>,
        ) -> Result<(), EngineError> {
            self.transfers
                .lock()
                .unwrap()
                .push((transfer.status, transfer.path.to_string()));
            Ok(())
        }
    }

    fn outputs() -> (
        Outputs,
        mpsc::Receiver<ChangeEvent>,
        mpsc::Receiver<Service>,
        mpsc::Receiver<EngineError>,
    ) {
        let (events, events_rx) = mpsc::channel(16);
        let (bootstrapped, bootstrapped_rx) = mpsc::channel(4);
        let (errors, errors_rx) = mpsc::channel(4);
        (
            Outputs {
                events,
                bootstrapped,
                errors,
            },
            events_rx,
            bootstrapped_rx,
            errors_rx,
        )
    }

    #[tokio::test]
    async fn cancelled_before_start_stops_after_scan_without_uploading() {
        let tree = TempDir::new().unwrap();
        let stage = TempDir::new().unwrap();
        fs::write(tree.path().join("a.txt"), "a").unwrap();

        let transport = Arc::new(Recording::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let watcher = Watcher::new(
            tree.path().to_path_buf(),
            Service::new("web", "127.0.0.1:1"),
            transport.clone(),
            SyncSettings::default(),
            stage.path().join("web_upload.tgz"),
            cancel,
        );

        let (outputs, _events, mut bootstrapped, mut errors) = outputs();
        let last = watcher.run(outputs).await;
        assert_eq!(last, Phase::InitialScan);
        assert_eq!(*transport.bootstraps.lock().unwrap(), 0);
        assert!(bootstrapped.try_recv().is_err());
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_root_is_reported_once_with_service_prefix() {
        let stage = TempDir::new().unwrap();
        let transport = Arc::new(Recording::default());
        let watcher = Watcher::new(
            stage.path().join("does-not-exist"),
            Service::new("api", "127.0.0.1:1"),
            transport,
            SyncSettings::default(),
            stage.path().join("api_upload.tgz"),
            CancellationToken::new(),
        );

        let (outputs, _events, _bootstrapped, mut errors) = outputs();
        let last = watcher.run(outputs).await;
        assert_eq!(last, Phase::InitialScan);
        let err = errors.try_recv().unwrap();
        assert!(err.to_string().starts_with("(api): "), "got: {err}");
        assert!(errors.try_recv().is_err());
    }

    #[tokio::test]
    async fn bootstraps_then_ships_new_files_until_cancelled() {
        let tree = TempDir::new().unwrap();
        let stage = TempDir::new().unwrap();
        let artifact = stage.path().join("web_upload.tgz");
        let settings = SyncSettings {
            poll_interval_ms: 10,
            ..SyncSettings::default()
        };

        let transport = Arc::new(Recording::default());
        let cancel = CancellationToken::new();
        let watcher = Watcher::new(
            tree.path().to_path_buf(),
            Service::new("web", "127.0.0.1:1"),
            transport.clone(),
            settings,
            artifact.clone(),
            cancel.clone(),
        );
        let (outputs, mut events, mut bootstrapped, _errors) = outputs();
        let task = tokio::spawn(watcher.run(outputs));

        let wait = std::time::Duration::from_secs(10);
        let service = tokio::time::timeout(wait, bootstrapped.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(service.name.0, "web");
        assert!(!artifact.exists(), "staged archive removed after bootstrap");

        fs::write(tree.path().join("new.txt"), "n").unwrap();
        let event = tokio::time::timeout(wait, events.recv()).await.unwrap().unwrap();
        assert_eq!(event.path, "new.txt");

        cancel.cancel();
        assert_eq!(task.await.unwrap(), Phase::PollLoop);
        assert_eq!(*transport.bootstraps.lock().unwrap(), 1);
        assert_eq!(
            transport.transfers.lock().unwrap()[0],
            (ChangeStatus::Create, "new.txt".to_string())
        );
    }
}
