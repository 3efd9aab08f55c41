//! Session-wide coordinator for watchers.
//!
//! A [`Syncer`] spawns one watcher task per bound directory, fans their
//! reports into shared channels, and tears them all down on [`Syncer::close`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tether_core::{ChangeEvent, Service, ServiceName, SyncSettings};

use crate::error::{io_err, EngineError};
use crate::paths::{remove_artifact, upload_artifact};
use crate::watcher::{Outputs, Phase, Watcher};
use crate::Transport;

const EVENT_BUFFER: usize = 256;
const BOOTSTRAP_BUFFER: usize = 64;
const ERROR_BUFFER: usize = 64;

/// Receiving halves handed to the caller of [`Syncer::new`].
#[derive(Debug)]
pub struct SyncChannels {
    /// One event per change the satellite acknowledged.
    pub events: mpsc::Receiver<ChangeEvent>,
    /// One message per watcher whose bootstrap upload was accepted.
    pub bootstrapped: mpsc::Receiver<Service>,
    /// At most one message per watcher, each ending that watcher.
    pub errors: mpsc::Receiver<EngineError>,
}

struct WatcherHandle {
    service: ServiceName,
    root: PathBuf,
    artifact: PathBuf,
    task: JoinHandle<Phase>,
}

/// Owns every watcher of a session and the channels they report on.
pub struct Syncer<T> {
    transport: Arc<T>,
    settings: SyncSettings,
    outputs: Outputs,
    shutdown: CancellationToken,
    watchers: Vec<WatcherHandle>,
    next_seq: usize,
    closed: bool,
}

impl<T: Transport> Syncer<T> {
    pub fn new(settings: SyncSettings, transport: T) -> (Self, SyncChannels) {
        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (bootstrapped, bootstrapped_rx) = mpsc::channel(BOOTSTRAP_BUFFER);
        let (errors, errors_rx) = mpsc::channel(ERROR_BUFFER);
        let syncer = Self {
            transport: Arc::new(transport),
            settings,
            outputs: Outputs {
                events,
                bootstrapped,
                errors,
            },
            shutdown: CancellationToken::new(),
            watchers: Vec::new(),
            next_seq: 0,
            closed: false,
        };
        let channels = SyncChannels {
            events: events_rx,
            bootstrapped: bootstrapped_rx,
            errors: errors_rx,
        };
        (syncer, channels)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Start watching `path` on behalf of `service`.
    ///
    /// Returns as soon as the watcher task is spawned; scanning, bootstrap
    /// and polling happen in the background and report on [`SyncChannels`].
    /// Must be called from within a tokio runtime.
    pub fn watch(&mut self, path: impl Into<PathBuf>, service: Service) -> Result<(), EngineError> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        let runtime = Handle::try_current().map_err(|e| EngineError::Runtime(e.to_string()))?;

        let root = path.into();
        let artifact = upload_artifact(&self.settings.staging_dir(), &service.name, self.next_seq);
        self.next_seq += 1;

        let watcher = Watcher::new(
            root.clone(),
            service.clone(),
            self.transport.clone(),
            self.settings.clone(),
            artifact.clone(),
            self.shutdown.child_token(),
        );
        let task = runtime.spawn(watcher.run(self.outputs.clone()));

        tracing::info!(service = %service.name, root = %root.display(), "watching");
        self.watchers.push(WatcherHandle {
            service: service.name,
            root,
            artifact,
            task,
        });
        Ok(())
    }

    /// Services and roots currently registered.
    pub fn watched(&self) -> impl Iterator<Item = (&ServiceName, &Path)> + '_ {
        self.watchers
            .iter()
            .map(|handle| (&handle.service, handle.root.as_path()))
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop every watcher, wait for it, and remove its staged archive.
    ///
    /// All watchers are torn down even when one fails; the first failure is
    /// returned. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.shutdown.cancel();

        let mut first_err: Option<EngineError> = None;
        for handle in std::mem::take(&mut self.watchers) {
            match handle.task.await {
                Ok(phase) => {
                    tracing::debug!(service = %handle.service, ?phase, "watcher joined");
                }
                Err(err) => {
                    let err = EngineError::Join {
                        task: "watcher",
                        message: err.to_string(),
                    }
                    .for_service(&handle.service);
                    tracing::warn!(error = %err, "watcher did not shut down cleanly");
                    first_err.get_or_insert(err);
                }
            }
            if let Err(err) = remove_artifact(&handle.artifact) {
                let err = io_err(&handle.artifact, err).for_service(&handle.service);
                tracing::warn!(error = %err, "failed to remove staged archive");
                first_err.get_or_insert(err);
            }
        }

        tracing::info!("syncer closed");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T> Drop for Syncer<T> {
    fn drop(&mut self) {
        // Watchers must not outlive their owner even without close().
        self.shutdown.cancel();
    }
}
