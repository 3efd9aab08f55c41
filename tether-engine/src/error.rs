use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;

use thiserror::Error;

use tether_core::ServiceName;
use tether_sync::SyncError;

/// Which satellite endpoint a transfer went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Bootstrap,
    Incremental,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Bootstrap => f.write_str("bootstrap upload"),
            Endpoint::Incremental => f.write_str("incremental update"),
        }
    }
}

/// Error surface for uploads, watchers and the syncer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("cannot sync to {address}: connection refused")]
    SyncUnavailable { address: String },

    #[error("{endpoint} of '{}' rejected by {address}: status '{status}' {message}", .path.as_deref().unwrap_or("archive"))]
    Rejected {
        endpoint: Endpoint,
        address: String,
        path: Option<String>,
        status: String,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {address}: {source}")]
    Response {
        address: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("service at {address} did not become healthy after {attempts} attempts")]
    Unreachable { address: String, attempts: u32 },

    #[error("syncer is closed")]
    Closed,

    #[error("cannot start watcher: {0}")]
    Runtime(String),

    #[error("{task} task join failure: {message}")]
    Join { task: &'static str, message: String },

    #[error("({service}): {source}")]
    Service {
        service: ServiceName,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Attach the service name, once.
    pub fn for_service(self, service: &ServiceName) -> Self {
        match self {
            already @ EngineError::Service { .. } => already,
            other => EngineError::Service {
                service: service.clone(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping the service wrapper.
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Service { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            EngineError::Service { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Worth retrying during bootstrap: the remote side may still be starting.
    pub fn is_transient(&self) -> bool {
        match self.root() {
            EngineError::SyncUnavailable { .. } => true,
            EngineError::Http(err) => err.is_connect() || err.is_timeout(),
            _ => false,
        }
    }

    /// The local source of a transfer disappeared before it could be read.
    pub fn is_vanished(&self) -> bool {
        self.io_kind() == Some(ErrorKind::NotFound)
    }

    pub fn is_permission_denied(&self) -> bool {
        self.io_kind() == Some(ErrorKind::PermissionDenied)
    }

    fn io_kind(&self) -> Option<ErrorKind> {
        match self.root() {
            EngineError::Io { source, .. } => Some(source.kind()),
            EngineError::Sync(err) => err.io_kind(),
            _ => None,
        }
    }

    /// What an operator should do about this error, if anything specific.
    pub fn hint(&self) -> Option<&'static str> {
        match self.root() {
            EngineError::SyncUnavailable { .. } | EngineError::Rejected { .. } => {
                Some("Cannot sync the service path. Restart the affected service if this problem persists.")
            }
            EngineError::Unreachable { .. } => {
                Some("The service did not come up. Check its logs, then reconnect.")
            }
            EngineError::Sync(_) => {
                Some("Check that the watched directory and its ignore file are readable.")
            }
            _ => None,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
