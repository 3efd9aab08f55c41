//! HTTP transport to a service's sync satellite.
//!
//! Two endpoints share one base URL: `POST /` takes the bootstrap archive and
//! `PUT /` takes one incremental change. Both are multipart forms and both
//! answer with a small JSON body whose `status` says whether the satellite
//! applied the upload.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use tether_core::{ChangeStatus, LifecycleCommands, Service, SyncSettings};
use tether_sync::perm;

use crate::error::{io_err, Endpoint, EngineError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_PATH: &str = "healthz";

/// One file-level change on its way to a satellite.
#[derive(Debug, Clone, Copy)]
pub struct FileTransfer<'a> {
    pub status: ChangeStatus,
    /// Path relative to the watched root, `/`-separated.
    pub path: &'a str,
    /// Local file to stream; required for create and update.
    pub source: Option<&'a Path>,
}

/// How an upload is delivered. [`SatelliteClient`] is the real one.
pub trait Transport: Send + Sync + 'static {
    fn check_health(&self, service: &Service)
        -> impl Future<Output = Result<(), EngineError>> + Send;

    fn bootstrap(
        &self,
        service: &Service,
        archive: &Path,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    fn transfer(
        &self,
        service: &Service,
        transfer: FileTransfer<'_>,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// What a satellite said about an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    Accepted,
    Rejected { status: String, message: String },
}

#[derive(Debug, Deserialize)]
struct WireAck {
    #[serde(default)]
    status: String,
    #[serde(default)]
    error: String,
}

impl WireAck {
    fn classify(self, expected: &str) -> Acknowledgement {
        if self.status == expected {
            Acknowledgement::Accepted
        } else {
            Acknowledgement::Rejected {
                status: self.status,
                message: self.error,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SatelliteClient {
    http: Client,
}

impl SatelliteClient {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_timeout(SyncSettings::default().request_timeout())
    }

    /// Client whose requests give up after `timeout`, upload included.
    pub fn with_timeout(timeout: Duration) -> Result<Self, EngineError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn acknowledge(
        &self,
        response: reqwest::Response,
        service: &Service,
        endpoint: Endpoint,
        path: Option<&str>,
    ) -> Result<(), EngineError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|err| transport_error(err, &service.address))?;
        let wire: WireAck =
            serde_json::from_slice(&bytes).map_err(|source| EngineError::Response {
                address: service.address.clone(),
                source,
            })?;
        let expected = match endpoint {
            Endpoint::Bootstrap => "created",
            Endpoint::Incremental => "updated",
        };
        match wire.classify(expected) {
            Acknowledgement::Accepted => Ok(()),
            Acknowledgement::Rejected { status, message } => Err(EngineError::Rejected {
                endpoint,
                address: service.address.clone(),
                path: path.map(str::to_string),
                status,
                message,
            }),
        }
    }
}

impl Transport for SatelliteClient {
    async fn check_health(&self, service: &Service) -> Result<(), EngineError> {
        let url = format!("{}/{HEALTH_PATH}", base_url(&service.address));
        self.http
            .get(url)
            .send()
            .await
            .map_err(|err| transport_error(err, &service.address))?;
        Ok(())
    }

    async fn bootstrap(&self, service: &Service, archive: &Path) -> Result<(), EngineError> {
        let file = tokio::fs::File::open(archive)
            .await
            .map_err(|e| io_err(archive, e))?;
        let len = file.metadata().await.map_err(|e| io_err(archive, e))?.len();
        let part = Part::stream_with_length(Body::from(file), len)
            .file_name("upload.tgz")
            .mime_str("application/gzip")?;
        let form = with_commands(Form::new().part("file", part), &service.commands);

        tracing::debug!(service = %service.name, bytes = len, "posting bootstrap archive");
        let response = self
            .http
            .post(base_url(&service.address))
            .multipart(form)
            .send()
            .await
            .map_err(|err| transport_error(err, &service.address))?;
        self.acknowledge(response, service, Endpoint::Bootstrap, None)
            .await
    }

    async fn transfer(
        &self,
        service: &Service,
        transfer: FileTransfer<'_>,
    ) -> Result<(), EngineError> {
        let mut form = Form::new()
            .text("type", transfer.status.as_str())
            .text("path", transfer.path.to_string());

        if transfer.status.carries_content() {
            let source = transfer.source.ok_or_else(|| {
                io_err(
                    transfer.path,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "no local source for content transfer",
                    ),
                )
            })?;
            let file = tokio::fs::File::open(source)
                .await
                .map_err(|e| io_err(source, e))?;
            let meta = file.metadata().await.map_err(|e| io_err(source, e))?;
            form = form
                .text("mode", perm::permission_bits(&meta).to_string())
                .part(
                    "file",
                    Part::stream_with_length(Body::from(file), meta.len()).file_name("upload"),
                );
        }
        let form = with_commands(form, &service.commands);

        let response = self
            .http
            .put(base_url(&service.address))
            .multipart(form)
            .send()
            .await
            .map_err(|err| transport_error(err, &service.address))?;
        self.acknowledge(response, service, Endpoint::Incremental, Some(transfer.path))
            .await
    }
}

/// Probe a service until it answers or `attempts` run out.
///
/// Returns `Ok(false)` when cancelled before the service came up.
pub async fn wait_healthy<T: Transport>(
    transport: &T,
    service: &Service,
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<bool, EngineError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        match transport.check_health(service).await {
            Ok(()) => return Ok(true),
            Err(err) if err.is_transient() => {
                tracing::trace!(service = %service.name, attempt, error = %err, "health probe failed");
            }
            Err(err) => return Err(err.for_service(&service.name)),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Err(EngineError::Unreachable {
        address: service.address.clone(),
        attempts,
    }
    .for_service(&service.name))
}

fn base_url(address: &str) -> String {
    let trimmed = address.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn with_commands(mut form: Form, commands: &LifecycleCommands) -> Form {
    for (field, value) in commands.fields() {
        form = form.text(field, value.to_string());
    }
    form
}

fn transport_error(err: reqwest::Error, address: &str) -> EngineError {
    if connection_refused(&err) {
        EngineError::SyncUnavailable {
            address: address.to_string(),
        }
    } else {
        EngineError::Http(err)
    }
}

fn connection_refused(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        current = err.source();
    }
    false
}
