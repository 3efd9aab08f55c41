//! # tether-engine
//!
//! Async side of directory sync. A [`Syncer`] owns one watcher per bound
//! directory; each watcher scans its tree, ships a full archive to the
//! service's satellite, then polls and ships individual changes.
//!
//! Delivery goes through the [`Transport`] trait. [`SatelliteClient`] speaks
//! the satellite's multipart HTTP protocol; tests substitute their own.

pub mod error;
pub mod paths;
pub mod syncer;
pub mod uploader;
pub mod watcher;

pub use error::{Endpoint, EngineError};
pub use syncer::{SyncChannels, Syncer};
pub use uploader::{wait_healthy, Acknowledgement, FileTransfer, SatelliteClient, Transport};
pub use watcher::Phase;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Calling this more than
/// once is harmless.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
