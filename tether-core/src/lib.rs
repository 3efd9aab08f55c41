//! Tether core library: domain types, session file, errors.
//!
//! - [`types`]: service descriptors and change events
//! - [`session`]: `tether.yaml` load / save / discovery and [`SyncSettings`]
//! - [`error`]: [`SessionError`]

pub mod error;
pub mod session;
pub mod types;

pub use error::SessionError;
pub use session::{Session, SessionEntry, SyncSettings};
pub use types::{
    portable_path, ChangeEvent, ChangeStatus, LifecycleCommands, Service, ServiceName,
};
