//! # tether-sync
//!
//! Filesystem side of directory sync: ignore resolution, tar.gz packing and
//! unpacking, and the snapshot diff behind incremental transfers.
//!
//! Nothing here touches the network. The engine calls [`ignore::resolve`]
//! and [`Snapshot::diff`] once per poll cycle and [`archive::pack_to_file`]
//! once per bootstrap.

pub mod archive;
pub mod error;
pub mod ignore;
pub mod perm;
pub mod snapshot;
pub mod walk;

pub use archive::{pack, pack_into, pack_to_file, unpack, PackSummary, UnpackSummary};
pub use error::SyncError;
pub use ignore::{resolve as resolve_ignores, IgnoreSet, BUILTIN_IGNORES, IGNORE_FILE};
pub use snapshot::{Change, EntryMeta, Snapshot};
