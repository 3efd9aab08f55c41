//! Domain types shared by the sync engine and its callers.
//!
//! A [`Service`] is read-only to the engine: it is supplied by whatever
//! manages applications and only describes where file operations go.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed service name, unique within an application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(pub String);

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Service descriptor
// ---------------------------------------------------------------------------

/// Commands the remote side runs around a sync. Sent along with every
/// transfer so the satellite can rebuild or restart after a change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LifecycleCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl LifecycleCommands {
    /// `(field, command)` pairs for the commands that are set, in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("init", self.init.as_deref()),
            ("build", self.build.as_deref()),
            ("test", self.test.as_deref()),
            ("start", self.start.as_deref()),
        ]
        .into_iter()
        .filter_map(|(name, cmd)| cmd.map(|cmd| (name, cmd)))
    }
}

/// A remote sync target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: ServiceName,
    /// `host:port` of the satellite receiving file operations.
    pub address: String,
    #[serde(flatten)]
    pub commands: LifecycleCommands,
}

impl Service {
    pub fn new(name: impl Into<ServiceName>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            commands: LifecycleCommands::default(),
        }
    }

    pub fn with_commands(mut self, commands: LifecycleCommands) -> Self {
        self.commands = commands;
        self
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// What happened to a file between two poll cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Create,
    Update,
    Delete,
}

impl ChangeStatus {
    /// Value of the `type` field on the incremental endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Create => "create",
            ChangeStatus::Update => "update",
            ChangeStatus::Delete => "delete",
        }
    }

    /// Past-tense form used when rendering events.
    pub fn past_tense(&self) -> &'static str {
        match self {
            ChangeStatus::Create => "Created",
            ChangeStatus::Update => "Updated",
            ChangeStatus::Delete => "Deleted",
        }
    }

    /// Create and update carry file content; delete does not.
    pub fn carries_content(&self) -> bool {
        !matches!(self, ChangeStatus::Delete)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file-level change that has already been pushed to the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub service: ServiceName,
    pub status: ChangeStatus,
    /// Path relative to the watched root, `/`-separated.
    pub path: String,
}

impl ChangeEvent {
    pub fn new(service: ServiceName, status: ChangeStatus, path: impl Into<String>) -> Self {
        Self {
            service,
            status,
            path: path.into(),
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}): {} {}",
            self.service,
            self.status.past_tense(),
            self.path
        )
    }
}

/// Render a relative path with `/` separators regardless of platform.
pub fn portable_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
