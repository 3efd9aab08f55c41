pub mod archive;
pub mod connect;
pub mod ignores;
pub mod services;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tether_core::session::{self, SESSION_FILE};
use tether_core::Session;

/// Load the session from `explicit`, or discover it from the working directory.
/// Returns the session with the directory its relative paths resolve against.
pub fn load_session(explicit: Option<&Path>) -> Result<(Session, PathBuf)> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let cwd = std::env::current_dir().context("could not determine current directory")?;
            session::discover_from(&cwd)
                .with_context(|| format!("no {SESSION_FILE} found; pass --config or create one"))?
        }
    };
    let loaded = session::load_at(&path)
        .with_context(|| format!("failed to load session from {}", path.display()))?;
    let base = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((loaded, base))
}
