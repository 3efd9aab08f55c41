use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tether_sync::{resolve_ignores, IGNORE_FILE};

#[derive(Args, Debug)]
pub struct IgnoresArgs {
    /// Directory to resolve ignores for.
    #[arg(default_value = ".")]
    pub dir: PathBuf,
}

impl IgnoresArgs {
    pub fn run(self) -> Result<()> {
        let ignores = resolve_ignores(&self.dir)
            .with_context(|| format!("failed to resolve ignores under {}", self.dir.display()))?;
        if ignores.is_empty() {
            println!("Nothing ignored under {}.", self.dir.display());
            return Ok(());
        }

        println!(
            "{} paths ignored (built-ins plus {IGNORE_FILE}):",
            ignores.len().to_string().bold()
        );
        for path in ignores.iter() {
            let shown = path.strip_prefix(&self.dir).unwrap_or(path);
            println!("  {}", shown.display());
        }
        Ok(())
    }
}
