//! `tether pack` and `tether unpack`: the bootstrap archive on its own.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use tether_sync::{pack_to_file, unpack};

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Directory to pack.
    pub dir: PathBuf,

    /// Where to write the .tgz.
    #[arg(long, short)]
    pub output: PathBuf,
}

impl PackArgs {
    pub fn run(self) -> Result<()> {
        let summary = pack_to_file(&self.dir, &self.output)
            .with_context(|| format!("failed to pack {}", self.dir.display()))?;
        println!(
            "{} {} files, {} symlinks ({} bytes) -> {}",
            "packed".green(),
            summary.files,
            summary.symlinks,
            summary.bytes,
            self.output.display()
        );
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct UnpackArgs {
    /// Archive produced by `tether pack` or a bootstrap upload.
    pub archive: PathBuf,

    /// Destination directory; created if missing.
    pub dest: PathBuf,
}

impl UnpackArgs {
    pub fn run(self) -> Result<()> {
        let file = File::open(&self.archive)
            .with_context(|| format!("cannot open {}", self.archive.display()))?;
        let summary = unpack(BufReader::new(file), &self.dest)
            .with_context(|| format!("failed to unpack {}", self.archive.display()))?;
        println!(
            "{} {} files, {} directories, {} links into {}",
            "unpacked".green(),
            summary.files,
            summary.dirs,
            summary.links,
            self.dest.display()
        );
        if summary.skipped > 0 {
            println!("{} skipped {} unsupported entries", "note:".cyan(), summary.skipped);
        }
        Ok(())
    }
}
