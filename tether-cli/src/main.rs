//! Tether — keep local directories synced into running service containers.
//!
//! # Usage
//!
//! ```text
//! tether connect [--config <tether.yaml>] [--json-logs]
//! tether services [--config <tether.yaml>]
//! tether ignores <dir>
//! tether pack <dir> --output <file>
//! tether unpack <archive> <dest>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    archive::{PackArgs, UnpackArgs},
    connect::ConnectArgs,
    ignores::IgnoresArgs,
    services::ServicesArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    version,
    about = "Sync local directories into running service containers",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bootstrap every bound service, then stream file changes until Ctrl-C.
    Connect(ConnectArgs),

    /// List the services in the session file.
    Services(ServicesArgs),

    /// Show which paths under a directory are excluded from sync.
    Ignores(IgnoresArgs),

    /// Write the bootstrap archive for a directory to a file.
    Pack(PackArgs),

    /// Extract a bootstrap archive into a directory.
    Unpack(UnpackArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Connect(args) => args.run(),
        Commands::Services(args) => args.run(),
        Commands::Ignores(args) => args.run(),
        Commands::Pack(args) => args.run(),
        Commands::Unpack(args) => args.run(),
    }
}
