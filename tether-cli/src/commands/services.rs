//! `tether services`: what the session file binds.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Session file; discovered from the current directory when omitted.
    #[arg(long, short)]
    pub config: Option<PathBuf>,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "service")]
    name: String,
    #[tabled(rename = "address")]
    address: String,
    #[tabled(rename = "path")]
    path: String,
    #[tabled(rename = "commands")]
    commands: String,
}

impl ServicesArgs {
    pub fn run(self) -> Result<()> {
        let (session, base) = super::load_session(self.config.as_deref())?;
        if session.services.is_empty() {
            println!("No services configured.");
            return Ok(());
        }

        let rows: Vec<ServiceRow> = session
            .services
            .iter()
            .map(|entry| ServiceRow {
                name: entry.service.name.to_string(),
                address: entry.service.address.clone(),
                path: entry
                    .path
                    .as_ref()
                    .map(|p| {
                        if p.is_relative() {
                            base.join(p)
                        } else {
                            p.clone()
                        }
                    })
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "-".to_string()),
                commands: {
                    let names: Vec<&str> = entry.service.commands.fields().map(|(k, _)| k).collect();
                    if names.is_empty() {
                        "-".to_string()
                    } else {
                        names.join(", ")
                    }
                },
            })
            .collect();

        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
