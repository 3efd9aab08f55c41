//! `tether connect`: bootstrap bound services and stream changes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Args;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use tether_core::{ChangeEvent, Service, ServiceName, Session, SyncSettings};
use tether_engine::{wait_healthy, EngineError, SatelliteClient, Syncer};

/// Services still bootstrapping after this long get a notice.
const SLOW_UPLOAD_NOTICE: Duration = Duration::from_secs(20);

/// Arguments for `tether connect`.
#[derive(Args, Debug)]
pub struct ConnectArgs {
    /// Session file; discovered from the current directory when omitted.
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long)]
    pub json_logs: bool,
}

impl ConnectArgs {
    pub fn run(self) -> Result<()> {
        tether_engine::init_tracing(self.json_logs);
        let (session, base) = super::load_session(self.config.as_deref())?;

        let targets = plan(&session, &base)?;
        if targets.is_empty() {
            println!("No services with a local directory to sync.");
            return Ok(());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        runtime.block_on(connect(session.settings, targets))
    }
}

/// Resolve which (directory, service) pairs to watch.
fn plan(session: &Session, base: &Path) -> Result<Vec<(PathBuf, Service)>> {
    for entry in session.services.iter().filter(|entry| entry.path.is_none()) {
        println!(
            "{} {} has no local path; not syncing",
            "note:".cyan(),
            entry.service.name
        );
    }

    let mut targets = Vec::new();
    for (path, service) in session.bindings(base) {
        let meta = std::fs::metadata(&path).with_context(|| {
            format!(
                "service '{}': cannot access sync path {}",
                service.name,
                path.display()
            )
        })?;
        if !meta.is_dir() {
            println!(
                "{} {} is bound to {}, which is not a directory; not syncing",
                "note:".cyan(),
                service.name,
                path.display()
            );
            continue;
        }
        targets.push((path, service));
    }
    Ok(targets)
}

async fn connect(settings: SyncSettings, targets: Vec<(PathBuf, Service)>) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let client = SatelliteClient::with_timeout(settings.request_timeout())
        .context("failed to build HTTP client")?;
    let (mut syncer, mut channels) = Syncer::new(settings.clone(), client);

    for (path, service) in &targets {
        println!("{} {}", "Waiting for".bright_black(), service.name);
        let healthy = wait_healthy(
            syncer.transport(),
            service,
            settings.health_attempts,
            settings.health_retry_delay(),
            &cancel,
        )
        .await;
        match healthy {
            Ok(true) => {}
            Ok(false) => return shutdown(&mut syncer, Ok(())).await,
            Err(err) => {
                report(&err);
                return shutdown(&mut syncer, Err(anyhow!(err))).await;
            }
        }
        syncer
            .watch(path.clone(), service.clone())
            .with_context(|| format!("failed to watch {}", path.display()))?;
    }

    let mut pending: BTreeSet<ServiceName> =
        targets.iter().map(|(_, service)| service.name.clone()).collect();
    let notice = tokio::time::sleep(SLOW_UPLOAD_NOTICE);
    tokio::pin!(notice);
    let mut notice_due = true;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                println!("{}", "Disconnecting...".bright_black());
                break Ok(());
            }
            Some(service) = channels.bootstrapped.recv() => {
                pending.remove(&service.name);
                println!("{} {} synced", "✓".green(), service.name);
                if pending.is_empty() {
                    println!("All services synced. Watching for changes; press Ctrl-C to stop.");
                }
            }
            Some(event) = channels.events.recv() => print_event(&event),
            Some(err) = channels.errors.recv() => {
                report(&err);
                break Err(anyhow!(err));
            }
            _ = &mut notice, if notice_due => {
                notice_due = false;
                if !pending.is_empty() {
                    let names: Vec<String> = pending.iter().map(ToString::to_string).collect();
                    println!(
                        "{} still uploading {}; large directories can take a while",
                        "note:".cyan(),
                        names.join(", ")
                    );
                }
            }
        }
    };

    shutdown(&mut syncer, outcome).await
}

/// Close the syncer; the session outcome wins over a close failure.
async fn shutdown(syncer: &mut Syncer<SatelliteClient>, outcome: Result<()>) -> Result<()> {
    let closed = syncer.close().await;
    outcome?;
    closed.context("failed to shut down cleanly")
}

fn print_event(event: &ChangeEvent) {
    let stamp = Local::now().format("%H:%M:%S").to_string();
    println!("{} {event}", stamp.bright_black());
}

fn report(err: &EngineError) {
    eprintln!("{} {err}", "error:".red().bold());
    if let Some(hint) = err.hint() {
        eprintln!("  {}", hint.yellow());
    }
}
