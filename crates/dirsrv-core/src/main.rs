use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dirsrv_core::cli::{load_config, Cli, Command};
use dirsrv_core::DirectoryService;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match &cli.command {
        Command::Serve => serve(config).await,
        _ => {
            println!("{}", cli.run()?);
            Ok(())
        }
    }
}

async fn serve(config: dirsrv_core::ServiceConfig) -> Result<()> {
    tracing::info!("dirsrv starting");
    let seeds = config.seed_entries.clone();
    let service = Arc::new(DirectoryService::in_memory(config).context("starting directory service")?);
    let created = service.seed(&seeds).context("adding seed entries")?;
    let report = service.startup_report()?;
    tracing::info!(
        seeded = created,
        administrative_points = report.administrative_points,
        subentries = report.subentries,
        skipped = report.skipped,
        "directory ready"
    );

    let mut events = service.diagnostics().subscribe();
    let forward = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => tracing::warn!(seq = event.seq, event = ?event.kind, "diagnostic"),
                Err(RecvError::Lagged(n)) => tracing::warn!(missed = n, "diagnostics lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    forward.abort();
    Ok(())
}
