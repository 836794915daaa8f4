//! Operator tool for rebuilding and inspecting projections.
//!
//! ```text
//! governance-rebuild full <projection>
//! governance-rebuild incremental <projection>
//! governance-rebuild status <projection>
//! governance-rebuild all
//! ```
//!
//! Configuration comes from the environment (see `EngineConfig::from_env`).
//! Ctrl-C stops a running rebuild between batches.

use anyhow::{Context, bail};
use governance_core::projection::ProjectionName;
use governance_projections::{
    EngineConfig, PostgresLedgerReader, PostgresProjectionBackend, ProjectionStore,
    RebuildOrchestrator, RebuildResult,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: governance-rebuild <full|incremental|status> <projection> | all";

enum Command {
    Full(String),
    Incremental(String),
    Status(String),
    All,
}

impl Command {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let command = args.next().context(USAGE)?;
        let command = match (command.as_str(), args.next()) {
            ("all", None) => Self::All,
            ("full", Some(name)) => Self::Full(name),
            ("incremental", Some(name)) => Self::Incremental(name),
            ("status", Some(name)) => Self::Status(name),
            _ => bail!(USAGE),
        };
        if args.next().is_some() {
            bail!(USAGE);
        }
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = Command::parse(std::env::args().skip(1))?;
    config.validate()?;

    info!(
        ledger_table = %config.ledger_events_table,
        batch_size = config.batch_size,
        projections = ?ProjectionName::ALL.map(ProjectionName::as_str),
        "Configuration loaded"
    );

    let ledger_pool = config
        .ledger
        .pool_options()
        .connect(&config.ledger.url)
        .await
        .context("connecting to ledger database")?;
    let ledger = PostgresLedgerReader::new(ledger_pool, config.ledger_events_table.clone())?;

    let projection_pool = config
        .projections
        .pool_options()
        .connect(&config.projections.url)
        .await
        .context("connecting to projection database")?;
    let backend = PostgresProjectionBackend::new(projection_pool);
    backend.migrate().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested, stopping after the current batch");
            let _ = shutdown_tx.send(true);
        }
    });

    let store = Arc::new(ProjectionStore::new(Arc::new(backend)));
    let orchestrator = RebuildOrchestrator::new(Arc::new(ledger), store)
        .with_default_handlers()
        .with_batch_size(config.batch_size)
        .with_shutdown(shutdown_rx);

    match command {
        Command::Full(name) => report(&orchestrator.rebuild_full(name.as_str()).await?),
        Command::Incremental(name) => {
            report(&orchestrator.rebuild_incremental(name.as_str()).await?);
        }
        Command::Status(name) => {
            let status = orchestrator.get_rebuild_status(name.as_str()).await?;
            info!(
                projection = %status.projection_name,
                synchronized = status.is_synchronized,
                last_sequence = ?status.last_sequence,
                ledger_max_sequence = status.ledger_max_sequence,
                missing_events = status.missing_events,
                "Projection status"
            );
        }
        Command::All => match orchestrator.rebuild_all().await {
            Ok(results) => results.iter().for_each(report),
            Err(e) => {
                error!(
                    error = %e,
                    data_integrity = e.is_data_integrity_error(),
                    "Rebuild of all projections failed"
                );
                return Err(e.into());
            }
        },
    }

    Ok(())
}

fn report(result: &RebuildResult) {
    info!(
        projection = %result.projection_name,
        full = result.is_full_rebuild,
        processed = result.events_processed,
        applied = result.events_applied,
        skipped = result.events_skipped,
        start_sequence = result.start_sequence,
        end_sequence = ?result.end_sequence,
        batches = result.batches,
        duration_ms = result.duration().num_milliseconds(),
        "Rebuild finished"
    );
}
