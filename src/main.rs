//! Headless runner: loads settings, performs one collection run, exits.
//!
//! ```bash
//! ultra_daq --config config/default.toml --journal logs/operation.log
//! ultra_daq --mock          # scripted instruments, no hardware
//! ```
//!
//! Ctrl-C requests an abort; the run still restores instrument defaults
//! before the process exits.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use ultra_daq::config::{connector_from, TransportKind, DEFAULT_CONFIG_PATH};
use ultra_daq::events::EventBus;
use ultra_daq::journal::FeedbackJournal;
use ultra_daq::{logging, CollectionOrchestrator, CollectorHandle, RunOutcome, Settings};

#[derive(Debug, Parser)]
#[command(name = "ultra_daq", version, about = "Ultrasonic sweep acquisition")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use scripted mock instruments instead of the configured transport.
    #[arg(long)]
    mock: bool,

    /// Append timestamped feedback to this file.
    #[arg(long)]
    journal: Option<PathBuf>,

    /// JSON log output.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut settings = Settings::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.mock {
        settings.transport.kind = TransportKind::Mock;
    }
    if args.json {
        settings.application.log_format = "json".into();
    }
    if let Some(path) = &args.journal {
        settings.application.journal_path = Some(path.display().to_string());
    }
    logging::init(&settings.application)?;
    info!(
        "{} starting with {} transport",
        settings.application.name, settings.transport.kind
    );

    let orchestrator = CollectionOrchestrator::new(
        Arc::new(settings.clone()),
        connector_from(&settings.transport),
        settings.commands.clone(),
        settings.timing.clone(),
        EventBus::default(),
    );
    let (handle, worker) = CollectorHandle::spawn(orchestrator);

    let journal = settings
        .application
        .journal_path
        .as_ref()
        .map(|path| FeedbackJournal::new(path).spawn(handle.subscribe()));

    let abort_handle = handle.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received");
            abort_handle.abort();
        }
    });

    let summary = handle.collect().await?;
    handle.shutdown().await?;
    worker.await.context("collector worker panicked")?;
    // The journal stops once every event publisher is gone.
    ctrl_c.abort();
    drop(handle);

    if let Some(journal) = journal {
        journal.await.context("journal task panicked")??;
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(match summary.outcome {
        RunOutcome::Completed | RunOutcome::Aborted => ExitCode::SUCCESS,
        RunOutcome::ConnectFailed | RunOutcome::Rejected => ExitCode::FAILURE,
    })
}
