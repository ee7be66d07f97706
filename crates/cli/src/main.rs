mod cli;
mod loader;
mod terminal;
mod writer;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use maidx_batch::BatchScheduler;
use maidx_core::{ExtractionConfig, ExtractionSchema};
use maidx_tool_runtime::tools::{sandbox, SANDBOX_ARG};
use maidx_tool_runtime::{standard_registry, CancellationFlag, ConversationEngine, EngineSettings};

use crate::cli::CliArgs;
use crate::terminal::Terminal;
use crate::writer::OutputWriter;

fn main() -> Result<ExitCode> {
    // Script children re-enter here before any runtime or logging starts.
    if std::env::args().nth(1).as_deref() == Some(SANDBOX_ARG) {
        return Ok(sandbox::serve());
    }
    run()
}

#[tokio::main]
async fn run() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    maidx_core::config::load_dotenv();
    let args = CliArgs::parse();
    let terminal = Terminal::new();

    let mut config = ExtractionConfig::for_profile(&args.profile);
    args.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;
    config.log_summary();
    let config = Arc::new(config);

    let schema = Arc::new(
        ExtractionSchema::load(&args.schema)
            .with_context(|| format!("failed to load schema {}", args.schema.display()))?,
    );
    info!(title = schema.display_title(), fields = schema.fields().len(), "Schema loaded");

    let client = maidx_llm::create_client(&config.llm).context("failed to create LLM client")?;
    let registry = standard_registry(&config.tools, &schema).context("failed to register tools")?;
    let engine = Arc::new(ConversationEngine::new(
        client,
        Arc::new(registry),
        schema,
        EngineSettings::from_config(&config),
    ));

    let cancel = CancellationFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling batch");
                cancel.cancel();
            }
        });
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        let terminal = Terminal::new();
        while let Some(event) = rx.recv().await {
            if let Err(e) = terminal.display_event(&event) {
                tracing::debug!(error = %e, "Failed to print progress");
            }
        }
    });

    terminal.print_banner(&config.llm.model, config.batch.workers, args.files.len())?;
    let documents = loader::load_documents(&args.files).await;

    let scheduler = BatchScheduler::new(engine, &config.batch)
        .with_progress(tx)
        .with_cancellation(cancel)
        .with_transcripts(config.engine.keep_transcripts);
    let report = scheduler.run(documents).await;
    // Closing the channel lets the printer drain and exit.
    drop(scheduler);
    printer.await.ok();

    let writer = OutputWriter::create(&args.output)?;
    let written = writer.write_report(&report, config.redacted_summary())?;
    info!(files = written.len(), output = %args.output.display(), "Results written");

    if report.failed() > 0 {
        terminal.print_failures(&report)?;
    }
    terminal.print_info(&format!("Output: {}", args.output.display()))?;

    if report.cancelled {
        terminal.print_error("batch was cancelled")?;
        return Ok(ExitCode::from(130));
    }
    Ok(if report.failed() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
