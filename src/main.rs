use std::process;
use std::time::Duration;

use clap::Parser;
use ossatura::cache::key;
use ossatura::config::{self, CliArgs, MaintenanceCommand, PerfReportArgs};
use ossatura::perf::{HistoryRecord, PerformanceReport};
use ossatura::util::bytes::format_bytes;
use ossatura::{RuntimeContext, telemetry};
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum MaintenanceError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] config::LoadError),
    #[error(transparent)]
    Telemetry(#[from] telemetry::TelemetryError),
    #[error("cache clear failed; see the log for the backend error")]
    CacheClear,
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

fn main() {
    if let Err(error) = run() {
        report_error(&error);
        process::exit(1);
    }
}

fn report_error(error: &MaintenanceError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "maintenance command failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "maintenance command failed");
    });
}

fn run() -> Result<(), MaintenanceError> {
    let cli = CliArgs::parse();
    let loaded = config::load(&cli)?;

    telemetry::init(&loaded.settings.logging)?;
    let context = RuntimeContext::initialize(loaded);

    match cli.command {
        MaintenanceCommand::CleanupImages(args) => {
            let pipeline = context.image_pipeline();
            let deleted = pipeline.cleanup_cache(Duration::from_secs(args.max_age_seconds));
            println!("deleted {deleted} stale derivative files");
            Ok(())
        }
        MaintenanceCommand::CacheClear => {
            if context.store().clear() {
                info!("cache cleared");
                println!("cache cleared");
                Ok(())
            } else {
                Err(MaintenanceError::CacheClear)
            }
        }
        MaintenanceCommand::PerfReport(args) => print_perf_report(&context, &args),
    }
}

fn print_perf_report(
    context: &RuntimeContext,
    args: &PerfReportArgs,
) -> Result<(), MaintenanceError> {
    match context.store().get::<PerformanceReport>(key::PERF_LATEST) {
        Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
        None => println!("no performance report stored"),
    }

    if args.history {
        let history: Vec<HistoryRecord> = context
            .store()
            .get(key::PERF_HISTORY)
            .unwrap_or_default();
        if history.is_empty() {
            println!("no history stored");
        }
        for record in history {
            println!(
                "{}  {:>4}  {:>8.1}ms  {:>10}  {}",
                format_timestamp(record.timestamp),
                record.score,
                record.response_time * 1_000.0,
                format_bytes(record.memory_usage),
                record.uri
            );
        }
    }

    Ok(())
}

fn format_timestamp(timestamp: u64) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp as i64)
        .ok()
        .and_then(|moment| moment.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}
