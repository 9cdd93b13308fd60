use std::path::Path;

use anyhow::{Result, bail};
use tracing::{info, warn};

use lessonmap::ingest::{DatasetIngestor, DatasetServerSource, JsonlProblemSource, ProblemSource};
use lessonmap::jobs::{JobKind, JobRegistry, JobState, StartOutcome};
use lessonmap::util::write_json_stdout;

use crate::cli::IngestArgs;
use crate::commands::CommandContext;

pub fn run(context: &CommandContext, args: IngestArgs) -> Result<()> {
    let mut config = context.config.ingest.clone();
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.request_delay_ms = delay_ms;
    }
    if args.max_rows.is_some() {
        config.max_rows = args.max_rows;
    }

    let source: Box<dyn ProblemSource> =
        if args.source.starts_with("http://") || args.source.starts_with("https://") {
            Box::new(DatasetServerSource::new(&args.source, config.clone())?)
        } else {
            Box::new(JsonlProblemSource::open(Path::new(&args.source), config.clone())?)
        };

    let store = context.open_store()?;
    let ingestor = DatasetIngestor::new(store, config, context.config.retrieval.clone());
    let registry = JobRegistry::new();

    let outcome = registry.start(JobKind::DatasetIngest, move |progress| {
        let summary = ingestor.run(source.as_ref(), Some(progress))?;
        Ok(format!(
            "ingested {} rows from {} ({} new problems, {} skipped)",
            summary.rows, summary.source, summary.inserted, summary.skipped_rows
        ))
    })?;
    let handle = match outcome {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyRunning(status) => {
            warn!(started_at = ?status.started_at, "dataset ingest already running");
            return Ok(());
        }
    };

    let status = handle.wait()?;
    if args.json {
        write_json_stdout(&status)?;
    }
    match status.state {
        JobState::Completed => {
            info!(
                processed = status.processed,
                message = %status.message.unwrap_or_default(),
                "ingest finished"
            );
            Ok(())
        }
        _ => bail!(
            "dataset ingest failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        ),
    }
}
