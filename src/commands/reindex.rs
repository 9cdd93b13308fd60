use anyhow::{Result, bail};
use tracing::info;

use lessonmap::ingest::DatasetIngestor;
use lessonmap::jobs::{JobKind, JobRegistry, JobState, StartOutcome};

use crate::cli::ReindexArgs;
use crate::commands::CommandContext;

pub fn run(context: &CommandContext, args: ReindexArgs) -> Result<()> {
    let store = context.open_store()?;
    let ingestor = DatasetIngestor::new(
        store,
        context.config.ingest.clone(),
        context.config.retrieval.clone(),
    );
    let batch_size = args.batch_size;

    let registry = JobRegistry::new();
    let StartOutcome::Started(handle) = registry.start(JobKind::Reindex, move |progress| {
        let indexed = ingestor.reindex(batch_size, Some(progress))?;
        Ok(format!("reindexed {indexed} problems"))
    })?
    else {
        bail!("reindex already running");
    };

    let status = handle.wait()?;
    if status.state != JobState::Completed {
        bail!(
            "reindex failed: {}",
            status.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    info!(
        processed = status.processed,
        message = %status.message.unwrap_or_default(),
        "reindex finished"
    );
    Ok(())
}
