use std::io::{self, Write};

use anyhow::Result;
use tracing::info;

use lessonmap::config::FailurePolicy;
use lessonmap::pipeline::{LecturePipeline, ProcessOptions, ProcessOutcome};
use lessonmap::tuning::TuningOptions;
use lessonmap::util::write_json_stdout;

use crate::cli::{PolicyArg, ProcessArgs};
use crate::commands::{CommandContext, read_transcript};

pub fn run(context: &CommandContext, args: ProcessArgs) -> Result<()> {
    let transcript = read_transcript(&args.transcript)?;

    let mut config = context.config.clone();
    if let Some(policy) = args.policy {
        config.extraction.failure_policy = match policy {
            PolicyArg::BestEffort => FailurePolicy::BestEffort,
            PolicyArg::Strict => FailurePolicy::Strict,
        };
    }

    let store = context.open_store()?;
    let pipeline = LecturePipeline::from_config(store, config)?;
    info!(
        lecture_id = %args.lecture_id,
        transcript = %args.transcript.display(),
        "processing lecture"
    );

    let options = ProcessOptions {
        tuning: TuningOptions {
            granularity: args.granularity,
            lecture_minutes: args.lecture_minutes,
        },
        force: args.force,
    };
    let outcome = pipeline.process_transcript(
        &args.lecture_id,
        args.title.as_deref(),
        &transcript,
        options,
    )?;

    if args.json {
        write_json_stdout(&outcome)
    } else {
        emit_text(&outcome)
    }
}

fn emit_text(outcome: &ProcessOutcome) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Lecture: {}", outcome.lecture_id)?;
    writeln!(
        output,
        "Chunks: {} (failed: {}), chunk size: {} words",
        outcome.chunk_count, outcome.failed_chunks, outcome.settings.chunk_size_words
    )?;
    writeln!(output, "Themes: {}", outcome.themes.len())?;

    for (index, theme) in outcome.themes.iter().enumerate() {
        writeln!(
            output,
            "{}. {}\tconfidence={:.2}\ttopic={}",
            index + 1,
            theme.name,
            theme.confidence,
            theme.mapped_topic.as_deref().unwrap_or("-")
        )?;
        if !theme.keywords.is_empty() {
            writeln!(output, "\tkeywords: {}", theme.keywords.join(", "))?;
        }
        if !theme.summary.is_empty() {
            writeln!(output, "\tsummary: {}", theme.summary)?;
        }
    }

    output.flush()?;
    Ok(())
}
