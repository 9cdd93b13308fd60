use anyhow::Result;
use serde::Serialize;

use lessonmap::chunker::word_count;
use lessonmap::model::TunedSettings;
use lessonmap::tuning::{TuningOptions, tune};
use lessonmap::util::write_json_stdout;

use crate::cli::TuneArgs;
use crate::commands::{CommandContext, read_transcript};

#[derive(Debug, Serialize)]
struct TuneReport {
    words: usize,
    granularity: u8,
    settings: TunedSettings,
}

pub fn run(context: &CommandContext, args: TuneArgs) -> Result<()> {
    let transcript = read_transcript(&args.transcript)?;
    let options = TuningOptions {
        granularity: args.granularity,
        lecture_minutes: args.lecture_minutes,
    };

    write_json_stdout(&TuneReport {
        words: word_count(&transcript),
        granularity: args
            .granularity
            .unwrap_or(context.config.tuning.default_granularity),
        settings: tune(&transcript, options, &context.config.tuning),
    })
}
