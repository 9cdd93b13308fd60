use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use lessonmap::mapper::{SystemClock, TopicMapper, TopicMatch};
use lessonmap::model::ExtractedTheme;
use lessonmap::util::write_json_stdout;

use crate::cli::MapTopicArgs;
use crate::commands::CommandContext;

#[derive(Debug, Serialize)]
struct MapTopicReport {
    theme: ExtractedTheme,
    matched: Option<TopicMatch>,
}

pub fn run(context: &CommandContext, args: MapTopicArgs) -> Result<()> {
    let store = context.open_store()?;
    let mapper = TopicMapper::new(store, context.config.mapper.clone(), Arc::new(SystemClock));

    let mut theme = ExtractedTheme::new(args.name, 1.0);
    theme.keywords = args.keywords;
    theme.summary = args.summary;

    let matched = mapper.map_theme(&theme)?;
    theme.mapped_topic = matched.as_ref().map(|found| found.topic.clone());
    write_json_stdout(&MapTopicReport { theme, matched })
}
