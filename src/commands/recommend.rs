use std::io::{self, Write};

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::info;

use lessonmap::model::{Page, PageRequest, Problem};
use lessonmap::pipeline::{LecturePipeline, RetrievalMode};
use lessonmap::store::ProblemRepository;
use lessonmap::util::{truncate_chars, write_json_stdout};

use crate::cli::{ModeArg, RecommendArgs};
use crate::commands::CommandContext;

const STATEMENT_PREVIEW_CHARS: usize = 160;

#[derive(Debug, Serialize)]
struct Recommendation {
    problem_id: i64,
    score: f64,
    matched_theme: Option<String>,
    problem: Option<Problem>,
}

pub fn run(context: &CommandContext, args: RecommendArgs) -> Result<()> {
    let store = context.open_store()?;
    let pipeline = LecturePipeline::from_config(store.clone(), context.config.clone())?;
    let mode = match args.mode {
        ModeArg::Hybrid => RetrievalMode::Hybrid,
        ModeArg::Semantic => RetrievalMode::Semantic,
    };

    let Some(page) = pipeline.get_recommended_problems(
        &args.lecture_id,
        args.top_k,
        PageRequest::new(args.page, args.page_size),
        mode,
    )?
    else {
        bail!("lecture not found: {}", args.lecture_id);
    };
    info!(
        lecture_id = %args.lecture_id,
        total = page.total_items,
        page = page.page,
        "recommendations loaded"
    );

    let mut items = Vec::with_capacity(page.items.len());
    for result in &page.items {
        items.push(Recommendation {
            problem_id: result.problem_id,
            score: result.score,
            matched_theme: result.matched_theme.clone(),
            problem: store.find_by_id(result.problem_id)?,
        });
    }
    let page = Page {
        items,
        page: page.page,
        size: page.size,
        total_items: page.total_items,
        total_pages: page.total_pages,
    };

    if args.json {
        write_json_stdout(&page)
    } else {
        emit_text(&args.lecture_id, &page)
    }
}

fn emit_text(lecture_id: &str, page: &Page<Recommendation>) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Lecture: {lecture_id}")?;
    writeln!(
        output,
        "Page {} of {} ({} results)",
        page.page + 1,
        page.total_pages.max(1),
        page.total_items
    )?;

    for item in &page.items {
        let (topic, statement) = match &item.problem {
            Some(problem) => (
                problem.topic.as_str(),
                truncate_chars(&problem.statement, STATEMENT_PREVIEW_CHARS),
            ),
            None => ("-", ""),
        };
        writeln!(
            output,
            "{}\tscore={:.3}\ttopic={}\ttheme={}",
            item.problem_id,
            item.score,
            topic,
            item.matched_theme.as_deref().unwrap_or("-")
        )?;
        if !statement.is_empty() {
            writeln!(output, "\t{statement}")?;
        }
    }

    output.flush()?;
    Ok(())
}
