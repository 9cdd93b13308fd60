use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use lessonmap::model::LectureRecord;
use lessonmap::semantic::EMBEDDING_BACKEND;
use lessonmap::store::{DB_SCHEMA_VERSION, ProblemRepository, StoredTheme};
use lessonmap::util::write_json_stdout;

use crate::cli::StatusArgs;
use crate::commands::CommandContext;

#[derive(Debug, Serialize)]
struct CorpusStatus {
    db_path: String,
    schema_version: &'static str,
    embedding_backend: &'static str,
    embedding_dim: usize,
    problems: i64,
    topics: usize,
    vector_documents: i64,
    lectures: Vec<LectureCount>,
}

#[derive(Debug, Serialize)]
struct LectureCount {
    status: String,
    count: i64,
}

#[derive(Debug, Serialize)]
struct LectureStatusReport {
    #[serde(flatten)]
    lecture: LectureRecord,
    themes: Vec<StoredTheme>,
    chunks: usize,
}

pub fn run(context: &CommandContext, args: StatusArgs) -> Result<()> {
    if !context.db_path.exists() {
        warn!(path = %context.db_path.display(), "database missing");
        return Ok(());
    }
    let store = context.open_store()?;

    if let Some(lecture_id) = &args.lecture_id {
        let Some(lecture) = store.load_lecture(lecture_id)? else {
            bail!("lecture not found: {lecture_id}");
        };
        let report = LectureStatusReport {
            themes: store.load_ranked_lecture_themes(lecture_id)?,
            chunks: store.load_lecture_chunks(lecture_id)?.len(),
            lecture,
        };

        if args.json {
            return write_json_stdout(&report);
        }
        info!(
            lecture_id = %report.lecture.lecture_id,
            status = report.lecture.status.as_str(),
            error = %report.lecture.error_message.clone().unwrap_or_default(),
            chunks = report.chunks,
            themes = report.themes.len(),
            updated_at = %report.lecture.updated_at,
            "lecture status"
        );
        for stored in &report.themes {
            info!(
                rank = stored.rank,
                theme = %stored.theme.name,
                topic = %stored.theme.mapped_topic.clone().unwrap_or_default(),
                "lecture theme"
            );
        }
        return Ok(());
    }

    let status = CorpusStatus {
        db_path: context.db_path.display().to_string(),
        schema_version: DB_SCHEMA_VERSION,
        embedding_backend: EMBEDDING_BACKEND,
        embedding_dim: store.embedding_dim(),
        problems: store.count_problems()?,
        topics: store.distinct_topics()?.len(),
        vector_documents: store.count_vector_documents()?,
        lectures: store
            .lecture_status_counts()?
            .into_iter()
            .map(|(status, count)| LectureCount { status, count })
            .collect(),
    };

    if args.json {
        return write_json_stdout(&status);
    }
    info!(
        path = %status.db_path,
        schema_version = status.schema_version,
        embedding_backend = status.embedding_backend,
        problems = status.problems,
        topics = status.topics,
        vector_documents = status.vector_documents,
        "database status"
    );
    for entry in &status.lectures {
        info!(status = %entry.status, count = entry.count, "lectures");
    }
    Ok(())
}
