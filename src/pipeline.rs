use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::aggregate_themes;
use crate::chunker::{TranscriptChunker, word_count};
use crate::config::{AppConfig, FailurePolicy};
use crate::error::{PipelineStage, extraction_error_of};
use crate::extract::ThemeExtractor;
use crate::llm::{CompletionClient, build_client};
use crate::mapper::{Clock, SystemClock, TopicMapper};
use crate::model::{
    ExtractedTheme, LectureStatus, Page, PageRequest, ProblemSearchResult, TextChunk,
    TunedSettings,
};
use crate::retrieval::ProblemRetrievalEngine;
use crate::store::SqliteStore;
use crate::tuning::{TuningOptions, tune};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    pub tuning: TuningOptions,
    /// Restart a lecture that is still marked `processing`.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub lecture_id: String,
    pub status: LectureStatus,
    pub settings: TunedSettings,
    pub themes: Vec<ExtractedTheme>,
    pub chunk_count: usize,
    /// Chunks whose completion could not be parsed and were skipped.
    pub failed_chunks: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    #[default]
    Hybrid,
    Semantic,
}

/// What a run produced before it stopped, kept so a failure can still
/// persist it.
#[derive(Default)]
struct RunState {
    settings: Option<TunedSettings>,
    chunks: Vec<TextChunk>,
    per_chunk_themes: Vec<Vec<ExtractedTheme>>,
    aggregated: Option<Vec<ExtractedTheme>>,
}

/// Transcript to stored themes, and stored themes to recommended problems.
pub struct LecturePipeline {
    store: Arc<SqliteStore>,
    chunker: TranscriptChunker,
    extractor: ThemeExtractor,
    mapper: Arc<TopicMapper>,
    retrieval: ProblemRetrievalEngine,
    config: AppConfig,
}

impl LecturePipeline {
    pub fn new(
        store: Arc<SqliteStore>,
        client: Arc<dyn CompletionClient>,
        config: AppConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let extractor = ThemeExtractor::new(client, store.clone(), config.extraction.clone());
        let mapper = Arc::new(TopicMapper::new(store.clone(), config.mapper.clone(), clock));
        let retrieval =
            ProblemRetrievalEngine::new(store.clone(), store.clone(), config.retrieval.clone());

        Ok(Self {
            store,
            chunker: TranscriptChunker::new()?,
            extractor,
            mapper,
            retrieval,
            config,
        })
    }

    pub fn from_config(store: Arc<SqliteStore>, config: AppConfig) -> Result<Self> {
        let client = build_client(&config.llm)?;
        Self::new(store, client, config, Arc::new(SystemClock))
    }

    pub fn mapper(&self) -> &Arc<TopicMapper> {
        &self.mapper
    }

    pub fn retrieval(&self) -> &ProblemRetrievalEngine {
        &self.retrieval
    }

    pub fn process_transcript(
        &self,
        lecture_id: &str,
        title: Option<&str>,
        transcript: &str,
        options: ProcessOptions,
    ) -> Result<ProcessOutcome> {
        self.store
            .begin_lecture_run(lecture_id, title, transcript, options.force)?;
        info!(
            lecture_id,
            words = word_count(transcript),
            policy = self.config.extraction.failure_policy.as_str(),
            "lecture processing started"
        );

        let mut state = RunState::default();
        match self.run_stages(lecture_id, transcript, options, &mut state) {
            Ok(outcome) => {
                info!(
                    lecture_id,
                    chunks = outcome.chunk_count,
                    themes = outcome.themes.len(),
                    failed_chunks = outcome.failed_chunks,
                    "lecture processing completed"
                );
                Ok(outcome)
            }
            Err(error) => {
                self.record_failure(lecture_id, &state, &error);
                Err(error)
            }
        }
    }

    fn run_stages(
        &self,
        lecture_id: &str,
        transcript: &str,
        options: ProcessOptions,
        state: &mut RunState,
    ) -> Result<ProcessOutcome> {
        let settings = tune(transcript, options.tuning, &self.config.tuning);
        state.settings = Some(settings);
        self.store
            .save_lecture_settings(lecture_id, &settings)
            .context(PipelineStage::Persisting)?;

        state.chunks = if settings.chunk_level_enabled {
            self.chunker
                .chunk_semantically(transcript, settings.chunk_size_words)
        } else {
            whole_transcript_chunk(transcript)
        };
        self.store
            .replace_lecture_chunks(lecture_id, &state.chunks)
            .context(PipelineStage::Chunking)?;

        self.extractor.invalidate_topic_prompt_cache();
        let mut failed_chunks = 0usize;
        for chunk in &state.chunks {
            let extracted = if settings.chunk_level_enabled {
                self.extractor
                    .extract_themes_from_chunk(&chunk.text, settings.max_themes_per_chunk)
            } else {
                self.extractor
                    .extract_themes(&chunk.text, settings.max_final_themes)
            };

            match extracted {
                Ok(themes) => state.per_chunk_themes.push(themes),
                Err(error)
                    if self.config.extraction.failure_policy == FailurePolicy::BestEffort
                        && extraction_error_of(&error).is_some() =>
                {
                    let detail = format!("{error:#}");
                    warn!(
                        lecture_id,
                        chunk = chunk.index,
                        error = %detail,
                        "skipping chunk with unusable theme output"
                    );
                    failed_chunks += 1;
                    state.per_chunk_themes.push(Vec::new());
                }
                Err(error) => {
                    return Err(error
                        .context(format!("chunk {}", chunk.index))
                        .context(PipelineStage::Extraction));
                }
            }
        }

        let aggregated = if settings.chunk_level_enabled {
            aggregate_themes(
                &state.per_chunk_themes,
                settings.min_chunk_occurrences,
                settings.min_occurrence_ratio,
                settings.max_final_themes,
            )
        } else {
            aggregate_themes(&state.per_chunk_themes, 1, 0.0, settings.max_final_themes)
        };
        state.aggregated = Some(aggregated.clone());

        let themes = self
            .mapper
            .map_themes_to_existing_topics(aggregated)
            .context(PipelineStage::Mapping)?;

        self.store
            .replace_lecture_themes(lecture_id, &themes)
            .context(PipelineStage::Persisting)?;
        self.store
            .set_lecture_status(lecture_id, LectureStatus::Completed, None)
            .context(PipelineStage::Persisting)?;

        Ok(ProcessOutcome {
            lecture_id: lecture_id.to_string(),
            status: LectureStatus::Completed,
            settings,
            themes,
            chunk_count: state.chunks.len(),
            failed_chunks,
        })
    }

    /// Marks the lecture failed with a stage-tagged message. Themes found so
    /// far replace the stored ones only when there are any.
    fn record_failure(&self, lecture_id: &str, state: &RunState, error: &anyhow::Error) {
        let message = failure_message(error);
        warn!(lecture_id, error = %message, "lecture processing failed");

        let partial = match (&state.aggregated, state.settings) {
            (Some(aggregated), _) => aggregated.clone(),
            (None, Some(settings)) => {
                aggregate_themes(&state.per_chunk_themes, 1, 0.0, settings.max_final_themes)
            }
            (None, None) => Vec::new(),
        };
        if !partial.is_empty() {
            if let Err(save_error) = self.store.replace_lecture_themes(lecture_id, &partial) {
                let detail = format!("{save_error:#}");
                warn!(lecture_id, error = %detail, "failed to save partial themes");
            }
        }

        if let Err(status_error) =
            self.store
                .set_lecture_status(lecture_id, LectureStatus::Failed, Some(&message))
        {
            let detail = format!("{status_error:#}");
            warn!(lecture_id, error = %detail, "failed to mark lecture failed");
        }
    }

    /// `Ok(None)` when the lecture does not exist.
    pub fn get_recommended_problems(
        &self,
        lecture_id: &str,
        top_k: Option<usize>,
        page: PageRequest,
        mode: RetrievalMode,
    ) -> Result<Option<Page<ProblemSearchResult>>> {
        if self.store.load_lecture(lecture_id)?.is_none() {
            return Ok(None);
        }

        let themes = self.store.load_lecture_themes(lecture_id)?;
        let top_k = top_k.unwrap_or(self.config.retrieval.default_top_k).max(1);
        let results = match mode {
            RetrievalMode::Hybrid => self.retrieval.hybrid_search(&themes, top_k, page)?,
            RetrievalMode::Semantic => self.retrieval.search_by_themes(&themes, top_k, page)?,
        };
        Ok(Some(results))
    }
}

fn whole_transcript_chunk(transcript: &str) -> Vec<TextChunk> {
    let text = transcript.trim();
    if text.is_empty() {
        return Vec::new();
    }
    vec![TextChunk {
        text: text.to_string(),
        index: 0,
        token_start: 0,
        token_end: word_count(text),
    }]
}

/// `"<stage> failed: <cause chain>"`, with the stage taken from the error's
/// context. Errors raised before any stage began count as persisting.
pub fn failure_message(error: &anyhow::Error) -> String {
    let stage = error
        .downcast_ref::<PipelineStage>()
        .copied()
        .unwrap_or(PipelineStage::Persisting);
    let causes = error
        .chain()
        .map(|cause| cause.to_string())
        .filter(|cause| *cause != stage.to_string())
        .collect::<Vec<String>>();
    format!("{} failed: {}", stage.as_str(), causes.join(": "))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::llm::CompletionRequest;
    use crate::model::ProblemRecord;

    struct ScriptedClient {
        responses: Mutex<VecDeque<String>>,
        fallback: String,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn new(responses: &[&str], fallback: &str) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|value| value.to_string()).collect()),
                fallback: fallback.to_string(),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.calls.lock().expect("calls lock")
        }
    }

    impl CompletionClient for ScriptedClient {
        fn complete(&self, _request: &CompletionRequest) -> Result<String> {
            *self.calls.lock().expect("calls lock") += 1;
            let next = self.responses.lock().expect("responses lock").pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    const VECTOR_THEMES: &str = r#"[
        {"name": "Vectors and angles", "confidence": 0.9, "summary": "Angles between vectors.", "keywords": ["dot", "distance", "2d"]},
        {"name": "Quadratic equations", "confidence": 0.6, "summary": "Solving quadratics.", "keywords": ["roots", "factoring"]}
    ]"#;

    fn seeded_store() -> Arc<SqliteStore> {
        let store = Arc::new(SqliteStore::open_in_memory(128).expect("store should open"));
        let inserted = store
            .insert_problems(&[
                record("g1", "Geometry -> Vectors", "Find the angle between two vectors in 2d."),
                record("g2", "Geometry -> Vectors", "Compute the distance between two points."),
                record("a1", "Algebra", "Solve the quadratic equation by factoring."),
                record("l1", "Linear Algebra", "Find the eigenvalues of the matrix."),
            ])
            .expect("problems should insert");
        let engine = ProblemRetrievalEngine::new(
            store.clone(),
            store.clone(),
            AppConfig::default().retrieval,
        );
        engine.index_problems(&inserted).expect("problems should index");
        store
    }

    fn record(key: &str, topic: &str, statement: &str) -> ProblemRecord {
        ProblemRecord {
            source_key: key.to_string(),
            topic: topic.to_string(),
            subtopic: None,
            difficulty: None,
            statement: statement.to_string(),
            solution: None,
            source: None,
        }
    }

    fn pipeline(
        store: Arc<SqliteStore>,
        client: Arc<ScriptedClient>,
        policy: FailurePolicy,
    ) -> LecturePipeline {
        let mut config = AppConfig::default();
        config.extraction.failure_policy = policy;
        LecturePipeline::new(store, client, config, Arc::new(SystemClock))
            .expect("pipeline should build")
    }

    fn long_transcript() -> String {
        (0..8)
            .map(|paragraph| {
                (0..40)
                    .map(|sentence| {
                        format!("In part {paragraph} we measure angle {sentence} between vectors.")
                    })
                    .collect::<Vec<String>>()
                    .join(" ")
            })
            .collect::<Vec<String>>()
            .join("\n")
    }

    #[test]
    fn short_transcript_is_processed_in_one_call_and_mapped() {
        let store = seeded_store();
        let client = Arc::new(ScriptedClient::new(&[], VECTOR_THEMES));
        let pipeline = pipeline(store.clone(), client.clone(), FailurePolicy::BestEffort);

        let outcome = pipeline
            .process_transcript(
                "lec-short",
                Some("Vectors"),
                "Today we look at vectors and the angle between them.",
                ProcessOptions::default(),
            )
            .expect("processing should work");

        assert_eq!(client.calls(), 1);
        assert!(!outcome.settings.chunk_level_enabled);
        assert_eq!(outcome.chunk_count, 1);
        assert_eq!(outcome.themes[0].name, "Vectors and angles");
        assert_eq!(
            outcome.themes[0].mapped_topic.as_deref(),
            Some("Geometry -> Vectors")
        );

        let lecture = store
            .load_lecture("lec-short")
            .expect("load should work")
            .expect("lecture should exist");
        assert_eq!(lecture.status, LectureStatus::Completed);
        assert_eq!(lecture.settings, Some(outcome.settings));
        assert_eq!(
            store.load_lecture_themes("lec-short").expect("themes").len(),
            outcome.themes.len()
        );
    }

    #[test]
    fn best_effort_skips_unparseable_chunks() {
        let store = seeded_store();
        let client = Arc::new(ScriptedClient::new(&["not json at all"], VECTOR_THEMES));
        let pipeline = pipeline(store.clone(), client.clone(), FailurePolicy::BestEffort);

        let outcome = pipeline
            .process_transcript(
                "lec-long",
                None,
                &long_transcript(),
                ProcessOptions::default(),
            )
            .expect("best effort should complete");

        assert!(outcome.settings.chunk_level_enabled);
        assert!(outcome.chunk_count >= 2);
        assert_eq!(client.calls(), outcome.chunk_count);
        assert_eq!(outcome.failed_chunks, 1);
        assert!(outcome
            .themes
            .iter()
            .any(|theme| theme.name == "Vectors and angles"));
        assert_eq!(outcome.status, LectureStatus::Completed);
    }

    #[test]
    fn strict_policy_fails_the_lecture_and_keeps_chunks() {
        let store = seeded_store();
        let client = Arc::new(ScriptedClient::new(&[VECTOR_THEMES, "```json\n```"], VECTOR_THEMES));
        let pipeline = pipeline(store.clone(), client, FailurePolicy::Strict);

        let error = pipeline
            .process_transcript(
                "lec-strict",
                None,
                &long_transcript(),
                ProcessOptions::default(),
            )
            .expect_err("strict policy should fail");
        assert_eq!(
            error.downcast_ref::<PipelineStage>(),
            Some(&PipelineStage::Extraction)
        );

        let lecture = store
            .load_lecture("lec-strict")
            .expect("load should work")
            .expect("lecture should exist");
        assert_eq!(lecture.status, LectureStatus::Failed);
        let message = lecture.error_message.expect("failure message should be stored");
        assert!(message.starts_with("extraction failed: chunk 1"), "{message}");
        assert!(message.contains("empty response"), "{message}");
        assert!(!store.load_lecture_chunks("lec-strict").expect("chunks").is_empty());
        assert!(
            !store.load_lecture_themes("lec-strict").expect("themes").is_empty(),
            "themes from the first chunk are kept"
        );
        assert!(!lecture.transcript.is_empty());
    }

    #[test]
    fn recommendations_come_from_stored_themes() {
        let store = seeded_store();
        let client = Arc::new(ScriptedClient::new(&[], VECTOR_THEMES));
        let pipeline = pipeline(store.clone(), client, FailurePolicy::BestEffort);
        pipeline
            .process_transcript(
                "lec-rec",
                None,
                "Vectors and the angle between them.",
                ProcessOptions::default(),
            )
            .expect("processing should work");

        let page = pipeline
            .get_recommended_problems("lec-rec", Some(4), PageRequest::new(0, 10), RetrievalMode::Hybrid)
            .expect("recommendation should work")
            .expect("lecture should exist");
        assert!(!page.items.is_empty());
        assert!(page
            .items
            .iter()
            .all(|result| (0.0..=1.0).contains(&result.score)));
        assert!(page.items.iter().all(|result| result.problem_id != 4), "linear algebra is filtered");

        let missing = pipeline
            .get_recommended_problems("nope", None, PageRequest::new(0, 10), RetrievalMode::Semantic)
            .expect("lookup should work");
        assert!(missing.is_none());
    }

    #[test]
    fn failure_message_names_the_stage_once() {
        let error = anyhow::anyhow!("connection refused")
            .context("failed to save themes")
            .context(PipelineStage::Persisting);
        assert_eq!(
            failure_message(&error),
            "persisting failed: failed to save themes: connection refused"
        );

        let bare = anyhow::anyhow!("lecture 'x' is already processing");
        assert_eq!(
            failure_message(&bare),
            "persisting failed: lecture 'x' is already processing"
        );
    }
}
