use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use crate::config::ExtractionConfig;
use crate::error::Upstream;
use crate::llm::{CompletionClient, CompletionRequest};
use crate::model::ExtractedTheme;
use crate::store::ProblemRepository;

mod parse;
mod prompt;

/// Turns transcript text into candidate themes with one completion call per
/// invocation. Malformed completions surface as [`crate::error::ExtractionError`].
pub struct ThemeExtractor {
    client: Arc<dyn CompletionClient>,
    problems: Arc<dyn ProblemRepository>,
    config: ExtractionConfig,
    topic_section: Mutex<Option<String>>,
}

impl ThemeExtractor {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        problems: Arc<dyn ProblemRepository>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            client,
            problems,
            config,
            topic_section: Mutex::new(None),
        }
    }

    pub fn extract_themes_from_chunk(
        &self,
        chunk_text: &str,
        max_themes_per_chunk: usize,
    ) -> Result<Vec<ExtractedTheme>> {
        self.extract(chunk_text, max_themes_per_chunk, false)
    }

    pub fn extract_themes(&self, transcript: &str, max_themes: usize) -> Result<Vec<ExtractedTheme>> {
        self.extract(transcript, max_themes, true)
    }

    /// Forgets the cached topic listing so the next call re-reads the corpus.
    pub fn invalidate_topic_prompt_cache(&self) {
        if let Ok(mut cached) = self.topic_section.lock() {
            *cached = None;
        }
    }

    fn extract(&self, text: &str, max_themes: usize, whole_transcript: bool) -> Result<Vec<ExtractedTheme>> {
        if max_themes == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let topic_section = self.topic_section()?;
        let body = prompt::truncate_middle(
            text.trim(),
            self.config.max_input_chars,
            self.config.head_ratio,
        );
        let request = CompletionRequest {
            system_prompt: self
                .config
                .system_prompt
                .clone()
                .unwrap_or_else(|| prompt::DEFAULT_SYSTEM_PROMPT.to_string()),
            user_prompt: prompt::user_prompt(&topic_section, &body, max_themes, whole_transcript),
        };

        let raw = self.client.complete(&request)?;
        let themes = parse::parse_themes(&raw, max_themes)?;
        debug!(
            themes = themes.len(),
            input_chars = body.chars().count(),
            whole_transcript,
            "themes extracted"
        );
        Ok(themes)
    }

    fn topic_section(&self) -> Result<String> {
        let mut cached = self
            .topic_section
            .lock()
            .map_err(|_| anyhow!("topic prompt cache mutex poisoned"))?;
        if let Some(section) = cached.as_ref() {
            return Ok(section.clone());
        }

        let topics = self
            .problems
            .distinct_topics()
            .context("failed to list known topics for the extraction prompt")
            .context(Upstream::ProblemCorpus)?;
        let section = prompt::topic_listing(&topics, self.config.max_prompt_topics);
        *cached = Some(section.clone());
        Ok(section)
    }
}
