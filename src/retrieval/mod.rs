use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::error::Upstream;
use crate::model::{ExtractedTheme, Page, PageRequest, Problem, ProblemSearchResult};
use crate::semantic::problem_document_content;
use crate::store::{ProblemRepository, VectorDocument, VectorHit, VectorStore};

#[cfg(test)]
mod tests;

/// A vector hit that resolved to a problem and passed the topic filter.
struct SemanticCandidate {
    problem_id: i64,
    similarity: f64,
}

pub struct ProblemRetrievalEngine {
    vectors: Arc<dyn VectorStore>,
    problems: Arc<dyn ProblemRepository>,
    config: RetrievalConfig,
}

impl ProblemRetrievalEngine {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        problems: Arc<dyn ProblemRepository>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vectors,
            problems,
            config,
        }
    }

    /// Pure vector retrieval. A problem keeps the score of the first theme
    /// that admitted it.
    pub fn search_by_themes(
        &self,
        themes: &[ExtractedTheme],
        top_k: usize,
        page: PageRequest,
    ) -> Result<Page<ProblemSearchResult>> {
        if themes.is_empty() {
            return Ok(Page::empty(page));
        }

        let allowed_topics = mapped_topics(themes);
        let mut seen = HashSet::<i64>::new();
        let mut results = Vec::<ProblemSearchResult>::new();
        for theme in themes {
            for candidate in self.semantic_candidates(theme, top_k, &allowed_topics)? {
                if !seen.insert(candidate.problem_id) {
                    continue;
                }
                results.push(ProblemSearchResult {
                    problem_id: candidate.problem_id,
                    score: clamp_score(candidate.similarity * theme.confidence),
                    matched_theme: Some(theme.name.clone()),
                });
            }
        }

        sort_by_score(&mut results);
        info!(
            themes = themes.len(),
            candidates = results.len(),
            page = page.page,
            "semantic search completed"
        );
        Ok(Page::slice(results, page))
    }

    /// Topic-filter pass followed by a semantic pass that boosts topic hits
    /// and adds new problems.
    pub fn hybrid_search(
        &self,
        themes: &[ExtractedTheme],
        top_k: usize,
        page: PageRequest,
    ) -> Result<Page<ProblemSearchResult>> {
        if themes.is_empty() {
            return Ok(Page::empty(page));
        }

        let allowed_topics = mapped_topics(themes);
        let mut order = Vec::<i64>::new();
        let mut merged = HashMap::<i64, ProblemSearchResult>::new();

        let topic_matches = if allowed_topics.is_empty() {
            Vec::new()
        } else {
            self.problems
                .find_by_topics(&allowed_topics)
                .context("failed to load problems for mapped topics")
                .context(Upstream::ProblemCorpus)?
        };
        let base_score = clamp_score(self.config.topic_match_base_score);
        for problem in &topic_matches {
            if merged.contains_key(&problem.problem_id) {
                continue;
            }
            let matched_theme = themes
                .iter()
                .find(|theme| theme.mapped_topic.as_deref() == Some(problem.topic.as_str()))
                .map(|theme| theme.name.clone());
            order.push(problem.problem_id);
            merged.insert(
                problem.problem_id,
                ProblemSearchResult {
                    problem_id: problem.problem_id,
                    score: base_score,
                    matched_theme,
                },
            );
        }
        let topic_ids = merged.keys().copied().collect::<HashSet<i64>>();

        let mut boosted = HashSet::<i64>::new();
        for theme in themes {
            for candidate in self.semantic_candidates(theme, top_k, &allowed_topics)? {
                match merged.get_mut(&candidate.problem_id) {
                    Some(existing) => {
                        if topic_ids.contains(&candidate.problem_id)
                            && boosted.insert(candidate.problem_id)
                        {
                            existing.score = clamp_score(
                                existing.score
                                    + candidate.similarity * self.config.semantic_boost_factor,
                            );
                        }
                    }
                    None => {
                        order.push(candidate.problem_id);
                        merged.insert(
                            candidate.problem_id,
                            ProblemSearchResult {
                                problem_id: candidate.problem_id,
                                score: clamp_score(candidate.similarity * theme.confidence),
                                matched_theme: Some(theme.name.clone()),
                            },
                        );
                    }
                }
            }
        }

        let mut results = order
            .into_iter()
            .filter_map(|problem_id| merged.remove(&problem_id))
            .collect::<Vec<ProblemSearchResult>>();
        sort_by_score(&mut results);

        info!(
            themes = themes.len(),
            topic_matches = topic_ids.len(),
            boosted = boosted.len(),
            candidates = results.len(),
            page = page.page,
            "hybrid search completed"
        );
        Ok(Page::slice(results, page))
    }

    pub fn index_problem(&self, problem: &Problem) -> Result<()> {
        self.index_problems(std::slice::from_ref(problem))?;
        Ok(())
    }

    /// Writes or overwrites one vector document per problem, keyed by the raw
    /// problem id.
    pub fn index_problems(&self, problems: &[Problem]) -> Result<usize> {
        if problems.is_empty() {
            return Ok(0);
        }

        let documents = problems
            .iter()
            .map(|problem| self.problem_document(problem))
            .collect::<Vec<VectorDocument>>();
        let written = self
            .vectors
            .upsert_documents(&documents)
            .with_context(|| format!("failed to index {} problems", documents.len()))
            .context(Upstream::VectorStore)?;
        debug!(problems = written, "problems indexed");
        Ok(written)
    }

    fn problem_document(&self, problem: &Problem) -> VectorDocument {
        let mut metadata = Map::new();
        metadata.insert("problem_id".to_string(), Value::from(problem.problem_id));
        metadata.insert("topic".to_string(), Value::from(problem.topic.clone()));
        metadata.insert(
            "type".to_string(),
            Value::from(self.config.document_type.clone()),
        );
        if let Some(subtopic) = &problem.subtopic {
            metadata.insert("subtopic".to_string(), Value::from(subtopic.clone()));
        }
        if let Some(difficulty) = &problem.difficulty {
            metadata.insert("difficulty".to_string(), Value::from(difficulty.clone()));
        }

        VectorDocument {
            document_id: problem.problem_id.to_string(),
            content: problem_document_content(problem),
            metadata,
        }
    }

    fn semantic_candidates(
        &self,
        theme: &ExtractedTheme,
        top_k: usize,
        allowed_topics: &BTreeSet<String>,
    ) -> Result<Vec<SemanticCandidate>> {
        let query = theme_query(theme);
        let hits = self
            .vectors
            .similarity_search(&query, top_k)
            .with_context(|| format!("vector search failed for theme '{}'", theme.name))
            .context(Upstream::VectorStore)?;

        let mut candidates = Vec::<SemanticCandidate>::new();
        for hit in &hits {
            let Some(problem_id) = self.resolve_problem_id(hit) else {
                debug!(document_id = %hit.document_id, "skipping non-problem vector document");
                continue;
            };
            let Some(problem) = self
                .problems
                .find_by_id(problem_id)
                .with_context(|| format!("failed to load problem {problem_id}"))
                .context(Upstream::ProblemCorpus)?
            else {
                debug!(problem_id, "vector document has no matching problem");
                continue;
            };
            if !passes_topic_filter(theme.mapped_topic.as_deref(), allowed_topics, &problem.topic) {
                continue;
            }
            candidates.push(SemanticCandidate {
                problem_id,
                similarity: hit.score(),
            });
        }
        Ok(candidates)
    }

    fn resolve_problem_id(&self, hit: &VectorHit) -> Option<i64> {
        let raw = hit.document_id.trim();
        raw.strip_prefix(self.config.document_id_prefix.as_str())
            .unwrap_or(raw)
            .parse::<i64>()
            .ok()
    }
}

/// Vector query for one theme. The `Topic:` anchor keeps generic words from
/// drifting into other domains.
pub fn theme_query(theme: &ExtractedTheme) -> String {
    let mut parts = Vec::<String>::new();
    if let Some(topic) = theme.mapped_topic.as_deref() {
        parts.push(format!("Topic: {topic}"));
    }
    parts.push(theme.name.trim().to_string());
    if !theme.keywords.is_empty() {
        parts.push(theme.keywords.join(", "));
    }
    if !theme.summary.trim().is_empty() {
        parts.push(theme.summary.trim().to_string());
    }
    parts.join("\n")
}

fn mapped_topics(themes: &[ExtractedTheme]) -> BTreeSet<String> {
    themes
        .iter()
        .filter_map(|theme| theme.mapped_topic.clone())
        .collect()
}

/// A mapped theme admits only its own topic; an unmapped theme admits any
/// topic some other theme mapped to, or everything when none did.
fn passes_topic_filter(
    theme_topic: Option<&str>,
    allowed_topics: &BTreeSet<String>,
    problem_topic: &str,
) -> bool {
    match theme_topic {
        Some(topic) => problem_topic == topic,
        None => allowed_topics.is_empty() || allowed_topics.contains(problem_topic),
    }
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

fn sort_by_score(results: &mut [ProblemSearchResult]) {
    results.sort_by(|left, right| right.score.total_cmp(&left.score));
}
