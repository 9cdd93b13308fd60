use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::debug;

use crate::config::{MapperConfig, ScoreRule};
use crate::model::ExtractedTheme;
use crate::store::ProblemRepository;

mod catalog;
mod tokens;

pub use catalog::{CatalogCache, Clock, SystemClock, TopicCatalog};
pub use tokens::TokenFilter;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicMatch {
    pub topic: String,
    pub score: i32,
}

/// Lexical classifier from free-form themes onto the corpus topic taxonomy.
pub struct TopicMapper {
    cache: CatalogCache,
    filter: TokenFilter,
    hint_sets: Vec<(String, HashSet<String>)>,
    config: MapperConfig,
}

impl TopicMapper {
    pub fn new(
        problems: Arc<dyn ProblemRepository>,
        config: MapperConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let filter = TokenFilter::from_config(&config);
        let hint_sets = config
            .hint_sets
            .iter()
            .map(|set| {
                (
                    set.name.clone(),
                    set.tokens
                        .iter()
                        .map(|token| token.trim().to_lowercase())
                        .collect::<HashSet<String>>(),
                )
            })
            .collect();
        let cache = CatalogCache::new(problems, clock, filter.clone(), config.catalog_ttl_seconds);

        Self {
            cache,
            filter,
            hint_sets,
            config,
        }
    }

    /// Overwrites every theme's `mapped_topic` with its best catalog match, or
    /// `None` when nothing clears the minimum score.
    pub fn map_themes_to_existing_topics(
        &self,
        themes: Vec<ExtractedTheme>,
    ) -> Result<Vec<ExtractedTheme>> {
        let catalog = self.cache.get()?;
        let mapped = themes
            .into_iter()
            .map(|mut theme| {
                theme.mapped_topic = self
                    .best_match_in(&catalog, &theme)
                    .map(|matched| matched.topic);
                theme
            })
            .collect::<Vec<ExtractedTheme>>();

        debug!(
            themes = mapped.len(),
            mapped = mapped.iter().filter(|theme| theme.mapped_topic.is_some()).count(),
            "themes mapped to topics"
        );
        Ok(mapped)
    }

    pub fn map_theme(&self, theme: &ExtractedTheme) -> Result<Option<TopicMatch>> {
        let catalog = self.cache.get()?;
        Ok(self.best_match_in(&catalog, theme))
    }

    pub fn invalidate_catalog(&self) {
        self.cache.invalidate();
    }

    fn best_match_in(&self, catalog: &TopicCatalog, theme: &ExtractedTheme) -> Option<TopicMatch> {
        if catalog.is_empty() {
            return None;
        }

        let query_text = format!(
            "{} {} {}",
            theme.name,
            theme.keywords.join(" "),
            theme.summary
        );
        let query_tokens = self.filter.tokens(&query_text);
        if query_tokens.is_empty() {
            return None;
        }

        // Keyed by catalog position so ties resolve to the earlier topic.
        let mut candidates = BTreeMap::<usize, i32>::new();
        for token in &query_tokens {
            if let Some(positions) = catalog.token_index.get(token) {
                for position in positions {
                    *candidates.entry(*position).or_insert(0) += self.config.token_match_weight;
                }
            }
        }
        if candidates.is_empty() {
            for position in 0..catalog.topics.len().min(self.config.fallback_scan_limit) {
                candidates.insert(position, 0);
            }
        }

        let signals = self.signals(&query_tokens);
        let theme_name = theme.normalized_name();

        let mut best: Option<(usize, i32)> = None;
        for (position, base) in candidates {
            let topic = &catalog.topics[position];
            let score = base + self.adjustment(topic, &signals, &theme_name, &query_tokens);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((position, score));
            }
        }

        best.filter(|(_, score)| *score >= self.config.min_score)
            .map(|(position, score)| TopicMatch {
                topic: catalog.topics[position].clone(),
                score,
            })
    }

    /// Names of the hint sets that share at least one token with the query.
    fn signals(&self, query_tokens: &BTreeSet<String>) -> HashSet<&str> {
        self.hint_sets
            .iter()
            .filter(|(_, tokens)| query_tokens.iter().any(|token| tokens.contains(token)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    fn adjustment(
        &self,
        topic: &str,
        signals: &HashSet<&str>,
        theme_name: &str,
        query_tokens: &BTreeSet<String>,
    ) -> i32 {
        let topic_lower = topic.to_lowercase();

        let mut delta = self
            .config
            .rules
            .iter()
            .filter(|rule| rule_applies(rule, signals, &topic_lower))
            .map(|rule| rule.delta)
            .sum::<i32>();

        if theme_name.chars().count() >= self.config.name_substring_min_chars
            && topic_lower.contains(theme_name)
        {
            delta += self.config.name_substring_bonus;
        }

        let leaf = TopicCatalog::leaf_segment(topic);
        let leaf_hits = query_tokens.iter().filter(|token| **token == leaf).count() as i32;
        delta + leaf_hits * self.config.leaf_token_bonus
    }
}

fn rule_applies(rule: &ScoreRule, signals: &HashSet<&str>, topic_lower: &str) -> bool {
    signals.contains(rule.signal.as_str())
        && rule
            .absent_signal
            .as_deref()
            .is_none_or(|absent| !signals.contains(absent))
        && rule
            .topic_contains_any
            .iter()
            .any(|term| topic_lower.contains(term.as_str()))
        && !rule
            .topic_contains_none
            .iter()
            .any(|term| topic_lower.contains(term.as_str()))
}
