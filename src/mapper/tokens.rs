use std::collections::{BTreeSet, HashSet};

use crate::config::MapperConfig;

const MIN_TOKEN_CHARS: usize = 3;

/// Lowercased alphanumeric tokens, with short words dropped unless
/// allow-listed and stopwords removed.
#[derive(Debug, Clone)]
pub struct TokenFilter {
    short_tokens: HashSet<String>,
    stopwords: HashSet<String>,
}

impl TokenFilter {
    pub fn from_config(config: &MapperConfig) -> Self {
        Self {
            short_tokens: lowercase_set(&config.short_tokens),
            stopwords: lowercase_set(&config.stopwords),
        }
    }

    pub fn tokens(&self, text: &str) -> BTreeSet<String> {
        text.split(|ch: char| !ch.is_alphanumeric())
            .filter(|raw| !raw.is_empty())
            .map(str::to_lowercase)
            .filter(|token| {
                token.chars().count() >= MIN_TOKEN_CHARS || self.short_tokens.contains(token)
            })
            .filter(|token| !self.stopwords.contains(token))
            .collect()
    }
}

fn lowercase_set(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}
