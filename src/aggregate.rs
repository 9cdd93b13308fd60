use std::collections::{HashMap, HashSet};

use crate::model::ExtractedTheme;

const MAX_KEYWORDS: usize = 10;

/// All occurrences of one normalized theme name, in chunk order.
struct ThemeGroup<'a> {
    occurrences: Vec<&'a ExtractedTheme>,
    chunk_count: usize,
}

/// Merges per-chunk theme lists into one ranked list.
///
/// A theme counts once per chunk no matter how often it is repeated there, and
/// survives only if it appears in at least
/// `max(min_chunk_occurrences, ceil(chunks * min_occurrence_ratio))` chunks.
pub fn aggregate_themes(
    per_chunk_themes: &[Vec<ExtractedTheme>],
    min_chunk_occurrences: usize,
    min_occurrence_ratio: f64,
    max_final_themes: usize,
) -> Vec<ExtractedTheme> {
    let threshold = occurrence_threshold(
        per_chunk_themes.len(),
        min_chunk_occurrences,
        min_occurrence_ratio,
    );

    let mut order = Vec::<String>::new();
    let mut groups = HashMap::<String, ThemeGroup<'_>>::new();
    for chunk in per_chunk_themes {
        let mut seen_in_chunk = HashSet::<String>::new();
        for theme in chunk {
            let key = theme.normalized_name();
            if key.is_empty() {
                continue;
            }
            let group = groups.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                ThemeGroup {
                    occurrences: Vec::new(),
                    chunk_count: 0,
                }
            });
            group.occurrences.push(theme);
            if seen_in_chunk.insert(key) {
                group.chunk_count += 1;
            }
        }
    }

    let mut merged = order
        .iter()
        .filter_map(|key| groups.get(key))
        .filter(|group| group.chunk_count >= threshold)
        .map(merge_group)
        .collect::<Vec<ExtractedTheme>>();

    merged.sort_by(|left, right| right.confidence.total_cmp(&left.confidence));
    merged.truncate(max_final_themes);
    merged
}

pub fn occurrence_threshold(
    total_chunks: usize,
    min_chunk_occurrences: usize,
    min_occurrence_ratio: f64,
) -> usize {
    let by_ratio = (total_chunks as f64 * min_occurrence_ratio.max(0.0)).ceil() as usize;
    min_chunk_occurrences.max(by_ratio)
}

fn merge_group(group: &ThemeGroup<'_>) -> ExtractedTheme {
    let occurrences = &group.occurrences;

    let name = most_frequent(occurrences.iter().map(|theme| theme.name.trim()))
        .unwrap_or_default()
        .to_string();
    let confidence = occurrences.iter().map(|theme| theme.confidence).sum::<f64>()
        / occurrences.len().max(1) as f64;

    let mut keywords = Vec::<String>::new();
    let mut seen_keywords = HashSet::<String>::new();
    for keyword in occurrences.iter().flat_map(|theme| theme.keywords.iter()) {
        if keywords.len() == MAX_KEYWORDS {
            break;
        }
        let trimmed = keyword.trim();
        if !trimmed.is_empty() && seen_keywords.insert(trimmed.to_lowercase()) {
            keywords.push(trimmed.to_string());
        }
    }

    // First-seen wins among equally long summaries.
    let summary = occurrences
        .iter()
        .map(|theme| theme.summary.as_str())
        .fold("", |best, candidate| {
            if candidate.chars().count() > best.chars().count() {
                candidate
            } else {
                best
            }
        })
        .to_string();

    let mapped_topic = most_frequent(
        occurrences
            .iter()
            .filter_map(|theme| theme.mapped_topic.as_deref()),
    )
    .map(str::to_string);

    ExtractedTheme {
        name,
        confidence: confidence.clamp(0.0, 1.0),
        summary,
        keywords,
        mapped_topic,
    }
}

/// Most frequent value; the earliest one wins a tie.
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts = Vec::<(&'a str, usize)>::new();
    for value in values {
        match counts.iter_mut().find(|(existing, _)| *existing == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for (value, count) in counts {
        if best.is_none_or(|(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}
