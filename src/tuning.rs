use crate::chunker::word_count;
use crate::config::TuningConfig;
use crate::model::TunedSettings;

#[derive(Debug, Clone, Copy, Default)]
pub struct TuningOptions {
    /// 1 (coarse) ..= 10 (fine); `None` uses the configured default.
    pub granularity: Option<u8>,
    pub lecture_minutes: Option<f64>,
}

pub fn tune(transcript: &str, options: TuningOptions, config: &TuningConfig) -> TunedSettings {
    tune_for_word_count(word_count(transcript), options, config)
}

pub fn tune_for_word_count(
    total_words: usize,
    options: TuningOptions,
    config: &TuningConfig,
) -> TunedSettings {
    let granularity = options
        .granularity
        .unwrap_or(config.default_granularity)
        .clamp(1, 10);
    let minutes = options
        .lecture_minutes
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or_else(|| {
            (total_words as f64 / config.words_per_minute.max(1.0)).max(config.min_lecture_minutes)
        });

    let theme_cap = theme_cap(minutes, granularity, config);

    if total_words < config.short_transcript_words {
        return TunedSettings {
            chunk_level_enabled: false,
            chunk_size_words: total_words.max(1),
            max_themes_per_chunk: theme_cap,
            max_final_themes: theme_cap.min(config.short_transcript_max_themes),
            min_chunk_occurrences: 1,
            min_occurrence_ratio: 0.0,
        };
    }

    let t = granularity_fraction(granularity);
    let coarse = &config.coarse;
    let fine = &config.fine;

    let chunk_minutes = lerp(coarse.chunk_minutes, fine.chunk_minutes, t).max(0.5);
    let chunk_count = ((minutes / chunk_minutes).round() as usize)
        .clamp(
            config.chunk_count_min,
            config.chunk_count_max.max(config.chunk_count_min),
        );
    // an inverted range resolves to its lower bound
    let chunk_size_words = (total_words / chunk_count.max(1)).clamp(
        config.chunk_words_min,
        config.chunk_words_max.max(config.chunk_words_min),
    );

    let max_themes_per_chunk = lerp(coarse.themes_per_chunk, fine.themes_per_chunk, t)
        .round()
        .max(1.0) as usize;
    let min_chunk_occurrences = lerp(
        coarse.min_chunk_occurrences,
        fine.min_chunk_occurrences,
        t,
    )
    .round()
    .max(1.0) as usize;
    let min_occurrence_ratio =
        lerp(coarse.min_occurrence_ratio, fine.min_occurrence_ratio, t).clamp(0.0, 1.0);

    TunedSettings {
        chunk_level_enabled: true,
        chunk_size_words,
        max_themes_per_chunk,
        max_final_themes: theme_cap,
        min_chunk_occurrences,
        min_occurrence_ratio,
    }
}

fn theme_cap(minutes: f64, granularity: u8, config: &TuningConfig) -> usize {
    let min = config.theme_cap_min as i64;
    let max = config.theme_cap_max.max(config.theme_cap_min) as i64;
    let length_based =
        ((minutes / config.minutes_per_theme.max(1.0)).round() as i64 + 1).clamp(min, max);
    let adjustment = match granularity {
        0..=3 => -1,
        8.. => 1,
        _ => 0,
    };
    (length_based + adjustment).clamp(min, max) as usize
}

fn granularity_fraction(granularity: u8) -> f64 {
    ((f64::from(granularity) - 1.0) / 9.0).clamp(0.0, 1.0)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transcript_of(words: usize) -> String {
        vec!["word"; words].join(" ")
    }

    fn at(granularity: u8) -> TuningOptions {
        TuningOptions {
            granularity: Some(granularity),
            lecture_minutes: None,
        }
    }

    #[test]
    fn short_transcripts_disable_chunk_level_extraction() {
        let config = TuningConfig::default();
        let settings = tune(&transcript_of(1000), at(5), &config);
        assert!(!settings.chunk_level_enabled);
        assert!(settings.max_final_themes <= 6);
        assert_eq!(settings.min_chunk_occurrences, 1);
    }

    #[test]
    fn coarse_granularity_uses_larger_chunks_than_fine() {
        let config = TuningConfig::default();
        let transcript = transcript_of(6000);
        let coarse = tune(&transcript, at(1), &config);
        let fine = tune(&transcript, at(10), &config);

        assert!(coarse.chunk_level_enabled && fine.chunk_level_enabled);
        assert_eq!(coarse.chunk_size_words, 2000);
        assert_eq!(fine.chunk_size_words, 600);
        assert!(coarse.chunk_size_words > fine.chunk_size_words);
        assert_eq!(coarse.max_themes_per_chunk, 3);
        assert_eq!(fine.max_themes_per_chunk, 6);
    }

    #[test]
    fn granularity_is_monotonic_for_fixed_length() {
        let config = TuningConfig::default();
        for words in [1500usize, 6000, 12_000, 40_000] {
            let mut previous: Option<TunedSettings> = None;
            for level in 1..=10u8 {
                let current = tune_for_word_count(words, at(level), &config);
                if let Some(previous) = previous {
                    assert!(
                        current.chunk_size_words <= previous.chunk_size_words,
                        "chunk size grew at level {level} for {words} words"
                    );
                    assert!(
                        current.max_themes_per_chunk >= previous.max_themes_per_chunk,
                        "themes per chunk shrank at level {level} for {words} words"
                    );
                }
                previous = Some(current);
            }
        }
    }

    #[test]
    fn theme_cap_follows_length_and_granularity() {
        let config = TuningConfig::default();
        let options = |granularity| TuningOptions {
            granularity: Some(granularity),
            lecture_minutes: Some(100.0),
        };

        // round(100 / 25) + 1 = 5
        assert_eq!(tune_for_word_count(15_000, options(5), &config).max_final_themes, 5);
        assert_eq!(tune_for_word_count(15_000, options(2), &config).max_final_themes, 4);
        assert_eq!(tune_for_word_count(15_000, options(9), &config).max_final_themes, 6);

        let marathon = TuningOptions {
            granularity: Some(10),
            lecture_minutes: Some(1000.0),
        };
        assert_eq!(tune_for_word_count(150_000, marathon, &config).max_final_themes, 12);
    }

    #[test]
    fn minutes_are_estimated_with_a_floor() {
        let config = TuningConfig::default();
        // 300 words -> 2 minutes, floored to 5 -> round(0.2) + 1 = 1 -> clamped to 2
        let settings = tune_for_word_count(300, at(5), &config);
        assert_eq!(settings.max_final_themes, 2);
    }

    #[test]
    fn chunk_sizes_respect_word_bounds() {
        let config = TuningConfig::default();
        let huge = tune_for_word_count(500_000, at(1), &config);
        assert_eq!(huge.chunk_size_words, 2500);
        let small = tune_for_word_count(1300, at(10), &config);
        assert_eq!(small.chunk_size_words, 600);
    }

    #[test]
    fn inverted_bounds_fall_back_to_the_lower_bound() {
        let config = serde_json::from_str::<TuningConfig>(
            r#"{"chunk_words_min": 3000, "chunk_count_min": 40}"#,
        )
        .expect("partial tuning config should parse");
        let settings = tune_for_word_count(6000, TuningOptions::default(), &config);
        assert!(settings.chunk_level_enabled);
        assert_eq!(settings.chunk_size_words, 3000);
    }
}
