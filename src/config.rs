use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tuning: TuningConfig,
    pub extraction: ExtractionConfig,
    pub mapper: MapperConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub ingest: IngestConfig,
}

impl AppConfig {
    /// Defaults when `path` is `None`; an explicit path must exist and parse.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = serde_json::from_slice::<Self>(&raw)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        Ok(config)
    }

    /// Rejects inverted min/max pairs.
    pub fn validate(&self) -> Result<()> {
        let tuning = &self.tuning;
        for (name, min, max) in [
            ("tuning.chunk_count", tuning.chunk_count_min, tuning.chunk_count_max),
            ("tuning.chunk_words", tuning.chunk_words_min, tuning.chunk_words_max),
            ("tuning.theme_cap", tuning.theme_cap_min, tuning.theme_cap_max),
        ] {
            if min > max {
                bail!("{name}_min ({min}) is greater than {name}_max ({max})");
            }
        }
        Ok(())
    }
}

/// One end of the granularity interpolation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GranularityEndpoint {
    pub chunk_minutes: f64,
    pub themes_per_chunk: f64,
    pub min_chunk_occurrences: f64,
    pub min_occurrence_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    pub words_per_minute: f64,
    pub min_lecture_minutes: f64,
    pub short_transcript_words: usize,
    pub short_transcript_max_themes: usize,
    pub minutes_per_theme: f64,
    pub theme_cap_min: usize,
    pub theme_cap_max: usize,
    pub coarse: GranularityEndpoint,
    pub fine: GranularityEndpoint,
    pub chunk_count_min: usize,
    pub chunk_count_max: usize,
    pub chunk_words_min: usize,
    pub chunk_words_max: usize,
    pub default_granularity: u8,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            words_per_minute: 150.0,
            min_lecture_minutes: 5.0,
            short_transcript_words: 1200,
            short_transcript_max_themes: 6,
            minutes_per_theme: 25.0,
            theme_cap_min: 2,
            theme_cap_max: 12,
            coarse: GranularityEndpoint {
                chunk_minutes: 15.0,
                themes_per_chunk: 3.0,
                min_chunk_occurrences: 1.0,
                min_occurrence_ratio: 0.05,
            },
            fine: GranularityEndpoint {
                chunk_minutes: 4.0,
                themes_per_chunk: 6.0,
                min_chunk_occurrences: 2.0,
                min_occurrence_ratio: 0.2,
            },
            chunk_count_min: 3,
            chunk_count_max: 30,
            chunk_words_min: 600,
            chunk_words_max: 2500,
            default_granularity: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A chunk whose LLM output cannot be parsed contributes no themes.
    BestEffort,
    /// Any unparseable LLM output fails the lecture.
    Strict,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BestEffort => "best_effort",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub failure_policy: FailurePolicy,
    pub max_prompt_topics: usize,
    pub max_input_chars: usize,
    pub head_ratio: f64,
    pub system_prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::BestEffort,
            max_prompt_topics: 120,
            max_input_chars: 12_000,
            head_ratio: 0.65,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HintSet {
    pub name: String,
    pub tokens: Vec<String>,
}

/// Adds `delta` to a candidate topic when `signal` fired, `absent_signal` did
/// not, and the lowercased topic contains one of `topic_contains_any` and none
/// of `topic_contains_none`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRule {
    pub signal: String,
    #[serde(default)]
    pub absent_signal: Option<String>,
    pub topic_contains_any: Vec<String>,
    #[serde(default)]
    pub topic_contains_none: Vec<String>,
    pub delta: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub min_score: i32,
    pub catalog_ttl_seconds: i64,
    pub fallback_scan_limit: usize,
    pub token_match_weight: i32,
    pub name_substring_bonus: i32,
    pub name_substring_min_chars: usize,
    pub leaf_token_bonus: i32,
    pub short_tokens: Vec<String>,
    pub stopwords: Vec<String>,
    pub hint_sets: Vec<HintSet>,
    pub rules: Vec<ScoreRule>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn rule(
    signal: &str,
    absent_signal: Option<&str>,
    topic_contains_any: &[&str],
    topic_contains_none: &[&str],
    delta: i32,
) -> ScoreRule {
    ScoreRule {
        signal: signal.to_string(),
        absent_signal: absent_signal.map(str::to_string),
        topic_contains_any: strings(topic_contains_any),
        topic_contains_none: strings(topic_contains_none),
        delta,
    }
}

const LINEAR_ALGEBRA_TOPIC_TERMS: &[&str] = &["linear algebra", "linalg", "matrix", "matrices"];
const GEOMETRY_TOPIC_TERMS: &[&str] = &["geometry", "coordinate", "trigonometry"];
const NON_EUCLIDEAN_TOPIC_TERMS: &[&str] = &["non-euclidean", "non euclidean", "hyperbolic", "spherical"];

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            min_score: 4,
            catalog_ttl_seconds: 600,
            fallback_scan_limit: 200,
            token_match_weight: 2,
            name_substring_bonus: 8,
            name_substring_min_chars: 4,
            leaf_token_bonus: 3,
            short_tokens: strings(&["2d", "3d"]),
            stopwords: strings(&[
                "and", "the", "for", "with", "from", "into", "that", "this", "these", "those",
                "are", "was", "were", "how", "what", "why", "when", "use", "using", "its",
                "their", "about", "between", "of", "to", "in", "on", "an", "introduction",
                "basics", "concept", "concepts", "overview", "lecture", "topic", "problem",
                "problems", "example", "examples",
            ]),
            hint_sets: vec![
                HintSet {
                    name: "geometry".to_string(),
                    tokens: strings(&[
                        "geometry", "geometric", "angle", "angles", "triangle", "triangles",
                        "circle", "circles", "polygon", "polygons", "distance", "perimeter",
                        "area", "congruent", "similar", "parallel", "perpendicular", "2d", "3d",
                        "coordinate", "coordinates", "slope", "midpoint", "euclidean", "plane",
                    ]),
                },
                HintSet {
                    name: "linear_algebra".to_string(),
                    tokens: strings(&[
                        "matrix", "matrices", "eigenvalue", "eigenvalues", "eigenvector",
                        "eigenvectors", "determinant", "determinants", "span", "subspace",
                        "subspaces", "basis", "kernel", "nullspace", "rank", "linear",
                        "independence", "transformation", "transformations", "diagonalization",
                        "orthogonalization",
                    ]),
                },
                HintSet {
                    name: "euclidean".to_string(),
                    tokens: strings(&["euclidean", "euclid", "parallel", "postulate", "postulates"]),
                },
                HintSet {
                    name: "non_euclidean".to_string(),
                    tokens: strings(&[
                        "hyperbolic", "spherical", "elliptic", "curvature", "geodesic", "geodesics",
                        "riemannian",
                    ]),
                },
            ],
            rules: vec![
                rule("geometry", None, &["geometry"], &[], 10),
                rule("geometry", None, &["coordinate"], &[], 4),
                rule("linear_algebra", None, &["linear algebra", "linalg"], &[], 6),
                rule("linear_algebra", None, &["matrix"], &[], 2),
                rule(
                    "geometry",
                    Some("linear_algebra"),
                    LINEAR_ALGEBRA_TOPIC_TERMS,
                    &[],
                    -8,
                ),
                rule(
                    "linear_algebra",
                    Some("geometry"),
                    GEOMETRY_TOPIC_TERMS,
                    &[],
                    -8,
                ),
                rule(
                    "euclidean",
                    Some("non_euclidean"),
                    NON_EUCLIDEAN_TOPIC_TERMS,
                    &[],
                    -8,
                ),
                rule(
                    "non_euclidean",
                    Some("euclidean"),
                    &["euclidean"],
                    NON_EUCLIDEAN_TOPIC_TERMS,
                    -8,
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub topic_match_base_score: f64,
    pub semantic_boost_factor: f64,
    pub document_id_prefix: String,
    pub document_type: String,
    pub default_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            topic_match_base_score: 0.7,
            semantic_boost_factor: 0.5,
            document_id_prefix: "problem_".to_string(),
            document_type: "problem".to_string(),
            default_top_k: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Command,
    OpenaiCompatible,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub command: String,
    pub args: Vec<String>,
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenaiCompatible,
            command: "llm".to_string(),
            args: Vec::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_seconds: 120,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub batch_size: usize,
    pub request_delay_ms: u64,
    pub max_rows: Option<usize>,
    pub topic_field: String,
    pub subtopic_field: Option<String>,
    pub statement_field: String,
    pub difficulty_field: Option<String>,
    pub solution_field: Option<String>,
    pub source_label: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            request_delay_ms: 1000,
            max_rows: None,
            topic_field: "type".to_string(),
            subtopic_field: None,
            statement_field: "problem".to_string(),
            difficulty_field: Some("level".to_string()),
            solution_field: Some("solution".to_string()),
            source_label: None,
        }
    }
}
