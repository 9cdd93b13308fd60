use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    pub text: String,
    pub index: usize,
    /// Word offset of the first word, relative to the whole transcript.
    pub token_start: usize,
    /// Exclusive word offset one past the last word.
    pub token_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTheme {
    pub name: String,
    pub confidence: f64,
    pub summary: String,
    pub keywords: Vec<String>,
    pub mapped_topic: Option<String>,
}

impl ExtractedTheme {
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            summary: String::new(),
            keywords: Vec::new(),
            mapped_topic: None,
        }
    }

    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TunedSettings {
    pub chunk_level_enabled: bool,
    pub chunk_size_words: usize,
    pub max_themes_per_chunk: usize,
    pub max_final_themes: usize,
    pub min_chunk_occurrences: usize,
    pub min_occurrence_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub problem_id: i64,
    pub topic: String,
    pub subtopic: Option<String>,
    pub difficulty: Option<String>,
    pub statement: String,
    pub solution: Option<String>,
    pub source: Option<String>,
}

/// A problem that has not been assigned a database id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub source_key: String,
    pub topic: String,
    pub subtopic: Option<String>,
    pub difficulty: Option<String>,
    pub statement: String,
    pub solution: Option<String>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemSearchResult {
    pub problem_id: i64,
    pub score: f64,
    pub matched_theme: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: size.max(1),
        }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size())
    }

    /// `size`, never below one even when the fields were set directly.
    pub fn page_size(&self) -> usize {
        self.size.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            page: request.page,
            size: request.page_size(),
            total_items: 0,
            total_pages: 0,
        }
    }

    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let size = request.page_size();
        let total_items = all.len();
        let total_pages = total_items.div_ceil(size);
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(size)
            .collect::<Vec<T>>();

        Self {
            items,
            page: request.page,
            size,
            total_items,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LectureStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl LectureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LectureRecord {
    pub lecture_id: String,
    pub title: Option<String>,
    pub transcript: String,
    pub status: LectureStatus,
    pub error_message: Option<String>,
    pub settings: Option<TunedSettings>,
    pub created_at: String,
    pub updated_at: String,
}
