use thiserror::Error;

/// Malformed or unusable output from the completion service.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM response is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("LLM response is not a JSON array of theme objects: {0}")]
    UnexpectedShape(String),
}

/// External collaborator that failed. Attached as `anyhow` context so callers
/// can `downcast_ref::<Upstream>()` on the error chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Upstream {
    #[error("vector store request failed")]
    VectorStore,

    #[error("problem corpus request failed")]
    ProblemCorpus,

    #[error("LLM completion request failed")]
    Llm,

    #[error("dataset server request failed")]
    DatasetServer,
}

/// Lecture processing stage, attached as context to pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineStage {
    #[error("chunking")]
    Chunking,

    #[error("theme extraction")]
    Extraction,

    #[error("theme aggregation")]
    Aggregation,

    #[error("topic mapping")]
    Mapping,

    #[error("persisting results")]
    Persisting,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chunking => "chunking",
            Self::Extraction => "extraction",
            Self::Aggregation => "aggregation",
            Self::Mapping => "mapping",
            Self::Persisting => "persisting",
        }
    }
}

pub fn upstream_of(error: &anyhow::Error) -> Option<Upstream> {
    error.downcast_ref::<Upstream>().copied()
}

pub fn extraction_error_of(error: &anyhow::Error) -> Option<&ExtractionError> {
    error.downcast_ref::<ExtractionError>()
}
