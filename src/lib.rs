//! Lecture transcripts to themes, themes to taxonomy topics, topics to
//! recommended practice problems.

pub mod aggregate;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod jobs;
pub mod llm;
pub mod mapper;
pub mod model;
pub mod pipeline;
pub mod retrieval;
pub mod semantic;
pub mod store;
pub mod tuning;
pub mod util;
