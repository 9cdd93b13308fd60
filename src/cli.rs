use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "lessonmap",
    version,
    about = "Lecture theme extraction, topic mapping and practice problem recommendation"
)]
pub struct Cli {
    /// JSON configuration file; built-in defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = ".cache/lessonmap/lessonmap.sqlite")]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Reindex(ReindexArgs),
    Process(ProcessArgs),
    Recommend(RecommendArgs),
    Tune(TuneArgs),
    MapTopic(MapTopicArgs),
    Status(StatusArgs),
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    /// JSON-lines file, or an http(s) rows endpoint.
    #[arg(long)]
    pub source: String,

    #[arg(long)]
    pub batch_size: Option<usize>,

    #[arg(long)]
    pub delay_ms: Option<u64>,

    #[arg(long)]
    pub max_rows: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ReindexArgs {
    #[arg(long, default_value_t = 256)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[arg(long)]
    pub lecture_id: String,

    #[arg(long)]
    pub transcript: PathBuf,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub granularity: Option<u8>,

    #[arg(long)]
    pub lecture_minutes: Option<f64>,

    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum PolicyArg {
    BestEffort,
    Strict,
}

#[derive(Args, Debug, Clone)]
pub struct RecommendArgs {
    #[arg(long)]
    pub lecture_id: String,

    /// Vector candidates requested per theme.
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Zero-based page number.
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    #[arg(long, default_value_t = 10)]
    pub page_size: usize,

    #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
    pub mode: ModeArg,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Hybrid,
    Semantic,
}

#[derive(Args, Debug, Clone)]
pub struct TuneArgs {
    #[arg(long)]
    pub transcript: PathBuf,

    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=10))]
    pub granularity: Option<u8>,

    #[arg(long)]
    pub lecture_minutes: Option<f64>,
}

#[derive(Args, Debug, Clone)]
pub struct MapTopicArgs {
    #[arg(long)]
    pub name: String,

    #[arg(long = "keyword")]
    pub keywords: Vec<String>,

    #[arg(long, default_value = "")]
    pub summary: String,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long)]
    pub lecture_id: Option<String>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}
