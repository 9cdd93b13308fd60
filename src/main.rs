mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let context = commands::CommandContext::load(cli.config.as_deref(), &cli.db_path)?;

    match cli.command {
        Commands::Ingest(args) => commands::ingest::run(&context, args),
        Commands::Reindex(args) => commands::reindex::run(&context, args),
        Commands::Process(args) => commands::process::run(&context, args),
        Commands::Recommend(args) => commands::recommend::run(&context, args),
        Commands::Tune(args) => commands::tune::run(&context, args),
        Commands::MapTopic(args) => commands::map_topic::run(&context, args),
        Commands::Status(args) => commands::status::run(&context, args),
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
