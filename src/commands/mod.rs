pub mod ingest;
pub mod map_topic;
pub mod process;
pub mod recommend;
pub mod reindex;
pub mod status;
pub mod tune;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use lessonmap::config::AppConfig;
use lessonmap::semantic::DEFAULT_EMBEDDING_DIM;
use lessonmap::store::SqliteStore;

/// Settings shared by every subcommand. The database is opened on demand so
/// commands that never touch it do not create it.
pub struct CommandContext {
    pub config: AppConfig,
    pub db_path: PathBuf,
}

impl CommandContext {
    pub fn load(config_path: Option<&Path>, db_path: &Path) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        if let Some(path) = config_path {
            debug!(path = %path.display(), "loaded configuration");
        }
        Ok(Self {
            config,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn open_store(&self) -> Result<Arc<SqliteStore>> {
        let store = SqliteStore::open(&self.db_path, DEFAULT_EMBEDDING_DIM)?;
        Ok(Arc::new(store))
    }
}

pub(crate) fn read_transcript(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read transcript {}", path.display()))
}
