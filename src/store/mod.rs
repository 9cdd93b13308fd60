use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use rusqlite::Connection;

use crate::util::{ensure_parent_directory, now_utc_string};

mod lectures;
mod problems;
mod vectors;

pub use lectures::StoredTheme;
pub use problems::ProblemRepository;
pub use vectors::{VectorDocument, VectorHit, VectorStore};

pub const DB_SCHEMA_VERSION: &str = "1.0.0";

/// SQLite-backed problem corpus, vector store and lecture records.
pub struct SqliteStore {
    connection: Mutex<Connection>,
    embedding_dim: usize,
}

impl SqliteStore {
    pub fn open(db_path: &Path, embedding_dim: usize) -> Result<Self> {
        ensure_parent_directory(db_path)?;
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        configure_connection(&connection)?;
        Self::with_connection(connection, embedding_dim)
    }

    pub fn open_in_memory(embedding_dim: usize) -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_connection(connection, embedding_dim)
    }

    fn with_connection(connection: Connection, embedding_dim: usize) -> Result<Self> {
        ensure_schema(&connection)?;
        Ok(Self {
            connection: Mutex::new(connection),
            embedding_dim: embedding_dim.max(8),
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }
}

fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .busy_timeout(std::time::Duration::from_secs(30))
        .context("failed to set busy timeout")?;
    Ok(())
}

fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS problems (
          problem_id INTEGER PRIMARY KEY AUTOINCREMENT,
          topic TEXT NOT NULL,
          subtopic TEXT,
          difficulty TEXT,
          statement TEXT NOT NULL,
          solution TEXT,
          source TEXT,
          source_key TEXT NOT NULL UNIQUE,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vector_documents (
          document_id TEXT PRIMARY KEY,
          content TEXT NOT NULL,
          metadata_json TEXT NOT NULL,
          embedding BLOB NOT NULL,
          embedding_dim INTEGER NOT NULL,
          text_hash TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lectures (
          lecture_id TEXT PRIMARY KEY,
          title TEXT,
          transcript TEXT NOT NULL,
          status TEXT NOT NULL,
          error_message TEXT,
          settings_json TEXT,
          created_at TEXT NOT NULL,
          updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS lecture_chunks (
          lecture_id TEXT NOT NULL,
          chunk_index INTEGER NOT NULL,
          text TEXT NOT NULL,
          token_start INTEGER NOT NULL,
          token_end INTEGER NOT NULL,
          PRIMARY KEY (lecture_id, chunk_index),
          FOREIGN KEY (lecture_id) REFERENCES lectures(lecture_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS lecture_themes (
          lecture_id TEXT NOT NULL,
          rank INTEGER NOT NULL,
          name TEXT NOT NULL,
          confidence REAL NOT NULL,
          summary TEXT NOT NULL,
          keywords_json TEXT NOT NULL,
          mapped_topic TEXT,
          PRIMARY KEY (lecture_id, rank),
          FOREIGN KEY (lecture_id) REFERENCES lectures(lecture_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_problems_topic ON problems(topic);
        CREATE INDEX IF NOT EXISTS idx_lectures_status ON lectures(status);
        ",
        )
        .context("failed to initialize database schema")?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_opened_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(())
}
