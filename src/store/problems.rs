use std::collections::BTreeSet;

use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::SqliteStore;
use crate::model::{Problem, ProblemRecord};
use crate::util::now_utc_string;

/// Read side of the problem corpus.
pub trait ProblemRepository: Send + Sync {
    fn find_by_id(&self, problem_id: i64) -> Result<Option<Problem>>;

    /// Every problem whose topic is in `topics`, unpaged.
    fn find_by_topics(&self, topics: &BTreeSet<String>) -> Result<Vec<Problem>>;

    fn distinct_topics(&self) -> Result<Vec<String>>;
}

const PROBLEM_COLUMNS: &str =
    "problem_id, topic, subtopic, difficulty, statement, solution, source";

fn problem_from_row(row: &Row<'_>) -> rusqlite::Result<Problem> {
    Ok(Problem {
        problem_id: row.get(0)?,
        topic: row.get(1)?,
        subtopic: row.get(2)?,
        difficulty: row.get(3)?,
        statement: row.get(4)?,
        solution: row.get(5)?,
        source: row.get(6)?,
    })
}

impl ProblemRepository for SqliteStore {
    fn find_by_id(&self, problem_id: i64) -> Result<Option<Problem>> {
        let connection = self.lock()?;
        connection
            .query_row(
                &format!("SELECT {PROBLEM_COLUMNS} FROM problems WHERE problem_id = ?1"),
                [problem_id],
                problem_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load problem {problem_id}"))
    }

    fn find_by_topics(&self, topics: &BTreeSet<String>) -> Result<Vec<Problem>> {
        if topics.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=topics.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<String>>()
            .join(", ");
        let connection = self.lock()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {PROBLEM_COLUMNS} FROM problems WHERE topic IN ({placeholders}) ORDER BY problem_id"
        ))?;
        let rows = statement
            .query_map(params_from_iter(topics.iter()), problem_from_row)?
            .collect::<rusqlite::Result<Vec<Problem>>>()
            .context("failed to load problems by topic")?;
        Ok(rows)
    }

    fn distinct_topics(&self) -> Result<Vec<String>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare("SELECT DISTINCT topic FROM problems WHERE trim(topic) <> '' ORDER BY topic")?;
        let topics = statement
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .context("failed to enumerate distinct topics")?;
        Ok(topics)
    }
}

impl SqliteStore {
    /// Inserts records in one transaction, skipping any whose `source_key`
    /// already exists. Returns the newly created problems.
    pub fn insert_problems(&self, records: &[ProblemRecord]) -> Result<Vec<Problem>> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        let mut inserted = Vec::<Problem>::new();
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO problems(topic, subtopic, difficulty, statement, solution, source, source_key, created_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(source_key) DO NOTHING
                ",
            )?;
            let created_at = now_utc_string();
            for record in records {
                let changed = statement.execute(params![
                    record.topic.trim(),
                    record.subtopic,
                    record.difficulty,
                    record.statement,
                    record.solution,
                    record.source,
                    record.source_key,
                    created_at,
                ])?;
                if changed == 0 {
                    continue;
                }
                inserted.push(Problem {
                    problem_id: tx.last_insert_rowid(),
                    topic: record.topic.trim().to_string(),
                    subtopic: record.subtopic.clone(),
                    difficulty: record.difficulty.clone(),
                    statement: record.statement.clone(),
                    solution: record.solution.clone(),
                    source: record.source.clone(),
                });
            }
        }
        tx.commit().context("failed to commit problem batch")?;
        Ok(inserted)
    }

    pub fn count_problems(&self) -> Result<i64> {
        let connection = self.lock()?;
        Ok(connection.query_row("SELECT COUNT(*) FROM problems", [], |row| row.get(0))?)
    }

    /// Problems ordered by id, starting after `after_id`.
    pub fn list_problems_after(&self, after_id: i64, limit: usize) -> Result<Vec<Problem>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {PROBLEM_COLUMNS} FROM problems WHERE problem_id > ?1 ORDER BY problem_id LIMIT ?2"
        ))?;
        let rows = statement
            .query_map(params![after_id, limit as i64], problem_from_row)?
            .collect::<rusqlite::Result<Vec<Problem>>>()
            .context("failed to page through problems")?;
        Ok(rows)
    }
}
