use anyhow::{Context, Result, bail};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;

use super::SqliteStore;
use crate::model::{ExtractedTheme, LectureRecord, LectureStatus, TextChunk, TunedSettings};
use crate::util::now_utc_string;

#[derive(Debug, Clone, Serialize)]
pub struct StoredTheme {
    pub rank: usize,
    pub theme: ExtractedTheme,
}

impl SqliteStore {
    /// Stores the transcript and marks the lecture `processing`. Existing
    /// chunks and themes are kept until the new run replaces them.
    pub fn begin_lecture_run(
        &self,
        lecture_id: &str,
        title: Option<&str>,
        transcript: &str,
        force: bool,
    ) -> Result<()> {
        let connection = self.lock()?;
        let existing = connection
            .query_row(
                "SELECT status FROM lectures WHERE lecture_id = ?1",
                [lecture_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|value| LectureStatus::parse(&value));

        if existing == Some(LectureStatus::Processing) && !force {
            bail!("lecture '{lecture_id}' is already processing");
        }

        let now = now_utc_string();
        connection
            .execute(
                "
            INSERT INTO lectures(lecture_id, title, transcript, status, error_message, settings_json, created_at, updated_at)
            VALUES(?1, ?2, ?3, ?4, NULL, NULL, ?5, ?5)
            ON CONFLICT(lecture_id) DO UPDATE SET
              title=COALESCE(excluded.title, lectures.title),
              transcript=excluded.transcript,
              status=excluded.status,
              error_message=NULL,
              updated_at=excluded.updated_at
            ",
                params![
                    lecture_id,
                    title,
                    transcript,
                    LectureStatus::Processing.as_str(),
                    now
                ],
            )
            .with_context(|| format!("failed to store lecture {lecture_id}"))?;
        Ok(())
    }

    pub fn set_lecture_status(
        &self,
        lecture_id: &str,
        status: LectureStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let connection = self.lock()?;
        connection.execute(
            "UPDATE lectures SET status = ?2, error_message = ?3, updated_at = ?4 WHERE lecture_id = ?1",
            params![lecture_id, status.as_str(), error_message, now_utc_string()],
        )?;
        Ok(())
    }

    pub fn save_lecture_settings(&self, lecture_id: &str, settings: &TunedSettings) -> Result<()> {
        let settings_json =
            serde_json::to_string(settings).context("failed to serialize tuned settings")?;
        let connection = self.lock()?;
        connection.execute(
            "UPDATE lectures SET settings_json = ?2, updated_at = ?3 WHERE lecture_id = ?1",
            params![lecture_id, settings_json, now_utc_string()],
        )?;
        Ok(())
    }

    pub fn replace_lecture_chunks(&self, lecture_id: &str, chunks: &[TextChunk]) -> Result<()> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM lecture_chunks WHERE lecture_id = ?1", [lecture_id])?;
        {
            let mut statement = tx.prepare(
                "INSERT INTO lecture_chunks(lecture_id, chunk_index, text, token_start, token_end)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
            )?;
            for chunk in chunks {
                statement.execute(params![
                    lecture_id,
                    chunk.index as i64,
                    chunk.text,
                    chunk.token_start as i64,
                    chunk.token_end as i64,
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("failed to commit chunks for lecture {lecture_id}"))?;
        Ok(())
    }

    pub fn replace_lecture_themes(&self, lecture_id: &str, themes: &[ExtractedTheme]) -> Result<()> {
        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        tx.execute("DELETE FROM lecture_themes WHERE lecture_id = ?1", [lecture_id])?;
        {
            let mut statement = tx.prepare(
                "INSERT INTO lecture_themes(lecture_id, rank, name, confidence, summary, keywords_json, mapped_topic)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (rank, theme) in themes.iter().enumerate() {
                let keywords_json = serde_json::to_string(&theme.keywords)
                    .context("failed to serialize theme keywords")?;
                statement.execute(params![
                    lecture_id,
                    (rank + 1) as i64,
                    theme.name,
                    theme.confidence,
                    theme.summary,
                    keywords_json,
                    theme.mapped_topic,
                ])?;
            }
        }
        tx.commit()
            .with_context(|| format!("failed to commit themes for lecture {lecture_id}"))?;
        Ok(())
    }

    pub fn load_lecture(&self, lecture_id: &str) -> Result<Option<LectureRecord>> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                "SELECT lecture_id, title, transcript, status, error_message, settings_json, created_at, updated_at
                 FROM lectures WHERE lecture_id = ?1",
                [lecture_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to load lecture {lecture_id}"))?;

        let Some((lecture_id, title, transcript, status, error_message, settings_json, created_at, updated_at)) =
            row
        else {
            return Ok(None);
        };

        let status = LectureStatus::parse(&status)
            .with_context(|| format!("lecture {lecture_id} has unknown status '{status}'"))?;
        let settings = settings_json
            .as_deref()
            .map(serde_json::from_str::<TunedSettings>)
            .transpose()
            .with_context(|| format!("lecture {lecture_id} has corrupt settings"))?;

        Ok(Some(LectureRecord {
            lecture_id,
            title,
            transcript,
            status,
            error_message,
            settings,
            created_at,
            updated_at,
        }))
    }

    pub fn load_lecture_themes(&self, lecture_id: &str) -> Result<Vec<ExtractedTheme>> {
        Ok(self
            .load_ranked_lecture_themes(lecture_id)?
            .into_iter()
            .map(|stored| stored.theme)
            .collect())
    }

    pub fn load_ranked_lecture_themes(&self, lecture_id: &str) -> Result<Vec<StoredTheme>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT rank, name, confidence, summary, keywords_json, mapped_topic
             FROM lecture_themes WHERE lecture_id = ?1 ORDER BY rank",
        )?;
        let mut rows = statement.query([lecture_id])?;

        let mut out = Vec::<StoredTheme>::new();
        while let Some(row) = rows.next()? {
            let keywords_json = row.get::<_, String>(4)?;
            let keywords = serde_json::from_str::<Vec<String>>(&keywords_json)
                .with_context(|| format!("corrupt keywords for lecture {lecture_id}"))?;
            out.push(StoredTheme {
                rank: row.get::<_, i64>(0)? as usize,
                theme: ExtractedTheme {
                    name: row.get(1)?,
                    confidence: row.get(2)?,
                    summary: row.get(3)?,
                    keywords,
                    mapped_topic: row.get(5)?,
                },
            });
        }
        Ok(out)
    }

    pub fn load_lecture_chunks(&self, lecture_id: &str) -> Result<Vec<TextChunk>> {
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT chunk_index, text, token_start, token_end
             FROM lecture_chunks WHERE lecture_id = ?1 ORDER BY chunk_index",
        )?;
        let chunks = statement
            .query_map([lecture_id], |row| {
                Ok(TextChunk {
                    index: row.get::<_, i64>(0)? as usize,
                    text: row.get(1)?,
                    token_start: row.get::<_, i64>(2)? as usize,
                    token_end: row.get::<_, i64>(3)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<TextChunk>>>()
            .with_context(|| format!("failed to load chunks for lecture {lecture_id}"))?;
        Ok(chunks)
    }

    /// `(status, count)` pairs across all lectures.
    pub fn lecture_status_counts(&self) -> Result<Vec<(String, i64)>> {
        let connection = self.lock()?;
        let mut statement = connection
            .prepare("SELECT status, COUNT(*) FROM lectures GROUP BY status ORDER BY status")?;
        let counts = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<(String, i64)>>>()?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn theme(name: &str, topic: Option<&str>) -> ExtractedTheme {
        ExtractedTheme {
            name: name.to_string(),
            confidence: 0.8,
            summary: format!("{name} summary"),
            keywords: vec!["alpha".to_string(), "beta".to_string()],
            mapped_topic: topic.map(str::to_string),
        }
    }

    #[test]
    fn lecture_run_lifecycle_round_trips() {
        let store = SqliteStore::open_in_memory(32).expect("store should open");
        store
            .begin_lecture_run("lec-1", Some("Vectors"), "transcript body", false)
            .expect("run should begin");

        let error = store
            .begin_lecture_run("lec-1", None, "transcript body", false)
            .expect_err("second run should be refused while processing");
        assert!(error.to_string().contains("already processing"));

        store
            .replace_lecture_chunks(
                "lec-1",
                &[TextChunk {
                    text: "transcript body".to_string(),
                    index: 0,
                    token_start: 0,
                    token_end: 2,
                }],
            )
            .expect("chunks should save");
        store
            .replace_lecture_themes(
                "lec-1",
                &[theme("Vectors", Some("Geometry")), theme("Angles", None)],
            )
            .expect("themes should save");
        store
            .set_lecture_status("lec-1", LectureStatus::Completed, None)
            .expect("status should update");

        let lecture = store
            .load_lecture("lec-1")
            .expect("load should work")
            .expect("lecture should exist");
        assert_eq!(lecture.status, LectureStatus::Completed);
        assert_eq!(lecture.title.as_deref(), Some("Vectors"));

        let themes = store.load_lecture_themes("lec-1").expect("themes should load");
        assert_eq!(themes, vec![theme("Vectors", Some("Geometry")), theme("Angles", None)]);
        assert_eq!(store.load_lecture_chunks("lec-1").expect("chunks").len(), 1);
        assert!(store.load_lecture("missing").expect("load should work").is_none());
    }

    #[test]
    fn failed_status_keeps_message_and_forced_rerun_clears_it() {
        let store = SqliteStore::open_in_memory(32).expect("store should open");
        store
            .begin_lecture_run("lec-2", None, "text", false)
            .expect("run should begin");
        store
            .set_lecture_status("lec-2", LectureStatus::Failed, Some("extraction failed: boom"))
            .expect("status should update");

        let failed = store
            .load_lecture("lec-2")
            .expect("load should work")
            .expect("lecture should exist");
        assert_eq!(failed.error_message.as_deref(), Some("extraction failed: boom"));

        store
            .begin_lecture_run("lec-2", None, "text v2", false)
            .expect("failed lecture should be retryable");
        let retried = store
            .load_lecture("lec-2")
            .expect("load should work")
            .expect("lecture should exist");
        assert_eq!(retried.status, LectureStatus::Processing);
        assert!(retried.error_message.is_none());
        assert_eq!(retried.transcript, "text v2");
        assert_eq!(
            store.lecture_status_counts().expect("counts should work"),
            vec![("processing".to_string(), 1)]
        );
    }
}
