use std::cmp::Ordering;

use anyhow::{Context, Result};
use rusqlite::params;
use serde_json::{Map, Value};
use tracing::debug;

use super::SqliteStore;
use crate::semantic::{
    cosine_similarity, decode_embedding_blob, embed_text_local, embedding_text_hash,
    encode_embedding_blob,
};
use crate::util::now_utc_string;

#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub document_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// One similarity hit; `metadata["score"]` carries the raw similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub document_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

impl VectorHit {
    pub fn score(&self) -> f64 {
        self.metadata
            .get("score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

pub trait VectorStore: Send + Sync {
    /// Writes or overwrites documents keyed by `document_id`.
    fn upsert_documents(&self, documents: &[VectorDocument]) -> Result<usize>;

    fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>>;
}

impl VectorStore for SqliteStore {
    fn upsert_documents(&self, documents: &[VectorDocument]) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }

        let mut connection = self.lock()?;
        let tx = connection.transaction()?;
        {
            let mut statement = tx.prepare(
                "
                INSERT INTO vector_documents(document_id, content, metadata_json, embedding, embedding_dim, text_hash, updated_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(document_id) DO UPDATE SET
                  content=excluded.content,
                  metadata_json=excluded.metadata_json,
                  embedding=excluded.embedding,
                  embedding_dim=excluded.embedding_dim,
                  text_hash=excluded.text_hash,
                  updated_at=excluded.updated_at
                ",
            )?;
            let updated_at = now_utc_string();
            for document in documents {
                let metadata_json = serde_json::to_string(&document.metadata).with_context(|| {
                    format!("failed to serialize metadata for {}", document.document_id)
                })?;
                let embedding = embed_text_local(&document.content, self.embedding_dim);
                statement.execute(params![
                    document.document_id,
                    document.content,
                    metadata_json,
                    encode_embedding_blob(&embedding),
                    self.embedding_dim as i64,
                    embedding_text_hash(&document.content),
                    updated_at,
                ])?;
            }
        }
        tx.commit().context("failed to commit vector document batch")?;

        debug!(documents = documents.len(), "vector documents upserted");
        Ok(documents.len())
    }

    fn similarity_search(&self, query: &str, top_k: usize) -> Result<Vec<VectorHit>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = embed_text_local(query, self.embedding_dim);
        let connection = self.lock()?;
        let mut statement = connection.prepare(
            "SELECT document_id, content, metadata_json, embedding, embedding_dim FROM vector_documents",
        )?;
        let mut rows = statement.query([])?;

        let mut scored = Vec::<(f64, String, String, String)>::new();
        while let Some(row) = rows.next()? {
            let row_dim = row.get::<_, i64>(4)? as usize;
            if row_dim != self.embedding_dim {
                continue;
            }
            let blob = row.get::<_, Vec<u8>>(3)?;
            let Some(embedding) = decode_embedding_blob(&blob, self.embedding_dim) else {
                continue;
            };
            scored.push((
                cosine_similarity(&query_embedding, &embedding),
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
            ));
        }

        scored.sort_by(|left, right| {
            right
                .0
                .partial_cmp(&left.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.1.cmp(&right.1))
        });
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(score, document_id, content, metadata_json)| {
                let mut metadata = serde_json::from_str::<Map<String, Value>>(&metadata_json)
                    .with_context(|| format!("corrupt metadata for document {document_id}"))?;
                metadata.insert("score".to_string(), Value::from(score));
                Ok(VectorHit {
                    document_id,
                    content,
                    metadata,
                })
            })
            .collect()
    }
}

impl SqliteStore {
    pub fn count_vector_documents(&self) -> Result<i64> {
        let connection = self.lock()?;
        Ok(connection.query_row("SELECT COUNT(*) FROM vector_documents", [], |row| row.get(0))?)
    }

    pub fn delete_all_vector_documents(&self) -> Result<usize> {
        let connection = self.lock()?;
        Ok(connection.execute("DELETE FROM vector_documents", [])?)
    }
}
