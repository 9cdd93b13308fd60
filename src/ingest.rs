use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{IngestConfig, RetrievalConfig};
use crate::error::Upstream;
use crate::jobs::JobProgress;
use crate::mapper::TopicMapper;
use crate::model::ProblemRecord;
use crate::retrieval::ProblemRetrievalEngine;
use crate::semantic::{embedding_text_hash, normalize_whitespace};
use crate::store::SqliteStore;

#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub records: Vec<ProblemRecord>,
    /// Raw rows returned, including ones that could not be mapped.
    pub rows: usize,
    pub total_rows: Option<usize>,
}

pub trait ProblemSource: Send + Sync {
    fn fetch_batch(&self, offset: usize, limit: usize) -> Result<SourceBatch>;

    fn describe(&self) -> String;

    /// Remote sources are rate limited between requests.
    fn is_remote(&self) -> bool {
        false
    }
}

/// Maps one dataset row onto a problem record using the configured field
/// names. Rows without a topic or statement are rejected.
pub fn record_from_row(row: &Value, config: &IngestConfig, source: &str) -> Option<ProblemRecord> {
    let topic = field_text(row, Some(&config.topic_field))?;
    let statement = field_text(row, Some(&config.statement_field))?;
    let source_key = embedding_text_hash(&format!(
        "{}\n{}",
        topic.to_lowercase(),
        normalize_whitespace(&statement)
    ));

    Some(ProblemRecord {
        source_key,
        topic,
        subtopic: field_text(row, config.subtopic_field.as_ref()),
        difficulty: field_text(row, config.difficulty_field.as_ref()),
        statement,
        solution: field_text(row, config.solution_field.as_ref()),
        source: Some(
            config
                .source_label
                .clone()
                .unwrap_or_else(|| source.to_string()),
        ),
    })
}

fn field_text(row: &Value, field: Option<&String>) -> Option<String> {
    let value = row.get(field?.as_str())?;
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// JSON-lines file, one dataset row object per line.
pub struct JsonlProblemSource {
    path: PathBuf,
    rows: Vec<Value>,
    config: IngestConfig,
}

impl JsonlProblemSource {
    pub fn open(path: &Path, config: IngestConfig) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut rows = Vec::<Value>::new();
        for (line_number, line) in BufReader::new(file).lines().enumerate() {
            let line =
                line.with_context(|| format!("failed to read {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let row = serde_json::from_str::<Value>(&line).with_context(|| {
                format!("invalid JSON on line {} of {}", line_number + 1, path.display())
            })?;
            rows.push(row);
        }

        Ok(Self {
            path: path.to_path_buf(),
            rows,
            config,
        })
    }
}

impl ProblemSource for JsonlProblemSource {
    fn fetch_batch(&self, offset: usize, limit: usize) -> Result<SourceBatch> {
        let source = self.describe();
        let rows = self
            .rows
            .iter()
            .skip(offset)
            .take(limit)
            .collect::<Vec<&Value>>();
        Ok(SourceBatch {
            records: rows
                .iter()
                .filter_map(|row| record_from_row(row, &self.config, &source))
                .collect(),
            rows: rows.len(),
            total_rows: Some(self.rows.len()),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Paged rows endpoint answering `{"rows":[{"row":{...}}], "num_rows_total": N}`
/// for `offset`/`length` query parameters.
pub struct DatasetServerSource {
    client: reqwest::blocking::Client,
    url: String,
    config: IngestConfig,
}

impl DatasetServerSource {
    pub fn new(url: &str, config: IngestConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build dataset HTTP client")?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
            config,
        })
    }
}

impl ProblemSource for DatasetServerSource {
    fn fetch_batch(&self, offset: usize, limit: usize) -> Result<SourceBatch> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("offset", offset), ("length", limit)])
            .send()
            .with_context(|| format!("failed to fetch rows {offset}..{} from {}", offset + limit, self.url))
            .context(Upstream::DatasetServer)?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("dataset server returned {status} for offset {offset}"))
                .context(Upstream::DatasetServer);
        }
        let payload: Value = response
            .json()
            .context("dataset server returned invalid JSON")
            .context(Upstream::DatasetServer)?;

        rows_payload_batch(&payload, &self.config, &self.url)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn is_remote(&self) -> bool {
        true
    }
}

fn rows_payload_batch(payload: &Value, config: &IngestConfig, source: &str) -> Result<SourceBatch> {
    let rows = payload
        .get("rows")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("dataset payload has no 'rows' array"))?;

    Ok(SourceBatch {
        records: rows
            .iter()
            .filter_map(|entry| entry.get("row"))
            .filter_map(|row| record_from_row(row, config, source))
            .collect(),
        rows: rows.len(),
        total_rows: payload
            .get("num_rows_total")
            .and_then(Value::as_u64)
            .map(|total| total as usize),
    })
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestSummary {
    pub source: String,
    pub batches: usize,
    pub rows: usize,
    pub skipped_rows: usize,
    pub inserted: usize,
    pub indexed: usize,
}

/// Pulls rows from a source into the problem corpus and the vector index.
pub struct DatasetIngestor {
    store: Arc<SqliteStore>,
    retrieval: ProblemRetrievalEngine,
    config: IngestConfig,
    mapper: Option<Arc<TopicMapper>>,
}

impl DatasetIngestor {
    pub fn new(store: Arc<SqliteStore>, config: IngestConfig, retrieval: RetrievalConfig) -> Self {
        let engine = ProblemRetrievalEngine::new(store.clone(), store.clone(), retrieval);
        Self {
            store,
            retrieval: engine,
            config,
            mapper: None,
        }
    }

    /// Topic catalog to invalidate once new problems land.
    pub fn with_topic_mapper(mut self, mapper: Arc<TopicMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    pub fn run(&self, source: &dyn ProblemSource, progress: Option<&JobProgress>) -> Result<IngestSummary> {
        let batch_size = self.config.batch_size.max(1);
        let delay = Duration::from_millis(self.config.request_delay_ms);
        let mut summary = IngestSummary {
            source: source.describe(),
            ..IngestSummary::default()
        };
        info!(source = %summary.source, batch_size, "dataset ingest started");

        loop {
            let limit = match self.config.max_rows {
                Some(max_rows) => batch_size.min(max_rows.saturating_sub(summary.rows)),
                None => batch_size,
            };
            if limit == 0 {
                break;
            }

            let batch = source
                .fetch_batch(summary.rows, limit)
                .with_context(|| format!("failed to fetch rows at offset {}", summary.rows))?;
            if let (Some(progress), Some(total)) = (progress, batch.total_rows) {
                let total = self.config.max_rows.map_or(total, |max_rows| total.min(max_rows));
                progress.set_total(total as u64);
            }
            if batch.rows == 0 {
                break;
            }

            let inserted = self.store.insert_problems(&batch.records)?;
            let indexed = self.retrieval.index_problems(&inserted)?;
            summary.batches += 1;
            summary.rows += batch.rows;
            summary.skipped_rows += batch.rows - batch.records.len();
            summary.inserted += inserted.len();
            summary.indexed += indexed;
            if let Some(progress) = progress {
                progress.advance(batch.rows as u64);
            }
            debug!(
                offset = summary.rows,
                rows = batch.rows,
                inserted = inserted.len(),
                "dataset batch committed"
            );

            if batch.rows < limit {
                break;
            }
            if source.is_remote() && !delay.is_zero() {
                debug!(delay_ms = self.config.request_delay_ms, "rate limiting dataset requests");
                thread::sleep(delay);
            }
        }

        if let Some(mapper) = &self.mapper {
            mapper.invalidate_catalog();
        }
        info!(
            source = %summary.source,
            rows = summary.rows,
            inserted = summary.inserted,
            skipped = summary.skipped_rows,
            "dataset ingest completed"
        );
        Ok(summary)
    }

    /// Re-embeds every stored problem in id order.
    pub fn reindex(&self, batch_size: usize, progress: Option<&JobProgress>) -> Result<usize> {
        let batch_size = batch_size.max(1);
        if let Some(progress) = progress {
            progress.set_total(self.store.count_problems()?.max(0) as u64);
        }

        let mut after_id = 0i64;
        let mut indexed = 0usize;
        loop {
            let problems = self.store.list_problems_after(after_id, batch_size)?;
            let Some(last) = problems.last() else {
                break;
            };
            after_id = last.problem_id;
            indexed += self.retrieval.index_problems(&problems)?;
            if let Some(progress) = progress {
                progress.advance(problems.len() as u64);
            }
            debug!(indexed, after_id, "reindex batch committed");
        }

        info!(indexed, "reindex completed");
        Ok(indexed)
    }
}
