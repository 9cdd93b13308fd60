use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{error, info};

use crate::util::now_utc_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DatasetIngest,
    Reindex,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DatasetIngest => "dataset_ingest",
            Self::Reindex => "reindex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub kind: JobKind,
    pub state: JobState,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub processed: u64,
    pub total: Option<u64>,
    pub error: Option<String>,
    pub message: Option<String>,
}

impl JobStatus {
    fn idle(kind: JobKind) -> Self {
        Self {
            kind,
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            processed: 0,
            total: None,
            error: None,
            message: None,
        }
    }
}

type StatusTable = Arc<Mutex<HashMap<JobKind, JobStatus>>>;

fn lock_table(table: &StatusTable) -> Result<MutexGuard<'_, HashMap<JobKind, JobStatus>>> {
    table.lock().map_err(|_| anyhow!("job registry mutex poisoned"))
}

/// Handed to running work so it can publish progress.
#[derive(Clone)]
pub struct JobProgress {
    table: StatusTable,
    kind: JobKind,
}

impl JobProgress {
    pub fn set_total(&self, total: u64) {
        self.update(|status| status.total = Some(total));
    }

    pub fn advance(&self, processed: u64) {
        self.update(|status| status.processed += processed);
    }

    pub fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(|status| status.message = Some(message));
    }

    fn update(&self, apply: impl FnOnce(&mut JobStatus)) {
        let Ok(mut table) = lock_table(&self.table) else {
            return;
        };
        if let Some(status) = table.get_mut(&self.kind) {
            apply(status);
        }
    }
}

pub struct JobHandle {
    kind: JobKind,
    table: StatusTable,
    thread: JoinHandle<()>,
}

impl JobHandle {
    /// Blocks until the job thread exits and returns its final status.
    pub fn wait(self) -> Result<JobStatus> {
        self.thread
            .join()
            .map_err(|_| anyhow!("{} job thread panicked", self.kind.as_str()))?;
        let table = lock_table(&self.table)?;
        Ok(table
            .get(&self.kind)
            .cloned()
            .unwrap_or_else(|| JobStatus::idle(self.kind)))
    }
}

pub enum StartOutcome {
    Started(JobHandle),
    AlreadyRunning(JobStatus),
}

/// At most one running job per kind. Jobs run on detached threads and cannot
/// be cancelled once started.
#[derive(Clone, Default)]
pub struct JobRegistry {
    table: StatusTable,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, kind: JobKind) -> Result<JobStatus> {
        let table = lock_table(&self.table)?;
        Ok(table
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| JobStatus::idle(kind)))
    }

    /// Starts `work` unless a job of the same kind is running. The work's
    /// `Ok` value becomes the final status message.
    pub fn start<F>(&self, kind: JobKind, work: F) -> Result<StartOutcome>
    where
        F: FnOnce(&JobProgress) -> Result<String> + Send + 'static,
    {
        {
            let mut table = lock_table(&self.table)?;
            if let Some(current) = table
                .get(&kind)
                .filter(|status| status.state == JobState::Running)
            {
                return Ok(StartOutcome::AlreadyRunning(current.clone()));
            }
            table.insert(
                kind,
                JobStatus {
                    state: JobState::Running,
                    started_at: Some(now_utc_string()),
                    ..JobStatus::idle(kind)
                },
            );
        }
        info!(job = kind.as_str(), "job started");

        let progress = JobProgress {
            table: self.table.clone(),
            kind,
        };
        let table = self.table.clone();
        let thread = thread::Builder::new()
            .name(format!("job-{}", kind.as_str()))
            .spawn(move || {
                let result = work(&progress);
                let Ok(mut table) = lock_table(&table) else {
                    return;
                };
                let Some(status) = table.get_mut(&kind) else {
                    return;
                };
                status.finished_at = Some(now_utc_string());
                match result {
                    Ok(message) => {
                        status.state = JobState::Completed;
                        status.message = Some(message);
                        info!(job = kind.as_str(), processed = status.processed, "job completed");
                    }
                    Err(failure) => {
                        let detail = format!("{failure:#}");
                        status.state = JobState::Failed;
                        status.error = Some(detail.clone());
                        error!(job = kind.as_str(), error = %detail, "job failed");
                    }
                }
            });

        match thread {
            Ok(thread) => Ok(StartOutcome::Started(JobHandle {
                kind,
                table: self.table.clone(),
                thread,
            })),
            Err(spawn_error) => {
                let mut table = lock_table(&self.table)?;
                if let Some(status) = table.get_mut(&kind) {
                    status.state = JobState::Failed;
                    status.error = Some(format!("failed to spawn job thread: {spawn_error}"));
                    status.finished_at = Some(now_utc_string());
                }
                Err(anyhow!("failed to spawn {} job thread: {spawn_error}", kind.as_str()))
            }
        }
    }
}
