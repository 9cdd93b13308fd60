use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, TryLockError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, TimeDelta, Utc};
use tracing::info;

use super::tokens::TokenFilter;
use crate::error::Upstream;
use crate::store::ProblemRepository;

pub const TOPIC_PATH_SEPARATOR: &str = "->";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Known topics plus an inverted index from token to topic positions.
#[derive(Debug, Clone)]
pub struct TopicCatalog {
    pub topics: Vec<String>,
    pub token_index: HashMap<String, Vec<usize>>,
    pub loaded_at: DateTime<Utc>,
}

impl TopicCatalog {
    pub fn build(raw_topics: Vec<String>, filter: &TokenFilter, loaded_at: DateTime<Utc>) -> Self {
        let topics = raw_topics
            .into_iter()
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect::<Vec<String>>();

        let mut token_index = HashMap::<String, Vec<usize>>::new();
        for (position, topic) in topics.iter().enumerate() {
            for token in filter.tokens(topic) {
                token_index.entry(token).or_default().push(position);
            }
        }

        Self {
            topics,
            token_index,
            loaded_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Lowercased final `->` segment of a topic path.
    pub fn leaf_segment(topic: &str) -> String {
        topic
            .rsplit(TOPIC_PATH_SEPARATOR)
            .next()
            .unwrap_or(topic)
            .trim()
            .to_lowercase()
    }
}

/// Lazily built, TTL-bounded catalog. One rebuild runs at a time; while it
/// runs, other callers keep reading the previous catalog if there is one.
pub struct CatalogCache {
    problems: Arc<dyn ProblemRepository>,
    clock: Arc<dyn Clock>,
    filter: TokenFilter,
    ttl: TimeDelta,
    current: RwLock<Option<Arc<TopicCatalog>>>,
    rebuild: Mutex<()>,
}

impl CatalogCache {
    pub fn new(
        problems: Arc<dyn ProblemRepository>,
        clock: Arc<dyn Clock>,
        filter: TokenFilter,
        ttl_seconds: i64,
    ) -> Self {
        Self {
            problems,
            clock,
            filter,
            ttl: TimeDelta::seconds(ttl_seconds.max(0)),
            current: RwLock::new(None),
            rebuild: Mutex::new(()),
        }
    }

    pub fn get(&self) -> Result<Arc<TopicCatalog>> {
        if let Some(catalog) = self.fresh()? {
            return Ok(catalog);
        }

        let _rebuild_guard = match self.rebuild.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                if let Some(stale) = self.snapshot()? {
                    return Ok(stale);
                }
                self.rebuild
                    .lock()
                    .map_err(|_| anyhow!("topic catalog rebuild mutex poisoned"))?
            }
            Err(TryLockError::Poisoned(_)) => {
                return Err(anyhow!("topic catalog rebuild mutex poisoned"));
            }
        };

        if let Some(catalog) = self.fresh()? {
            return Ok(catalog);
        }

        let topics = self
            .problems
            .distinct_topics()
            .context("failed to load distinct topics for the topic catalog")
            .context(Upstream::ProblemCorpus)?;
        let catalog = Arc::new(TopicCatalog::build(topics, &self.filter, self.clock.now()));
        info!(
            topics = catalog.topics.len(),
            tokens = catalog.token_index.len(),
            "topic catalog rebuilt"
        );

        let mut current = self
            .current
            .write()
            .map_err(|_| anyhow!("topic catalog lock poisoned"))?;
        *current = Some(catalog.clone());
        Ok(catalog)
    }

    pub fn invalidate(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    fn snapshot(&self) -> Result<Option<Arc<TopicCatalog>>> {
        let current = self
            .current
            .read()
            .map_err(|_| anyhow!("topic catalog lock poisoned"))?;
        Ok(current.clone())
    }

    fn fresh(&self) -> Result<Option<Arc<TopicCatalog>>> {
        let now = self.clock.now();
        Ok(self
            .snapshot()?
            .filter(|catalog| now - catalog.loaded_at < self.ttl))
    }
}
