//! In-memory dedup store for tests and the offline `extract` command

use async_trait::async_trait;
use dropwatch_domain::{DedupStore, InsertOutcome, StateError};
use std::collections::HashMap;
use std::sync::RwLock;

/// Seen keys kept in a map for the lifetime of the process
#[derive(Default)]
pub struct InMemoryDedupStore {
    seen: RwLock<HashMap<String, i64>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn contains(&self, key: &str) -> Result<bool, StateError> {
        let seen = self
            .seen
            .read()
            .map_err(|e| StateError::Poisoned(e.to_string()))?;
        Ok(seen.contains_key(key))
    }

    async fn insert(&self, key: &str, ts_millis: i64) -> Result<InsertOutcome, StateError> {
        let mut seen = self
            .seen
            .write()
            .map_err(|e| StateError::Poisoned(e.to_string()))?;
        if seen.contains_key(key) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        seen.insert(key.to_string(), ts_millis);
        Ok(InsertOutcome::Inserted)
    }

    async fn purge_older_than(&self, cutoff_millis: i64) -> Result<u64, StateError> {
        let mut seen = self
            .seen
            .write()
            .map_err(|e| StateError::Poisoned(e.to_string()))?;
        let before = seen.len();
        seen.retain(|_, ts| *ts >= cutoff_millis);
        Ok((before - seen.len()) as u64)
    }
}
