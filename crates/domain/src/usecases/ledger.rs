//! Dedup ledger guaranteeing at most one publish per source message

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::model::SeenKey;
use crate::ports::{Clock, DedupStore, InsertOutcome, StateError};

/// How long a key stays held in memory after its check completes
pub const DEFAULT_HOLD: Duration = Duration::from_secs(1);

/// Entries older than this are purged at startup
pub const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Check-and-record front for a [`DedupStore`]
///
/// A key held in memory is reported as seen to concurrent callers; the
/// store's primary key is the final arbiter.
pub struct DedupLedger<St: DedupStore + ?Sized> {
    store: Arc<St>,
    clock: Arc<dyn Clock>,
    held: Arc<Mutex<HashSet<String>>>,
    hold: Duration,
}

impl<St: DedupStore + ?Sized> DedupLedger<St> {
    pub fn new(store: Arc<St>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            held: Arc::new(Mutex::new(HashSet::new())),
            hold: DEFAULT_HOLD,
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    /// Returns true when the message must not be published
    ///
    /// Store failures count as seen.
    pub async fn already_seen(&self, key: &SeenKey) -> bool {
        let key_str = key.as_str();
        if !lock(&self.held).insert(key_str.to_string()) {
            tracing::debug!(key = %key, "Key held by a concurrent check");
            return true;
        }

        let seen = self.check_and_record(key_str).await;
        self.release_later(key_str.to_string());
        seen
    }

    /// Drop entries older than [`RETENTION`]
    pub async fn purge_expired(&self) -> Result<u64, StateError> {
        let retention_ms = RETENTION.as_millis() as i64;
        let cutoff = self.clock.now_millis() - retention_ms;
        let purged = self.store.purge_older_than(cutoff).await?;
        tracing::info!(purged, "Purged expired dedup entries");
        Ok(purged)
    }

    async fn check_and_record(&self, key: &str) -> bool {
        match self.store.contains(key).await {
            Ok(true) => {
                tracing::debug!(key = %key, "Key already recorded");
                return true;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dedup lookup failed, treating as seen");
                return true;
            }
        }

        match self.store.insert(key, self.clock.now_millis()).await {
            Ok(InsertOutcome::Inserted) => false,
            Ok(InsertOutcome::AlreadyPresent) => {
                tracing::debug!(key = %key, "Key recorded concurrently");
                true
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Dedup insert failed, treating as seen");
                true
            }
        }
    }

    fn release_later(&self, key: String) {
        let held = Arc::clone(&self.held);
        let hold = self.hold;
        tokio::spawn(async move {
            tokio::time::sleep(hold).await;
            lock(&held).remove(&key);
        });
    }
}

fn lock(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(PoisonError::into_inner)
}
