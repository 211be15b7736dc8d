//! Per-channel cache correlating a drop announcement with the code posted after it

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use time::{Duration, OffsetDateTime};

use crate::model::Condition;
use crate::ports::Clock;

/// How long an announcement stays usable
pub const ANNOUNCEMENT_TTL: Duration = Duration::minutes(5);

#[derive(Debug, Clone)]
struct AnnouncementEntry {
    conditions: Vec<Condition>,
    stored_at: OffsetDateTime,
}

/// Conditions captured from the latest announcement in each channel
///
/// Expired entries are swept whenever the cache is touched.
pub struct AnnouncementCache {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    entries: Mutex<HashMap<String, AnnouncementEntry>>,
}

impl AnnouncementCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, ANNOUNCEMENT_TTL)
    }

    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Store conditions for a channel, replacing any previous announcement
    pub fn store(&self, channel_key: &str, conditions: Vec<Condition>) {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.sweep(&mut entries, now);
        entries.insert(
            channel_key.to_string(),
            AnnouncementEntry {
                conditions,
                stored_at: now,
            },
        );
    }

    /// Whether a fresh entry exists for the channel
    #[cfg(test)]
    pub(crate) fn has_fresh(&self, channel_key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.sweep(&mut entries, now);
        entries.contains_key(channel_key)
    }

    /// Remove and return the channel's conditions if the entry is still fresh
    pub fn take_fresh(&self, channel_key: &str) -> Option<Vec<Condition>> {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.sweep(&mut entries, now);
        entries.remove(channel_key).map(|entry| entry.conditions)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&self, entries: &mut HashMap<String, AnnouncementEntry>, now: OffsetDateTime) {
        let before = entries.len();
        entries.retain(|_, entry| now - entry.stored_at <= self.ttl);
        let purged = before - entries.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired announcements");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, AnnouncementEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
