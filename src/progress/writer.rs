//! Debounced progress persistence with an urgent path for page unload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::models::ProgressRecord;
use crate::store::{Store, StoreError};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    Milestone,
    Interval,
    Urgent,
    Recovery,
}

#[derive(Debug, Clone)]
pub struct PersistenceWriter {
    save_interval: Duration,
    last_write_at: DateTime<Utc>,
    persisted: Option<ProgressRecord>,
    pending_milestone: bool,
    failures: u32,
}

impl PersistenceWriter {
    pub fn new(
        save_interval: Duration,
        persisted: Option<ProgressRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            save_interval,
            last_write_at: now,
            persisted,
            pending_milestone: false,
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_dirty(&self, current: &ProgressRecord) -> bool {
        match &self.persisted {
            Some(p) => !p.same_progress(current),
            None => current.watched_time > 0.0 || current.percentage > 0.0 || current.completed,
        }
    }

    pub fn due(
        &self,
        current: &ProgressRecord,
        milestone: bool,
        now: DateTime<Utc>,
    ) -> Option<FlushReason> {
        if !self.is_dirty(current) {
            return None;
        }
        if milestone || self.pending_milestone {
            return Some(FlushReason::Milestone);
        }
        let elapsed = (now - self.last_write_at).to_std().unwrap_or(Duration::ZERO);
        (elapsed >= self.save_interval).then_some(FlushReason::Interval)
    }

    /// Writes `current` if it differs from what was last persisted.
    ///
    /// A failed write keeps the record dirty and leaves the debounce clock where it
    /// was, so the next call retries it.
    pub async fn flush(
        &mut self,
        store: &dyn Store,
        current: &ProgressRecord,
        reason: FlushReason,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if !self.is_dirty(current) {
            return Ok(false);
        }
        match store.save_progress(current).await {
            Ok(()) => {
                tracing::debug!(
                    key = %current.key(),
                    ?reason,
                    percentage = current.percentage,
                    "progress saved"
                );
                self.persisted = Some(current.clone());
                self.last_write_at = now;
                self.pending_milestone = false;
                self.failures = 0;
                Ok(true)
            }
            Err(e) => {
                self.failures += 1;
                if reason == FlushReason::Milestone {
                    self.pending_milestone = true;
                }
                tracing::warn!(
                    key = %current.key(),
                    ?reason,
                    failures = self.failures,
                    error = %e,
                    "progress write failed"
                );
                Err(e)
            }
        }
    }

    /// Regular path: writes only when due, and never surfaces the error.
    pub async fn maybe_flush(
        &mut self,
        store: &dyn Store,
        current: &ProgressRecord,
        milestone: bool,
        now: DateTime<Utc>,
    ) -> bool {
        match self.due(current, milestone, now) {
            Some(reason) => self.flush(store, current, reason, now).await.unwrap_or(false),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn rec(pct: f64) -> ProgressRecord {
        ProgressRecord {
            user_id: "ana".into(),
            course_id: Uuid::nil(),
            item_id: Uuid::nil(),
            watched_time: pct,
            percentage: pct,
            last_marker: 0,
            completed: false,
            updated_at: t(0),
        }
    }

    #[tokio::test]
    async fn interval_debounces_writes() {
        let store = MemoryStore::new();
        let mut w = PersistenceWriter::new(Duration::from_secs(10), None, t(0));

        assert!(!w.maybe_flush(&store, &rec(1.0), false, t(3)).await);
        assert!(w.maybe_flush(&store, &rec(2.0), false, t(10)).await);
        assert!(!w.maybe_flush(&store, &rec(3.0), false, t(15)).await);
        assert!(w.maybe_flush(&store, &rec(4.0), true, t(16)).await);
        assert_eq!(store.save_count(), 2);
    }

    #[tokio::test]
    async fn identical_record_is_not_rewritten() {
        let store = MemoryStore::new();
        let mut w = PersistenceWriter::new(Duration::from_secs(10), None, t(0));
        assert!(w.flush(&store, &rec(5.0), FlushReason::Urgent, t(1)).await.unwrap());
        assert!(!w.flush(&store, &rec(5.0), FlushReason::Urgent, t(2)).await.unwrap());
        assert_eq!(w.due(&rec(5.0), true, t(60)), None);
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn failed_milestone_write_is_retried() {
        let store = MemoryStore::new();
        let mut w = PersistenceWriter::new(Duration::from_secs(10), None, t(0));

        store.fail_saves(true);
        assert!(!w.maybe_flush(&store, &rec(10.0), true, t(1)).await);
        assert_eq!(w.failures(), 1);

        store.fail_saves(false);
        assert_eq!(w.due(&rec(11.0), false, t(2)), Some(FlushReason::Milestone));
        assert!(w.maybe_flush(&store, &rec(11.0), false, t(2)).await);
        assert_eq!(w.failures(), 0);
    }

    #[tokio::test]
    async fn failed_interval_write_is_retried_on_next_sample() {
        let store = MemoryStore::new();
        let mut w = PersistenceWriter::new(Duration::from_secs(10), None, t(0));

        store.fail_saves(true);
        assert!(!w.maybe_flush(&store, &rec(2.0), false, t(10)).await);
        assert_eq!(w.failures(), 1);

        store.fail_saves(false);
        assert_eq!(w.due(&rec(3.0), false, t(15)), Some(FlushReason::Interval));
        assert!(w.maybe_flush(&store, &rec(3.0), false, t(15)).await);
        assert_eq!(store.save_count(), 1);

        // the clock restarts from the successful write
        assert!(!w.maybe_flush(&store, &rec(4.0), false, t(20)).await);
    }
}
