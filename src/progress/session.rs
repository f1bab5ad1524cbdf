use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::sampler::{ProgressSampler, RawSample, SampleError};
use super::tracker::{Milestone, MilestoneTracker, Observation};
use super::writer::{FlushReason, PersistenceWriter};
use super::ProgressPolicy;
use crate::models::{CachedProgress, ProgressKey, ProgressRecord};
use crate::store::{Store, StoreError};

/// Live tracking state for one learner watching one course item.
#[derive(Debug)]
pub struct WatchSession {
    key: ProgressKey,
    sampler: ProgressSampler,
    tracker: MilestoneTracker,
    writer: PersistenceWriter,
    last_seen: DateTime<Utc>,
    /// Set once the session has been flushed and dropped from the registry.
    closed: bool,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionView {
    pub user_id: String,
    pub course_id: uuid::Uuid,
    pub item_id: uuid::Uuid,
    pub watched_time: f64,
    pub percentage: f64,
    pub last_marker: i32,
    pub completed: bool,
    /// Whether everything tracked so far has been persisted.
    pub saved: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct SampleOutcome {
    pub accepted: bool,
    pub milestones: Vec<Milestone>,
    pub wrote: bool,
    pub progress: SessionView,
}

impl SampleOutcome {
    pub fn completed_now(&self) -> bool {
        self.milestones.contains(&Milestone::Completed)
    }
}

impl WatchSession {
    pub fn new(
        key: ProgressKey,
        stored: Option<ProgressRecord>,
        policy: &ProgressPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let tracker = match &stored {
            Some(rec) => MilestoneTracker::from_record(policy.completion_threshold, rec),
            None => MilestoneTracker::new(policy.completion_threshold),
        };
        Self {
            key,
            sampler: ProgressSampler::new(policy.sample_interval),
            tracker,
            writer: PersistenceWriter::new(policy.save_interval, stored, now),
            last_seen: now,
            closed: false,
        }
    }

    pub fn key(&self) -> &ProgressKey {
        &self.key
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// A closed session no longer belongs to the registry; callers holding it
    /// must open a fresh one.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn record(&self) -> ProgressRecord {
        ProgressRecord {
            user_id: self.key.user_id.clone(),
            course_id: self.key.course_id,
            item_id: self.key.item_id,
            watched_time: self.tracker.watched_time(),
            percentage: self.tracker.percentage(),
            last_marker: self.tracker.last_marker(),
            completed: self.tracker.completed(),
            updated_at: self.last_seen,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.writer.is_dirty(&self.record())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            user_id: self.key.user_id.clone(),
            course_id: self.key.course_id,
            item_id: self.key.item_id,
            watched_time: self.tracker.watched_time(),
            percentage: self.tracker.percentage(),
            last_marker: self.tracker.last_marker(),
            completed: self.tracker.completed(),
            saved: !self.is_dirty(),
        }
    }

    /// Folds in progress the client cached without writing it.
    pub fn absorb(&mut self, cached: &CachedProgress, now: DateTime<Utc>) -> bool {
        if !self.tracker.merge(cached) {
            return false;
        }
        self.last_seen = now;
        tracing::info!(
            key = %self.key,
            percentage = self.tracker.percentage(),
            "recovered unsaved progress"
        );
        true
    }

    /// Merges progress the client cached before a reload and writes it straight away.
    pub async fn recover(
        &mut self,
        cached: &CachedProgress,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.absorb(cached, now) {
            return false;
        }
        let rec = self.record();
        // stays dirty on failure; the sweeper or unload retries
        let _ = self.writer.flush(store, &rec, FlushReason::Recovery, now).await;
        true
    }

    pub async fn on_sample(
        &mut self,
        raw: RawSample,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<SampleOutcome, SampleError> {
        self.last_seen = now;
        let Some(sample) = self.sampler.accept(raw, now)? else {
            return Ok(self.outcome(false, Observation::default(), false));
        };
        let obs = self.tracker.observe(&sample);
        let rec = self.record();
        let wrote = self
            .writer
            .maybe_flush(store, &rec, !obs.milestones.is_empty(), now)
            .await;
        Ok(self.outcome(true, obs, wrote))
    }

    pub async fn mark_viewed(&mut self, store: &dyn Store, now: DateTime<Utc>) -> SampleOutcome {
        self.last_seen = now;
        let obs = self.tracker.mark_viewed();
        let rec = self.record();
        let wrote = self.writer.maybe_flush(store, &rec, true, now).await;
        self.outcome(true, obs, wrote)
    }

    pub async fn flush_urgent(
        &mut self,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let rec = self.record();
        self.writer.flush(store, &rec, FlushReason::Urgent, now).await
    }

    pub async fn flush_if_due(&mut self, store: &dyn Store, now: DateTime<Utc>) -> bool {
        let rec = self.record();
        self.writer.maybe_flush(store, &rec, false, now).await
    }

    fn outcome(&self, accepted: bool, obs: Observation, wrote: bool) -> SampleOutcome {
        SampleOutcome {
            accepted,
            milestones: obs.milestones,
            wrote,
            progress: self.view(),
        }
    }
}

pub type SharedSession = Arc<tokio::sync::Mutex<WatchSession>>;
pub type SessionGuard = tokio::sync::OwnedMutexGuard<WatchSession>;

/// Open watch sessions, keyed by learner and item.
pub struct SessionRegistry {
    policy: ProgressPolicy,
    sessions: Mutex<HashMap<ProgressKey, SharedSession>>,
}

impl SessionRegistry {
    pub fn new(policy: ProgressPolicy) -> Self {
        Self {
            policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &ProgressKey) -> Option<SharedSession> {
        self.lock().get(key).cloned()
    }

    /// Returns the live session for `key`, loading stored progress if there is none,
    /// and folds in any progress the client cached.
    pub async fn open(
        &self,
        key: ProgressKey,
        store: &dyn Store,
        cached: Option<&CachedProgress>,
        now: DateTime<Utc>,
    ) -> Result<SharedSession, StoreError> {
        loop {
            let shared = match self.get(&key) {
                Some(s) => s,
                None => {
                    let stored = store.load_progress(&key).await?;
                    let fresh = Arc::new(tokio::sync::Mutex::new(WatchSession::new(
                        key.clone(),
                        stored,
                        &self.policy,
                        now,
                    )));
                    self.lock().entry(key.clone()).or_insert(fresh).clone()
                }
            };

            let mut session = shared.lock().await;
            // lost a race with close or sweep; the next pass reloads from the store
            if session.closed {
                continue;
            }
            if let Some(cached) = cached {
                session.recover(cached, store, now).await;
            }
            drop(session);
            tracing::debug!(key = %key, "watch session open");
            return Ok(shared);
        }
    }

    /// Like [`open`](Self::open) without cached progress, but hands back the locked
    /// session so nothing can close it before the caller is done.
    pub async fn acquire(
        &self,
        key: &ProgressKey,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<SessionGuard, StoreError> {
        loop {
            let session = self.open(key.clone(), store, None, now).await?.lock_owned().await;
            if !session.closed {
                return Ok(session);
            }
        }
    }

    /// Urgently flushes and drops the session. A session whose write failed is kept
    /// so the sweeper can retry.
    pub async fn close(
        &self,
        key: &ProgressKey,
        store: &dyn Store,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(shared) = self.get(key) else {
            return Ok(false);
        };
        let mut session = shared.lock().await;
        if session.closed {
            return Ok(false);
        }
        let wrote = session.flush_urgent(store, now).await?;
        session.closed = true;
        self.detach(key, &shared);
        Ok(wrote)
    }

    /// Flushes dirty sessions whose save interval has elapsed and evicts idle ones.
    /// Returns the number of records written.
    pub async fn sweep(&self, store: &dyn Store, now: DateTime<Utc>, idle: Duration) -> usize {
        let sessions: Vec<SharedSession> = self.lock().values().cloned().collect();
        let mut written = 0;
        let mut evicted = 0;

        for shared in sessions {
            let mut s = shared.lock().await;
            if s.closed {
                continue;
            }
            let idle_for = (now - s.last_seen()).to_std().unwrap_or(Duration::ZERO);
            if idle_for >= idle {
                let Ok(wrote) = s.flush_urgent(store, now).await else {
                    continue;
                };
                written += usize::from(wrote);
                s.closed = true;
                self.detach(&s.key, &shared);
                evicted += 1;
            } else if s.flush_if_due(store, now).await {
                written += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, "idle watch sessions evicted");
        }
        written
    }

    /// Removes `key` only while it still maps to `session`; the caller holds the
    /// session's guard so no sample can land between the flush and the removal.
    fn detach(&self, key: &ProgressKey, session: &SharedSession) {
        let mut map = self.lock();
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, session)) {
            map.remove(key);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ProgressKey, SharedSession>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
