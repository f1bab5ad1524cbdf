//! Monotonic percentage bookkeeping and milestone detection.

use serde::Serialize;

use super::sampler::Sample;
use crate::models::{CachedProgress, ProgressRecord};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(tag = "kind", content = "percent", rename_all = "snake_case")]
pub enum Milestone {
    /// Highest 10% step crossed by one observation.
    Step(i32),
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MilestoneTracker {
    threshold: f64,
    watched_time: f64,
    percentage: f64,
    last_marker: i32,
    completed: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub advanced: bool,
    pub milestones: Vec<Milestone>,
}

impl Observation {
    pub fn completed(&self) -> bool {
        self.milestones.contains(&Milestone::Completed)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn marker_for(percentage: f64) -> i32 {
    ((percentage / 10.0).floor() as i32 * 10).clamp(0, 100)
}

impl MilestoneTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            watched_time: 0.0,
            percentage: 0.0,
            last_marker: 0,
            completed: false,
        }
    }

    pub fn from_record(threshold: f64, rec: &ProgressRecord) -> Self {
        Self {
            threshold,
            watched_time: rec.watched_time.max(0.0),
            percentage: rec.percentage.clamp(0.0, 100.0),
            last_marker: rec.last_marker.clamp(0, 100),
            completed: rec.completed,
        }
    }

    pub fn watched_time(&self) -> f64 {
        self.watched_time
    }

    pub fn percentage(&self) -> f64 {
        self.percentage
    }

    pub fn last_marker(&self) -> i32 {
        self.last_marker
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn observe(&mut self, sample: &Sample) -> Observation {
        let pct = round2((sample.position / sample.duration * 100.0).clamp(0.0, 100.0));
        let mut obs = Observation::default();

        if sample.position > self.watched_time {
            self.watched_time = sample.position;
            obs.advanced = true;
        }
        if pct > self.percentage {
            self.percentage = pct;
            obs.advanced = true;
        }

        self.record_milestones(&mut obs);
        obs
    }

    /// Instant completion, used for slides and explicit "mark as watched".
    pub fn mark_viewed(&mut self) -> Observation {
        let mut obs = Observation::default();
        if self.percentage < 100.0 {
            self.percentage = 100.0;
            obs.advanced = true;
        }
        self.record_milestones(&mut obs);
        obs
    }

    /// Folds in progress recovered from the client; never regresses.
    pub fn merge(&mut self, cached: &CachedProgress) -> bool {
        let before = self.clone();
        if cached.watched_time.is_finite() {
            self.watched_time = self.watched_time.max(cached.watched_time.max(0.0));
        }
        if cached.percentage.is_finite() {
            self.percentage = self.percentage.max(round2(cached.percentage.clamp(0.0, 100.0)));
        }
        self.last_marker = self.last_marker.max(cached.last_marker.clamp(0, 100));
        self.completed |= cached.completed || self.percentage >= self.threshold;
        *self != before
    }

    fn record_milestones(&mut self, obs: &mut Observation) {
        let marker = marker_for(self.percentage);
        if marker > self.last_marker {
            self.last_marker = marker;
            obs.milestones.push(Milestone::Step(marker));
        }
        if !self.completed && self.percentage >= self.threshold {
            self.completed = true;
            obs.milestones.push(Milestone::Completed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::sampler::PlayerState;
    use chrono::Utc;

    fn at(position: f64) -> Sample {
        Sample {
            position,
            duration: 200.0,
            state: PlayerState::Playing,
            at: Utc::now(),
        }
    }

    #[test]
    fn crossing_a_step_emits_one_marker() {
        let mut tr = MilestoneTracker::new(90.0);
        assert!(tr.observe(&at(10.0)).milestones.is_empty());

        let obs = tr.observe(&at(66.0));
        assert_eq!(obs.milestones, vec![Milestone::Step(30)]);
        assert_eq!(tr.percentage(), 33.0);
        assert_eq!(tr.last_marker(), 30);

        assert!(tr.observe(&at(70.0)).milestones.is_empty());
    }

    #[test]
    fn backward_seek_does_not_regress() {
        let mut tr = MilestoneTracker::new(90.0);
        tr.observe(&at(100.0));
        let obs = tr.observe(&at(20.0));
        assert!(!obs.advanced);
        assert_eq!(tr.percentage(), 50.0);
        assert_eq!(tr.watched_time(), 100.0);
    }

    #[test]
    fn completion_fires_once_at_threshold() {
        let mut tr = MilestoneTracker::new(90.0);
        let obs = tr.observe(&at(181.0));
        assert!(obs.completed());
        assert_eq!(obs.milestones, vec![Milestone::Step(90), Milestone::Completed]);

        let obs = tr.observe(&at(200.0));
        assert_eq!(obs.milestones, vec![Milestone::Step(100)]);
        assert!(tr.completed());
    }

    #[test]
    fn mark_viewed_completes() {
        let mut tr = MilestoneTracker::new(90.0);
        let obs = tr.mark_viewed();
        assert!(obs.completed());
        assert_eq!(tr.percentage(), 100.0);
        assert!(!tr.mark_viewed().advanced);
    }

    #[test]
    fn merge_takes_the_furthest_progress() {
        let mut tr = MilestoneTracker::new(90.0);
        tr.observe(&at(60.0));
        let changed = tr.merge(&CachedProgress {
            watched_time: 120.0,
            percentage: 60.0,
            last_marker: 60,
            completed: false,
        });
        assert!(changed);
        assert_eq!(tr.watched_time(), 120.0);
        assert_eq!(tr.last_marker(), 60);

        let stale = CachedProgress {
            watched_time: 10.0,
            percentage: 5.0,
            last_marker: 0,
            completed: false,
        };
        assert!(!tr.merge(&stale));
        assert_eq!(tr.percentage(), 60.0);
    }
}
