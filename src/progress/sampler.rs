//! Normalizes raw player samples and throttles interval polls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerState {
    Unstarted,
    Playing,
    Paused,
    Buffering,
    Cued,
    Ended,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    #[default]
    Tick,
    StateChange,
}

/// What the player shell reports: position and length in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub current_time: f64,
    pub duration: f64,
    pub state: PlayerState,
    #[serde(default)]
    pub trigger: Trigger,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub position: f64,
    pub duration: f64,
    pub state: PlayerState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq)]
pub enum SampleError {
    #[error("invalid playback position {0}")]
    InvalidPosition(f64),
    #[error("invalid media duration {0}")]
    InvalidDuration(f64),
}

#[derive(Debug, Clone)]
pub struct ProgressSampler {
    min_interval: Duration,
    last_accepted: Option<DateTime<Utc>>,
}

impl ProgressSampler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_accepted: None,
        }
    }

    /// `Ok(None)` means the sample was valid but arrived too soon after the last one.
    pub fn accept(
        &mut self,
        raw: RawSample,
        now: DateTime<Utc>,
    ) -> Result<Option<Sample>, SampleError> {
        if !raw.duration.is_finite() || raw.duration <= 0.0 {
            return Err(SampleError::InvalidDuration(raw.duration));
        }
        if !raw.current_time.is_finite() || raw.current_time < 0.0 {
            return Err(SampleError::InvalidPosition(raw.current_time));
        }

        if raw.trigger == Trigger::Tick && raw.state != PlayerState::Ended {
            if let Some(last) = self.last_accepted {
                let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
                if elapsed < self.min_interval {
                    return Ok(None);
                }
            }
        }

        let position = if raw.state == PlayerState::Ended {
            raw.duration
        } else {
            raw.current_time.min(raw.duration)
        };

        self.last_accepted = Some(now);
        Ok(Some(Sample {
            position,
            duration: raw.duration,
            state: raw.state,
            at: now,
        }))
    }
}
