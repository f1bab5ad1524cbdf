//! Watch-progress tracking: sampling, milestones and persistence.

pub mod sampler;
pub mod session;
pub mod tracker;
pub mod writer;

use std::time::Duration;

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct ProgressPolicy {
    pub completion_threshold: f64,
    pub save_interval: Duration,
    pub sample_interval: Duration,
}

impl From<&Config> for ProgressPolicy {
    fn from(cfg: &Config) -> Self {
        Self {
            completion_threshold: cfg.completion_threshold,
            save_interval: cfg.save_interval,
            // tolerate a little jitter in the shell's poll timer
            sample_interval: cfg.sample_interval.mul_f64(0.8),
        }
    }
}
