use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub data_dir: String,
    pub save_interval: Duration,
    pub sample_interval: Duration,
    pub session_idle: Duration,
    pub completion_threshold: f64,
    pub require_previous_completion: bool,
    pub allow_quiz_skip: bool,
    pub passing_grade: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            database_url: None,
            data_dir: "./data".into(),
            save_interval: Duration::from_secs(10),
            sample_interval: Duration::from_millis(5000),
            session_idle: Duration::from_secs(1800),
            completion_threshold: 90.0,
            require_previous_completion: true,
            allow_quiz_skip: false,
            passing_grade: 6.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Config::default();
        let cfg = Config {
            port: load("PORT", d.port)?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            data_dir: env::var("DATA_DIR").unwrap_or(d.data_dir),
            save_interval: Duration::from_secs(load("SAVE_INTERVAL_SECS", 10u64)?),
            sample_interval: Duration::from_millis(load("SAMPLE_INTERVAL_MS", 5000u64)?),
            session_idle: Duration::from_secs(load("SESSION_IDLE_SECS", 1800u64)?),
            completion_threshold: load("COMPLETION_THRESHOLD", d.completion_threshold)?,
            require_previous_completion: load(
                "REQUIRE_PREVIOUS_COMPLETION",
                d.require_previous_completion,
            )?,
            allow_quiz_skip: load("ALLOW_QUIZ_SKIP", d.allow_quiz_skip)?,
            passing_grade: load("PASSING_GRADE", d.passing_grade)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.completion_threshold > 0.0 && self.completion_threshold <= 100.0) {
            return Err(ConfigError::Invalid {
                key: "COMPLETION_THRESHOLD",
                value: self.completion_threshold.to_string(),
                reason: "must be in (0, 100]".into(),
            });
        }
        if !(0.0..=10.0).contains(&self.passing_grade) {
            return Err(ConfigError::Invalid {
                key: "PASSING_GRADE",
                value: self.passing_grade.to_string(),
                reason: "must be in [0, 10]".into(),
            });
        }
        Ok(())
    }
}

fn load<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            warn!(key, value = %raw, "invalid configuration value");
            ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
    }
}
