use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::gating::GatingPolicy;
use crate::live_quiz::LiveQuizRegistry;
use crate::progress::session::SessionRegistry;
use crate::progress::ProgressPolicy;
use crate::quiz::QuizUnlockController;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionRegistry>,
    pub live: Arc<LiveQuizRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            sessions: Arc::new(SessionRegistry::new(ProgressPolicy::from(&config))),
            live: Arc::new(LiveQuizRegistry::default()),
            config: Arc::new(config),
        }
    }

    pub fn gating_policy(&self) -> GatingPolicy {
        GatingPolicy {
            require_previous_completion: self.config.require_previous_completion,
            allow_quiz_skip: self.config.allow_quiz_skip,
        }
    }

    pub fn quiz_controller(&self) -> QuizUnlockController {
        QuizUnlockController::new(self.config.allow_quiz_skip)
    }
}

/// Periodically writes progress that is due but had no sample to trigger it,
/// and drops sessions that went quiet.
pub fn spawn_flush_sweeper(state: AppState) -> JoinHandle<()> {
    let period = state.config.save_interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let written = state
                .sessions
                .sweep(state.store.as_ref(), Utc::now(), state.config.session_idle)
                .await;
            if written > 0 {
                tracing::debug!(written, open = state.sessions.len(), "sweep flushed progress");
            }
        }
    })
}
