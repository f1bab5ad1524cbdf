//! Comprehension quizzes attached to course items: unlock state, grading and skips.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{CreateQuizReq, Quiz, QuizResult};

#[derive(Debug, Error, PartialEq)]
pub enum QuizError {
    #[error("quiz has no questions")]
    Empty,
    #[error("question {0} needs at least two options and a valid correct option")]
    InvalidQuestion(usize),
    #[error("min_percentage {0} must be within 0..=100")]
    InvalidMinPercentage(f64),
    #[error("expected {expected} answers, got {got}")]
    AnswerCount { expected: usize, got: usize },
    #[error("quiz is locked until the item is watched")]
    Locked,
    #[error("skipping quizzes is not allowed")]
    SkipNotAllowed,
    #[error("quiz is not attached to this item")]
    NotAttached,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuizState {
    /// No quiz attached to the item.
    #[default]
    None,
    Locked,
    Unlocked,
    Passed,
    Skipped,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Grading {
    pub correct: usize,
    pub total: usize,
    pub score: f64,
    pub passed: bool,
}

pub fn validate(req: &CreateQuizReq) -> Result<(), QuizError> {
    if !(0.0..=100.0).contains(&req.min_percentage) {
        return Err(QuizError::InvalidMinPercentage(req.min_percentage));
    }
    if req.questions.is_empty() {
        return Err(QuizError::Empty);
    }
    for (i, q) in req.questions.iter().enumerate() {
        let in_range = usize::try_from(q.correct_option).is_ok_and(|c| c < q.options.len());
        if q.options.len() < 2 || !in_range {
            return Err(QuizError::InvalidQuestion(i));
        }
    }
    Ok(())
}

/// Scores `answers` (one option index per question) against the quiz.
pub fn grade(quiz: &Quiz, answers: &[i32]) -> Result<Grading, QuizError> {
    let total = quiz.questions.len();
    if total == 0 {
        return Err(QuizError::Empty);
    }
    if answers.len() != total {
        return Err(QuizError::AnswerCount {
            expected: total,
            got: answers.len(),
        });
    }
    let correct = quiz
        .questions
        .iter()
        .zip(answers)
        .filter(|(q, a)| q.correct_option == **a)
        .count();
    let score = ((correct as f64 / total as f64) * 10_000.0).round() / 100.0;
    Ok(Grading {
        correct,
        total,
        score,
        passed: score >= quiz.min_percentage,
    })
}

/// Decides when an item's quiz is surfaced and whether the learner may move on.
#[derive(Debug, Clone, Copy)]
pub struct QuizUnlockController {
    pub allow_skip: bool,
}

impl QuizUnlockController {
    pub fn new(allow_skip: bool) -> Self {
        Self { allow_skip }
    }

    pub fn state(
        &self,
        quiz_id: Option<Uuid>,
        item_completed: bool,
        result: Option<&QuizResult>,
    ) -> QuizState {
        if quiz_id.is_none() {
            return QuizState::None;
        }
        match result {
            Some(r) if r.passed => QuizState::Passed,
            Some(r) if r.skipped && self.allow_skip => QuizState::Skipped,
            _ if !item_completed => QuizState::Locked,
            _ => QuizState::Unlocked,
        }
    }

    pub fn can_advance(&self, watched: bool, state: QuizState) -> bool {
        watched
            && match state {
                QuizState::None | QuizState::Passed => true,
                QuizState::Skipped => self.allow_skip,
                QuizState::Locked | QuizState::Unlocked => false,
            }
    }

    /// Grades a submission and folds it into any earlier result. A pass is kept
    /// even if a later attempt fails.
    pub fn submit(
        &self,
        quiz: &Quiz,
        state: QuizState,
        user_id: &str,
        answers: &[i32],
        previous: Option<&QuizResult>,
        now: DateTime<Utc>,
    ) -> Result<(Grading, QuizResult), QuizError> {
        if matches!(state, QuizState::Locked | QuizState::None) {
            return Err(if state == QuizState::None {
                QuizError::NotAttached
            } else {
                QuizError::Locked
            });
        }
        let grading = grade(quiz, answers)?;
        let result = match previous {
            Some(prev) if prev.passed && !grading.passed => QuizResult {
                submitted_at: now,
                ..prev.clone()
            },
            Some(prev) if prev.passed => QuizResult {
                score: prev.score.max(grading.score),
                submitted_at: now,
                ..prev.clone()
            },
            _ => QuizResult {
                user_id: user_id.to_string(),
                quiz_id: quiz.id,
                score: grading.score,
                passed: grading.passed,
                skipped: false,
                submitted_at: now,
            },
        };
        Ok((grading, result))
    }

    pub fn skip(
        &self,
        quiz_id: Uuid,
        state: QuizState,
        user_id: &str,
        previous: Option<&QuizResult>,
        now: DateTime<Utc>,
    ) -> Result<QuizResult, QuizError> {
        if !self.allow_skip {
            return Err(QuizError::SkipNotAllowed);
        }
        match state {
            QuizState::None => Err(QuizError::NotAttached),
            QuizState::Locked => Err(QuizError::Locked),
            QuizState::Passed => Ok(previous.cloned().unwrap_or(QuizResult {
                user_id: user_id.to_string(),
                quiz_id,
                score: 0.0,
                passed: true,
                skipped: false,
                submitted_at: now,
            })),
            QuizState::Unlocked | QuizState::Skipped => Ok(QuizResult {
                user_id: user_id.to_string(),
                quiz_id,
                score: previous.map_or(0.0, |p| p.score),
                passed: false,
                skipped: true,
                submitted_at: now,
            }),
        }
    }
}
