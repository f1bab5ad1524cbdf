use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::gating::Blocked;
use crate::grades::GradeError;
use crate::live_quiz::LiveQuizError;
use crate::progress::sampler::SampleError;
use crate::quiz::QuizError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("item is locked: {0}")]
    Locked(Blocked),

    #[error(transparent)]
    Sample(#[from] SampleError),

    #[error(transparent)]
    Quiz(#[from] QuizError),

    #[error(transparent)]
    Grade(#[from] GradeError),

    #[error(transparent)]
    LiveQuiz(#[from] LiveQuizError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Sample(_) | AppError::Grade(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Locked(_) => StatusCode::FORBIDDEN,
            AppError::Quiz(e) => match e {
                QuizError::Locked | QuizError::SkipNotAllowed => StatusCode::FORBIDDEN,
                _ => StatusCode::BAD_REQUEST,
            },
            AppError::LiveQuiz(e) => match e {
                LiveQuizError::NoRound => StatusCode::NOT_FOUND,
                LiveQuizError::EmptyRoster => StatusCode::BAD_REQUEST,
            },
            AppError::Store(StoreError::NotFound) => StatusCode::NOT_FOUND,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
        }
        let body = match &self {
            AppError::Locked(blocked) => json!({ "error": self.to_string(), "blocked": blocked }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
