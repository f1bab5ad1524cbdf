use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::{
    error::AppError,
    gating::{Access, GatingEvaluator, ItemStatus},
    grades::{self, GradeView},
    live_quiz::Draw,
    models::*,
    player,
    progress::{
        sampler::RawSample,
        session::{SampleOutcome, SessionGuard, SessionView},
    },
    quiz::{self, Grading, QuizState},
    state::AppState,
};

type ApiResult<T> = Result<Json<T>, AppError>;

pub fn router(state: AppState) -> Router {
    let static_dir = state.config.data_dir.clone();
    Router::new()
        // authoring
        .route("/api/courses", post(create_course))
        .route("/api/courses/:course_id", get(get_course))
        .route("/api/courses/:course_id/progress/:user_id", get(course_progress))
        .route("/api/quizzes", post(create_quiz))
        .route("/api/quizzes/:quiz_id", get(get_quiz))
        // watch progress
        .route("/api/progress/:user_id/:course_id/:item_id/open", post(open_session))
        .route("/api/progress/:user_id/:course_id/:item_id/sample", post(post_sample))
        .route("/api/progress/:user_id/:course_id/:item_id/viewed", post(mark_viewed))
        .route("/api/progress/:user_id/:course_id/:item_id/unload", post(unload))
        // quizzes
        .route("/api/quizzes/:quiz_id/submit", post(submit_quiz))
        .route("/api/quizzes/:quiz_id/skip", post(skip_quiz))
        // grades
        .route("/api/grades", put(upsert_grade))
        .route("/api/grades/:student_id", get(list_grades))
        // live quiz
        .route("/api/live/:class_id/start", post(start_live_quiz))
        .route("/api/live/:class_id/draw", post(draw_student))
        // player shell + media
        .route("/player/:course_id/:item_id", get(player::player_shell))
        .nest_service("/content", ServeDir::new(static_dir))
        .with_state(state)
}

// --- authoring ---

async fn create_course(
    State(state): State<AppState>,
    Json(req): Json<CreateCourseReq>,
) -> ApiResult<CourseWithItems> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    for it in &req.items {
        if let Some(qid) = it.quiz_id {
            if state.store.quiz(qid).await?.is_none() {
                return Err(AppError::BadRequest(format!("quiz {qid} does not exist")));
            }
        }
    }
    let created = state.store.create_course(&req).await?;
    tracing::info!(course_id = %created.course.id, items = created.items.len(), "course created");
    Ok(Json(created))
}

async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<Uuid>,
) -> ApiResult<CourseWithItems> {
    let course = state
        .store
        .course(course_id)
        .await?
        .ok_or(AppError::NotFound("course"))?;
    let items = state.store.course_items(course_id).await?;
    Ok(Json(CourseWithItems { course, items }))
}

async fn create_quiz(
    State(state): State<AppState>,
    Json(req): Json<CreateQuizReq>,
) -> ApiResult<Quiz> {
    quiz::validate(&req)?;
    let created = state.store.create_quiz(&req).await?;
    tracing::info!(quiz_id = %created.id, questions = created.questions.len(), "quiz created");
    Ok(Json(created))
}

async fn get_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
) -> ApiResult<PublicQuiz> {
    let quiz = state
        .store
        .quiz(quiz_id)
        .await?
        .ok_or(AppError::NotFound("quiz"))?;
    Ok(Json(PublicQuiz::from(&quiz)))
}

// --- progress overview + gating ---

#[derive(Serialize)]
struct ItemProgress {
    #[serde(flatten)]
    item: CourseItem,
    watched: bool,
    progress: f64,
    watched_time: f64,
    quiz: QuizState,
    access: Access,
}

struct CourseSnapshot {
    items: Vec<CourseItem>,
    records: HashMap<Uuid, ProgressRecord>,
    statuses: HashMap<Uuid, ItemStatus>,
}

/// Current per-item state for a learner: stored progress, overlaid with any live
/// session that has not been written yet, plus quiz results.
async fn snapshot(
    state: &AppState,
    user_id: &str,
    course_id: Uuid,
) -> Result<CourseSnapshot, AppError> {
    state
        .store
        .course(course_id)
        .await?
        .ok_or(AppError::NotFound("course"))?;
    let items = state.store.course_items(course_id).await?;

    let mut records: HashMap<Uuid, ProgressRecord> = state
        .store
        .course_progress(user_id, course_id)
        .await?
        .into_iter()
        .map(|r| (r.item_id, r))
        .collect();
    for item in &items {
        if let Some(live) = state.sessions.get(&ProgressKey::new(user_id, course_id, item.id)) {
            records.insert(item.id, live.lock().await.record());
        }
    }

    let ctl = state.quiz_controller();
    let mut statuses = HashMap::with_capacity(items.len());
    for item in &items {
        let watched = records.get(&item.id).is_some_and(|r| r.completed);
        let result = match item.quiz_id {
            Some(qid) => state.store.quiz_result(user_id, qid).await?,
            None => None,
        };
        statuses.insert(
            item.id,
            ItemStatus {
                watched,
                quiz: ctl.state(item.quiz_id, watched, result.as_ref()),
            },
        );
    }
    Ok(CourseSnapshot {
        items,
        records,
        statuses,
    })
}

async fn course_progress(
    State(state): State<AppState>,
    Path((course_id, user_id)): Path<(Uuid, String)>,
) -> ApiResult<Vec<ItemProgress>> {
    let snap = snapshot(&state, &user_id, course_id).await?;
    let gate = GatingEvaluator::new(&snap.items, &snap.statuses, state.gating_policy());
    let out = snap
        .items
        .iter()
        .map(|item| {
            let rec = snap.records.get(&item.id);
            let status = snap.statuses.get(&item.id).copied().unwrap_or_default();
            ItemProgress {
                item: item.clone(),
                watched: status.watched,
                progress: rec.map_or(0.0, |r| r.percentage),
                watched_time: rec.map_or(0.0, |r| r.watched_time),
                quiz: status.quiz,
                access: gate.evaluate(item.id).unwrap_or(Access::Allowed),
            }
        })
        .collect();
    Ok(Json(out))
}

/// Resolves the item and enforces sequential access to it.
async fn ensure_access(
    state: &AppState,
    key: &ProgressKey,
) -> Result<(CourseItem, CourseSnapshot), AppError> {
    let snap = snapshot(state, &key.user_id, key.course_id).await?;
    let access = GatingEvaluator::new(&snap.items, &snap.statuses, state.gating_policy())
        .evaluate(key.item_id);
    match access {
        None => Err(AppError::NotFound("item")),
        Some(Access::Blocked(blocked)) => {
            tracing::info!(key = %key, blocked_by = %blocked.item_id, "navigation blocked");
            Err(AppError::Locked(blocked))
        }
        Some(Access::Allowed) => {
            let item = snap
                .items
                .iter()
                .find(|i| i.id == key.item_id)
                .cloned()
                .ok_or(AppError::NotFound("item"))?;
            Ok((item, snap))
        }
    }
}

/// Locks the open session for `key`, opening one after a gating check if needed.
async fn live_session(state: &AppState, key: &ProgressKey) -> Result<SessionGuard, AppError> {
    if state.sessions.get(key).is_none() {
        ensure_access(state, key).await?;
    }
    Ok(state
        .sessions
        .acquire(key, state.store.as_ref(), Utc::now())
        .await?)
}

// --- watch session endpoints ---

#[derive(Serialize)]
struct OpenResponse {
    item: CourseItem,
    progress: SessionView,
    quiz: QuizState,
    sample_interval_ms: u64,
}

async fn open_session(
    State(state): State<AppState>,
    Path((user_id, course_id, item_id)): Path<(String, Uuid, Uuid)>,
    body: Option<Json<OpenSessionReq>>,
) -> ApiResult<OpenResponse> {
    let key = ProgressKey::new(user_id, course_id, item_id);
    let (item, _) = ensure_access(&state, &key).await?;
    let cached = body.and_then(|Json(b)| b.cached);
    let session = state
        .sessions
        .open(key.clone(), state.store.as_ref(), cached.as_ref(), Utc::now())
        .await?;
    let progress = session.lock().await.view();

    let result = match item.quiz_id {
        Some(qid) => state.store.quiz_result(&key.user_id, qid).await?,
        None => None,
    };
    let quiz = state
        .quiz_controller()
        .state(item.quiz_id, progress.completed, result.as_ref());
    Ok(Json(OpenResponse {
        item,
        progress,
        quiz,
        sample_interval_ms: state.config.sample_interval.as_millis() as u64,
    }))
}

#[derive(Serialize)]
struct SampleResponse {
    #[serde(flatten)]
    outcome: SampleOutcome,
    /// Set when this sample completed an item that carries a quiz.
    quiz_unlocked: Option<Uuid>,
}

async fn unlocked_quiz(
    state: &AppState,
    key: &ProgressKey,
    outcome: &SampleOutcome,
) -> Result<Option<Uuid>, AppError> {
    if !outcome.completed_now() {
        return Ok(None);
    }
    let items = state.store.course_items(key.course_id).await?;
    let quiz_id = items
        .iter()
        .find(|i| i.id == key.item_id)
        .and_then(|i| i.quiz_id);
    tracing::info!(key = %key, quiz = ?quiz_id, "item completed");
    Ok(quiz_id)
}

async fn post_sample(
    State(state): State<AppState>,
    Path((user_id, course_id, item_id)): Path<(String, Uuid, Uuid)>,
    Json(raw): Json<RawSample>,
) -> ApiResult<SampleResponse> {
    let key = ProgressKey::new(user_id, course_id, item_id);
    let mut session = live_session(&state, &key).await?;
    let outcome = session.on_sample(raw, state.store.as_ref(), Utc::now()).await?;
    drop(session);
    let quiz_unlocked = unlocked_quiz(&state, &key, &outcome).await?;
    Ok(Json(SampleResponse {
        outcome,
        quiz_unlocked,
    }))
}

async fn mark_viewed(
    State(state): State<AppState>,
    Path((user_id, course_id, item_id)): Path<(String, Uuid, Uuid)>,
) -> ApiResult<SampleResponse> {
    let key = ProgressKey::new(user_id, course_id, item_id);
    let mut session = live_session(&state, &key).await?;
    let outcome = session.mark_viewed(state.store.as_ref(), Utc::now()).await;
    drop(session);
    let quiz_unlocked = unlocked_quiz(&state, &key, &outcome).await?;
    Ok(Json(SampleResponse {
        outcome,
        quiz_unlocked,
    }))
}

async fn unload(
    State(state): State<AppState>,
    Path((user_id, course_id, item_id)): Path<(String, Uuid, Uuid)>,
    body: Option<Json<CachedProgress>>,
) -> ApiResult<serde_json::Value> {
    let key = ProgressKey::new(user_id, course_id, item_id);
    let now = Utc::now();
    // the beacon may outlive the session (restart, idle eviction); its cache still counts
    if let Some(Json(cached)) = body {
        let mut session = live_session(&state, &key).await?;
        session.absorb(&cached, now);
    }
    let wrote = state.sessions.close(&key, state.store.as_ref(), now).await?;
    Ok(Json(json!({ "ok": true, "wrote": wrote })))
}

// --- quizzes ---

#[derive(Serialize)]
struct SubmitResponse {
    grading: Grading,
    result: QuizResult,
    quiz: QuizState,
}

/// Item, completion flag and previous result for a quiz attached to an item.
async fn quiz_context(
    state: &AppState,
    key: &ProgressKey,
    quiz_id: Uuid,
) -> Result<(Quiz, QuizState, Option<QuizResult>), AppError> {
    let (item, snap) = ensure_access(state, key).await?;
    if item.quiz_id != Some(quiz_id) {
        return Err(quiz::QuizError::NotAttached.into());
    }
    let quiz = state
        .store
        .quiz(quiz_id)
        .await?
        .ok_or(AppError::NotFound("quiz"))?;
    let previous = state.store.quiz_result(&key.user_id, quiz_id).await?;
    let status = snap.statuses.get(&item.id).copied().unwrap_or_default();
    Ok((quiz, status.quiz, previous))
}

async fn submit_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<SubmitQuizReq>,
) -> ApiResult<SubmitResponse> {
    let key = ProgressKey::new(req.user_id, req.course_id, req.item_id);
    let (quiz, current, previous) = quiz_context(&state, &key, quiz_id).await?;
    let ctl = state.quiz_controller();
    let (grading, result) = ctl.submit(
        &quiz,
        current,
        &key.user_id,
        &req.answers,
        previous.as_ref(),
        Utc::now(),
    )?;
    state.store.save_quiz_result(&result).await?;
    tracing::info!(
        key = %key,
        quiz_id = %quiz_id,
        score = grading.score,
        passed = grading.passed,
        "quiz submitted"
    );
    Ok(Json(SubmitResponse {
        quiz: ctl.state(Some(quiz_id), true, Some(&result)),
        grading,
        result,
    }))
}

async fn skip_quiz(
    State(state): State<AppState>,
    Path(quiz_id): Path<Uuid>,
    Json(req): Json<SkipQuizReq>,
) -> ApiResult<QuizResult> {
    let key = ProgressKey::new(req.user_id, req.course_id, req.item_id);
    let (_, current, previous) = quiz_context(&state, &key, quiz_id).await?;
    let result = state
        .quiz_controller()
        .skip(quiz_id, current, &key.user_id, previous.as_ref(), Utc::now())?;
    state.store.save_quiz_result(&result).await?;
    tracing::info!(key = %key, quiz_id = %quiz_id, "quiz skipped");
    Ok(Json(result))
}

// --- grades ---

async fn upsert_grade(
    State(state): State<AppState>,
    Json(req): Json<UpsertGradeReq>,
) -> ApiResult<GradeView> {
    let rec = grades::record_from(req, Utc::now())?;
    let saved = state.store.upsert_grade(&rec).await?;
    Ok(Json(grades::view(saved, state.config.passing_grade)))
}

async fn list_grades(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> ApiResult<Vec<GradeView>> {
    let passing = state.config.passing_grade;
    let out = state
        .store
        .grades(&student_id)
        .await?
        .into_iter()
        .map(|g| grades::view(g, passing))
        .collect();
    Ok(Json(out))
}

// --- live quiz ---

async fn start_live_quiz(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
    Json(req): Json<StartLiveQuizReq>,
) -> ApiResult<serde_json::Value> {
    let students = state.live.start(&class_id, req.students)?;
    Ok(Json(json!({ "class_id": class_id, "students": students })))
}

async fn draw_student(
    State(state): State<AppState>,
    Path(class_id): Path<String>,
) -> ApiResult<Draw> {
    Ok(Json(state.live.draw(&class_id)?))
}
