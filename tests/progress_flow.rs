use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use coursewatch_runtime::{
    app,
    store::{MemoryStore, Store},
    AppState, Config,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_app(config: Config) -> (Router, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (app_over(store.clone(), config), store)
}

/// A fresh router (no open sessions) over an existing store, as after a restart.
fn app_over(store: Arc<MemoryStore>, config: Config) -> Router {
    app(AppState::new(store as Arc<dyn Store>, config))
}

fn config() -> Config {
    Config {
        sample_interval: Duration::ZERO,
        ..Config::default()
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn post(app: &Router, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(app, "POST", uri, body).await
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

/// `/api/progress/ana/{course}/{item}/{action}`
fn progress(course: &str, item: &str, action: &str) -> String {
    format!("/api/progress/ana/{course}/{item}/{action}")
}

async fn create_quiz(app: &Router) -> String {
    let body = json!({
        "title": "Cells quiz",
        "min_percentage": 70.0,
        "questions": [
            {
                "question": "Smallest unit of life?",
                "options": ["cell", "atom"],
                "correct_option": 0
            },
            {
                "question": "Powerhouse?",
                "options": ["nucleus", "mitochondria"],
                "correct_option": 1
            }
        ]
    });
    let (status, quiz) = post(app, "/api/quizzes", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    quiz["id"].as_str().unwrap().to_string()
}

/// Creates a two-video course; the first video optionally carries a quiz.
async fn create_course(app: &Router, quiz_id: Option<&str>) -> (String, String, String) {
    let body = json!({
        "title": "Biology",
        "items": [
            { "kind": "video", "title": "Cells", "url": "bio/cells.mp4", "quiz_id": quiz_id },
            { "kind": "video", "title": "Tissues", "url": "bio/tissues.mp4", "quiz_id": null }
        ]
    });
    let (status, course) = post(app, "/api/courses", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    (
        course["id"].as_str().unwrap().to_string(),
        course["items"][0]["id"].as_str().unwrap().to_string(),
        course["items"][1]["id"].as_str().unwrap().to_string(),
    )
}

fn sample(current_time: f64) -> Value {
    json!({
        "current_time": current_time,
        "duration": 100.0,
        "state": "playing",
        "trigger": "state_change"
    })
}

#[tokio::test]
async fn health_responds() {
    let (app, _) = test_app(config());
    let res = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn second_video_unlocks_after_first_is_watched() {
    let (app, store) = test_app(config());
    let (course, first, second) = create_course(&app, None).await;

    let (status, body) = post(&app, &progress(&course, &second, "open"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["blocked"]["reason"], "not_watched");
    assert_eq!(body["blocked"]["item_id"], first.as_str());

    let (status, _) = post(&app, &progress(&course, &first, "open"), None).await;
    assert_eq!(status, StatusCode::OK);

    let uri = progress(&course, &first, "sample");
    let (_, out) = post(&app, &uri, Some(sample(42.0))).await;
    assert_eq!(out["milestones"][0]["percent"], 40);
    assert_eq!(out["progress"]["saved"], true);

    let (_, out) = post(&app, &uri, Some(sample(20.0))).await;
    assert_eq!(out["progress"]["percentage"], 42.0);

    let (_, out) = post(&app, &uri, Some(sample(91.0))).await;
    assert_eq!(out["progress"]["completed"], true);
    assert!(out["quiz_unlocked"].is_null());
    assert_eq!(store.save_count(), 2);

    let (status, _) = post(&app, &progress(&course, &second, "open"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, overview) = get(&app, &format!("/api/courses/{course}/progress/ana")).await;
    assert_eq!(overview[0]["watched"], true);
    assert_eq!(overview[1]["access"]["status"], "allowed");
}

#[tokio::test]
async fn quiz_gates_the_next_item_until_passed() {
    let (app, _) = test_app(config());
    let quiz = create_quiz(&app).await;
    let (course, first, second) = create_course(&app, Some(&quiz)).await;

    let target = json!({ "user_id": "ana", "course_id": course, "item_id": first });
    let submit = |answers: Value| {
        let mut body = target.clone();
        body["answers"] = answers;
        Some(body)
    };
    let submit_uri = format!("/api/quizzes/{quiz}/submit");

    let (status, _) = post(&app, &submit_uri, submit(json!([0, 1]))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, out) = post(&app, &progress(&course, &first, "sample"), Some(sample(100.0))).await;
    assert_eq!(out["quiz_unlocked"], quiz.as_str());

    let (status, body) = post(&app, &progress(&course, &second, "open"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["blocked"]["reason"], "quiz_not_passed");

    let (_, out) = post(&app, &submit_uri, submit(json!([1, 1]))).await;
    assert_eq!(out["grading"]["score"], 50.0);
    assert_eq!(out["quiz"], "unlocked");

    let skip_uri = format!("/api/quizzes/{quiz}/skip");
    let (status, _) = post(&app, &skip_uri, Some(target.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, out) = post(&app, &submit_uri, submit(json!([0, 1]))).await;
    assert_eq!(out["result"]["passed"], true);
    assert_eq!(out["quiz"], "passed");

    let (status, _) = post(&app, &progress(&course, &second, "open"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn public_quiz_hides_the_answer_key() {
    let (app, _) = test_app(config());
    let quiz = create_quiz(&app).await;
    let (status, body) = get(&app, &format!("/api/quizzes/{quiz}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["questions"][0].get("correct_option").is_none());
}

#[tokio::test]
async fn unload_and_reload_keep_progress() {
    let (app, store) = test_app(config());
    let (course, first, _) = create_course(&app, None).await;

    post(&app, &progress(&course, &first, "open"), None).await;
    let (_, out) = post(&app, &progress(&course, &first, "sample"), Some(sample(5.0))).await;
    assert_eq!(out["progress"]["saved"], false);

    let (status, out) = post(&app, &progress(&course, &first, "unload"), Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["wrote"], true);
    assert_eq!(store.save_count(), 1);

    // a reload carrying progress the server never saw
    let cached = json!({
        "cached": {
            "watched_time": 37.0,
            "percentage": 37.0,
            "last_marker": 30,
            "completed": false
        }
    });
    let (_, out) = post(&app, &progress(&course, &first, "open"), Some(cached)).await;
    assert_eq!(out["progress"]["watched_time"], 37.0);
    assert_eq!(out["progress"]["saved"], true);
}

#[tokio::test]
async fn unload_after_restart_keeps_cached_progress() {
    let (before, store) = test_app(config());
    let (course, first, _) = create_course(&before, None).await;

    post(&before, &progress(&course, &first, "open"), None).await;
    let (_, out) = post(&before, &progress(&course, &first, "sample"), Some(sample(8.0))).await;
    assert_eq!(out["progress"]["saved"], false);

    let after = app_over(store.clone(), config());
    let cached = json!({ "watched_time": 8.0, "percentage": 8.0 });
    let (status, out) = post(&after, &progress(&course, &first, "unload"), Some(cached)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(out["wrote"], true);
    assert_eq!(store.save_count(), 1);

    let (_, overview) = get(&after, &format!("/api/courses/{course}/progress/ana")).await;
    assert_eq!(overview[0]["watched_time"], 8.0);
}

#[tokio::test]
async fn open_navigation_skips_gating() {
    let (app, _) = test_app(Config {
        require_previous_completion: false,
        ..config()
    });
    let (course, _, second) = create_course(&app, None).await;
    let (status, _) = post(&app, &progress(&course, &second, "open"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_samples_are_rejected() {
    let (app, _) = test_app(config());
    let (course, first, _) = create_course(&app, None).await;
    let bad = json!({ "current_time": 3.0, "duration": 0.0, "state": "playing" });
    let (status, _) = post(&app, &progress(&course, &first, "sample"), Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn grades_are_clamped_and_classified() {
    let (app, _) = test_app(config());
    let p1 = json!({ "student_id": "ana", "assessment": "P1", "grade": 12.0 });
    let (_, g) = send(&app, "PUT", "/api/grades", Some(p1)).await;
    assert_eq!(g["grade"], 10.0);
    assert_eq!(g["status"], "approved");

    let p2 = json!({ "student_id": "ana", "assessment": "P2", "grade": null });
    send(&app, "PUT", "/api/grades", Some(p2)).await;
    let (_, list) = get(&app, "/api/grades/ana").await;
    assert_eq!(list[1]["status"], "pending");
}

#[tokio::test]
async fn live_quiz_draws_from_the_roster() {
    let (app, _) = test_app(config());
    let (status, _) = post(&app, "/api/live/7A/draw", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    post(&app, "/api/live/7A/start", Some(json!({ "students": ["ana", "bia"] }))).await;
    let (_, a) = post(&app, "/api/live/7A/draw", None).await;
    let (_, b) = post(&app, "/api/live/7A/draw", None).await;
    assert_ne!(a["student"], b["student"]);
    assert_eq!(b["remaining"], 0);
}
