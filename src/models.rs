use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Video,
    Slide,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Video => "video",
            ItemKind::Slide => "slide",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(ItemKind::Video),
            "slide" => Ok(ItemKind::Slide),
            other => Err(format!("unknown item kind `{other}`")),
        }
    }
}

/// A playable unit of a course. `position` orders items for gating.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CourseItem {
    pub id: Uuid,
    pub course_id: Uuid,
    pub kind: ItemKind,
    pub title: String,
    pub url: String,
    pub position: i32,
    pub quiz_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgressKey {
    pub user_id: String,
    pub course_id: Uuid,
    pub item_id: Uuid,
}

impl ProgressKey {
    pub fn new(user_id: impl Into<String>, course_id: Uuid, item_id: Uuid) -> Self {
        Self {
            user_id: user_id.into(),
            course_id,
            item_id,
        }
    }
}

impl fmt::Display for ProgressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.course_id, self.item_id)
    }
}

/// Persisted watch progress for one (user, course, item).
#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub user_id: String,
    pub course_id: Uuid,
    pub item_id: Uuid,
    pub watched_time: f64,
    pub percentage: f64,
    pub last_marker: i32,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn key(&self) -> ProgressKey {
        ProgressKey::new(self.user_id.clone(), self.course_id, self.item_id)
    }

    /// Same progress, ignoring the write timestamp.
    pub fn same_progress(&self, other: &ProgressRecord) -> bool {
        self.watched_time == other.watched_time
            && self.percentage == other.percentage
            && self.last_marker == other.last_marker
            && self.completed == other.completed
    }
}

/// Progress the browser kept locally because it was never confirmed saved.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CachedProgress {
    #[serde(default)]
    pub watched_time: f64,
    #[serde(default)]
    pub percentage: f64,
    #[serde(default)]
    pub last_marker: i32,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_option: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Quiz {
    pub id: Uuid,
    pub title: String,
    pub min_percentage: f64,
    pub questions: Vec<QuizQuestion>,
    pub created_at: DateTime<Utc>,
}

/// Quiz as served to learners: no answer key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublicQuiz {
    pub id: Uuid,
    pub title: String,
    pub min_percentage: f64,
    pub questions: Vec<PublicQuestion>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PublicQuestion {
    pub question: String,
    pub options: Vec<String>,
}

impl From<&Quiz> for PublicQuiz {
    fn from(q: &Quiz) -> Self {
        Self {
            id: q.id,
            title: q.title.clone(),
            min_percentage: q.min_percentage,
            questions: q
                .questions
                .iter()
                .map(|qq| PublicQuestion {
                    question: qq.question.clone(),
                    options: qq.options.clone(),
                })
                .collect(),
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuizResult {
    pub user_id: String,
    pub quiz_id: Uuid,
    pub score: f64,
    pub passed: bool,
    pub skipped: bool,
    pub submitted_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeRecord {
    pub student_id: String,
    pub assessment: String,
    pub grade: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

// --- requests ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NewCourseItem {
    pub kind: ItemKind,
    pub title: String,
    pub url: String,
    pub quiz_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateCourseReq {
    pub title: String,
    pub items: Vec<NewCourseItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CourseWithItems {
    #[serde(flatten)]
    pub course: Course,
    pub items: Vec<CourseItem>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateQuizReq {
    pub title: String,
    pub min_percentage: f64,
    pub questions: Vec<QuizQuestion>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct OpenSessionReq {
    #[serde(default)]
    pub cached: Option<CachedProgress>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubmitQuizReq {
    pub user_id: String,
    pub course_id: Uuid,
    pub item_id: Uuid,
    pub answers: Vec<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SkipQuizReq {
    pub user_id: String,
    pub course_id: Uuid,
    pub item_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpsertGradeReq {
    pub student_id: String,
    pub assessment: String,
    pub grade: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct StartLiveQuizReq {
    pub students: Vec<String>,
}
