//! Persistence behind a trait: Postgres in production, in-memory for dev and tests.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{query, query_as, FromRow};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::db::Db;
use crate::models::*;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_course(&self, req: &CreateCourseReq) -> Result<CourseWithItems, StoreError>;
    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError>;
    /// Items ordered by position.
    async fn course_items(&self, course_id: Uuid) -> Result<Vec<CourseItem>, StoreError>;

    async fn create_quiz(&self, req: &CreateQuizReq) -> Result<Quiz, StoreError>;
    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError>;

    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StoreError>;
    /// Upsert that never lowers stored progress.
    async fn save_progress(&self, rec: &ProgressRecord) -> Result<(), StoreError>;
    async fn course_progress(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError>;

    async fn quiz_result(
        &self,
        user_id: &str,
        quiz_id: Uuid,
    ) -> Result<Option<QuizResult>, StoreError>;
    async fn save_quiz_result(&self, res: &QuizResult) -> Result<(), StoreError>;

    async fn upsert_grade(&self, rec: &GradeRecord) -> Result<GradeRecord, StoreError>;
    async fn grades(&self, student_id: &str) -> Result<Vec<GradeRecord>, StoreError>;
}

fn merge_progress(stored: &ProgressRecord, incoming: &ProgressRecord) -> ProgressRecord {
    ProgressRecord {
        watched_time: stored.watched_time.max(incoming.watched_time),
        percentage: stored.percentage.max(incoming.percentage),
        last_marker: stored.last_marker.max(incoming.last_marker),
        completed: stored.completed || incoming.completed,
        ..incoming.clone()
    }
}

// --- in-memory ---

#[derive(Default)]
struct Tables {
    courses: HashMap<Uuid, Course>,
    items: HashMap<Uuid, Vec<CourseItem>>,
    quizzes: HashMap<Uuid, Quiz>,
    progress: HashMap<ProgressKey, ProgressRecord>,
    quiz_results: HashMap<(String, Uuid), QuizResult>,
    grades: HashMap<(String, String), GradeRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes progress writes fail until switched off again.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful progress writes.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_course(&self, req: &CreateCourseReq) -> Result<CourseWithItems, StoreError> {
        let course = Course {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            created_at: Utc::now(),
        };
        let items: Vec<CourseItem> = req
            .items
            .iter()
            .enumerate()
            .map(|(i, it)| CourseItem {
                id: Uuid::new_v4(),
                course_id: course.id,
                kind: it.kind,
                title: it.title.clone(),
                url: it.url.clone(),
                position: i as i32,
                quiz_id: it.quiz_id,
            })
            .collect();
        let mut t = self.tables();
        t.courses.insert(course.id, course.clone());
        t.items.insert(course.id, items.clone());
        Ok(CourseWithItems { course, items })
    }

    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(self.tables().courses.get(&id).cloned())
    }

    async fn course_items(&self, course_id: Uuid) -> Result<Vec<CourseItem>, StoreError> {
        Ok(self.tables().items.get(&course_id).cloned().unwrap_or_default())
    }

    async fn create_quiz(&self, req: &CreateQuizReq) -> Result<Quiz, StoreError> {
        let quiz = Quiz {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            min_percentage: req.min_percentage,
            questions: req.questions.clone(),
            created_at: Utc::now(),
        };
        self.tables().quizzes.insert(quiz.id, quiz.clone());
        Ok(quiz)
    }

    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError> {
        Ok(self.tables().quizzes.get(&id).cloned())
    }

    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StoreError> {
        Ok(self.tables().progress.get(key).cloned())
    }

    async fn save_progress(&self, rec: &ProgressRecord) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        let mut t = self.tables();
        let merged = match t.progress.get(&rec.key()) {
            Some(stored) => merge_progress(stored, rec),
            None => rec.clone(),
        };
        t.progress.insert(rec.key(), merged);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn course_progress(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        Ok(self
            .tables()
            .progress
            .values()
            .filter(|p| p.user_id == user_id && p.course_id == course_id)
            .cloned()
            .collect())
    }

    async fn quiz_result(
        &self,
        user_id: &str,
        quiz_id: Uuid,
    ) -> Result<Option<QuizResult>, StoreError> {
        Ok(self
            .tables()
            .quiz_results
            .get(&(user_id.to_string(), quiz_id))
            .cloned())
    }

    async fn save_quiz_result(&self, res: &QuizResult) -> Result<(), StoreError> {
        self.tables()
            .quiz_results
            .insert((res.user_id.clone(), res.quiz_id), res.clone());
        Ok(())
    }

    async fn upsert_grade(&self, rec: &GradeRecord) -> Result<GradeRecord, StoreError> {
        self.tables()
            .grades
            .insert((rec.student_id.clone(), rec.assessment.clone()), rec.clone());
        Ok(rec.clone())
    }

    async fn grades(&self, student_id: &str) -> Result<Vec<GradeRecord>, StoreError> {
        let mut out: Vec<GradeRecord> = self
            .tables()
            .grades
            .values()
            .filter(|g| g.student_id == student_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.assessment.cmp(&b.assessment));
        Ok(out)
    }
}

// --- postgres ---

pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[derive(FromRow)]
struct ItemRow {
    id: Uuid,
    course_id: Uuid,
    kind: String,
    title: String,
    url: String,
    position: i32,
    quiz_id: Option<Uuid>,
}

impl TryFrom<ItemRow> for CourseItem {
    type Error = StoreError;

    fn try_from(r: ItemRow) -> Result<Self, Self::Error> {
        Ok(CourseItem {
            kind: r.kind.parse().map_err(StoreError::Corrupt)?,
            id: r.id,
            course_id: r.course_id,
            title: r.title,
            url: r.url,
            position: r.position,
            quiz_id: r.quiz_id,
        })
    }
}

#[derive(FromRow)]
struct QuizRow {
    id: Uuid,
    title: String,
    min_percentage: f64,
    created_at: chrono::DateTime<Utc>,
}

#[derive(FromRow)]
struct QuestionRow {
    question: String,
    options: Vec<String>,
    correct_option: i32,
}

const PROGRESS_COLS: &str =
    "user_id, course_id, item_id, watched_time, percentage, last_marker, completed, updated_at";

#[async_trait]
impl Store for PgStore {
    async fn create_course(&self, req: &CreateCourseReq) -> Result<CourseWithItems, StoreError> {
        let mut tx = self.db.begin().await?;
        let course: Course = query_as(
            "INSERT INTO courses (id, title) VALUES ($1, $2) RETURNING id, title, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&req.title)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(req.items.len());
        for (pos, it) in req.items.iter().enumerate() {
            let row: ItemRow = query_as(
                r#"
                INSERT INTO course_items (id, course_id, kind, title, url, position, quiz_id)
                VALUES ($1,$2,$3,$4,$5,$6,$7)
                RETURNING id, course_id, kind, title, url, position, quiz_id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(course.id)
            .bind(it.kind.as_str())
            .bind(&it.title)
            .bind(&it.url)
            .bind(pos as i32)
            .bind(it.quiz_id)
            .fetch_one(&mut *tx)
            .await?;
            items.push(CourseItem::try_from(row)?);
        }
        tx.commit().await?;
        Ok(CourseWithItems { course, items })
    }

    async fn course(&self, id: Uuid) -> Result<Option<Course>, StoreError> {
        Ok(query_as("SELECT id, title, created_at FROM courses WHERE id=$1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn course_items(&self, course_id: Uuid) -> Result<Vec<CourseItem>, StoreError> {
        let rows: Vec<ItemRow> = query_as(
            "SELECT id, course_id, kind, title, url, position, quiz_id FROM course_items WHERE course_id=$1 ORDER BY position",
        )
        .bind(course_id)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter().map(CourseItem::try_from).collect()
    }

    async fn create_quiz(&self, req: &CreateQuizReq) -> Result<Quiz, StoreError> {
        let mut tx = self.db.begin().await?;
        let row: QuizRow = query_as(
            "INSERT INTO quizzes (id, title, min_percentage) VALUES ($1,$2,$3) RETURNING id, title, min_percentage, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(&req.title)
        .bind(req.min_percentage)
        .fetch_one(&mut *tx)
        .await?;

        for (pos, q) in req.questions.iter().enumerate() {
            query(
                "INSERT INTO quiz_questions (quiz_id, position, question, options, correct_option) VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(row.id)
            .bind(pos as i32)
            .bind(&q.question)
            .bind(&q.options)
            .bind(q.correct_option)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(Quiz {
            id: row.id,
            title: row.title,
            min_percentage: row.min_percentage,
            questions: req.questions.clone(),
            created_at: row.created_at,
        })
    }

    async fn quiz(&self, id: Uuid) -> Result<Option<Quiz>, StoreError> {
        let Some(row): Option<QuizRow> =
            query_as("SELECT id, title, min_percentage, created_at FROM quizzes WHERE id=$1")
                .bind(id)
                .fetch_optional(&self.db)
                .await?
        else {
            return Ok(None);
        };
        let questions: Vec<QuestionRow> = query_as(
            "SELECT question, options, correct_option FROM quiz_questions WHERE quiz_id=$1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&self.db)
        .await?;
        Ok(Some(Quiz {
            id: row.id,
            title: row.title,
            min_percentage: row.min_percentage,
            questions: questions
                .into_iter()
                .map(|q| QuizQuestion {
                    question: q.question,
                    options: q.options,
                    correct_option: q.correct_option,
                })
                .collect(),
            created_at: row.created_at,
        }))
    }

    async fn load_progress(&self, key: &ProgressKey) -> Result<Option<ProgressRecord>, StoreError> {
        let sql = format!(
            "SELECT {PROGRESS_COLS} FROM progress WHERE user_id=$1 AND course_id=$2 AND item_id=$3"
        );
        Ok(query_as(&sql)
            .bind(&key.user_id)
            .bind(key.course_id)
            .bind(key.item_id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn save_progress(&self, rec: &ProgressRecord) -> Result<(), StoreError> {
        query(
            r#"
            INSERT INTO progress (user_id, course_id, item_id, watched_time, percentage, last_marker, completed, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            ON CONFLICT (user_id, course_id, item_id)
            DO UPDATE SET
                watched_time = GREATEST(progress.watched_time, EXCLUDED.watched_time),
                percentage   = GREATEST(progress.percentage, EXCLUDED.percentage),
                last_marker  = GREATEST(progress.last_marker, EXCLUDED.last_marker),
                completed    = progress.completed OR EXCLUDED.completed,
                updated_at   = EXCLUDED.updated_at
            "#,
        )
        .bind(&rec.user_id)
        .bind(rec.course_id)
        .bind(rec.item_id)
        .bind(rec.watched_time)
        .bind(rec.percentage)
        .bind(rec.last_marker)
        .bind(rec.completed)
        .bind(rec.updated_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn course_progress(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        let sql = format!("SELECT {PROGRESS_COLS} FROM progress WHERE user_id=$1 AND course_id=$2");
        Ok(query_as(&sql)
            .bind(user_id)
            .bind(course_id)
            .fetch_all(&self.db)
            .await?)
    }

    async fn quiz_result(
        &self,
        user_id: &str,
        quiz_id: Uuid,
    ) -> Result<Option<QuizResult>, StoreError> {
        Ok(query_as(
            "SELECT user_id, quiz_id, score, passed, skipped, submitted_at FROM quiz_results WHERE user_id=$1 AND quiz_id=$2",
        )
        .bind(user_id)
        .bind(quiz_id)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn save_quiz_result(&self, res: &QuizResult) -> Result<(), StoreError> {
        query(
            r#"
            INSERT INTO quiz_results (user_id, quiz_id, score, passed, skipped, submitted_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (user_id, quiz_id)
            DO UPDATE SET score=EXCLUDED.score, passed=EXCLUDED.passed,
                          skipped=EXCLUDED.skipped, submitted_at=EXCLUDED.submitted_at
            "#,
        )
        .bind(&res.user_id)
        .bind(res.quiz_id)
        .bind(res.score)
        .bind(res.passed)
        .bind(res.skipped)
        .bind(res.submitted_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn upsert_grade(&self, rec: &GradeRecord) -> Result<GradeRecord, StoreError> {
        Ok(query_as(
            r#"
            INSERT INTO grades (student_id, assessment, grade, updated_at)
            VALUES ($1,$2,$3,$4)
            ON CONFLICT (student_id, assessment)
            DO UPDATE SET grade=EXCLUDED.grade, updated_at=EXCLUDED.updated_at
            RETURNING student_id, assessment, grade, updated_at
            "#,
        )
        .bind(&rec.student_id)
        .bind(&rec.assessment)
        .bind(rec.grade)
        .bind(rec.updated_at)
        .fetch_one(&self.db)
        .await?)
    }

    async fn grades(&self, student_id: &str) -> Result<Vec<GradeRecord>, StoreError> {
        Ok(query_as(
            "SELECT student_id, assessment, grade, updated_at FROM grades WHERE student_id=$1 ORDER BY assessment",
        )
        .bind(student_id)
        .fetch_all(&self.db)
        .await?)
    }
}
