use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{GradeRecord, UpsertGradeReq};

pub const MAX_GRADE: f64 = 10.0;

#[derive(Debug, Error, PartialEq)]
pub enum GradeError {
    #[error("grade must be a finite number")]
    NotFinite,
    #[error("student_id and assessment are required")]
    MissingKey,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GradeStatus {
    Approved,
    Failed,
    Pending,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GradeView {
    #[serde(flatten)]
    pub record: GradeRecord,
    pub status: GradeStatus,
}

pub fn clamp_grade(grade: f64) -> Result<f64, GradeError> {
    if !grade.is_finite() {
        return Err(GradeError::NotFinite);
    }
    Ok(grade.clamp(0.0, MAX_GRADE))
}

pub fn status(grade: Option<f64>, passing: f64) -> GradeStatus {
    match grade {
        None => GradeStatus::Pending,
        Some(g) if g >= passing => GradeStatus::Approved,
        Some(_) => GradeStatus::Failed,
    }
}

pub fn record_from(req: UpsertGradeReq, now: DateTime<Utc>) -> Result<GradeRecord, GradeError> {
    let student_id = req.student_id.trim().to_string();
    let assessment = req.assessment.trim().to_string();
    if student_id.is_empty() || assessment.is_empty() {
        return Err(GradeError::MissingKey);
    }
    Ok(GradeRecord {
        student_id,
        assessment,
        grade: req.grade.map(clamp_grade).transpose()?,
        updated_at: now,
    })
}

pub fn view(record: GradeRecord, passing: f64) -> GradeView {
    GradeView {
        status: status(record.grade, passing),
        record,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_are_clamped() {
        assert_eq!(clamp_grade(11.5), Ok(10.0));
        assert_eq!(clamp_grade(-1.0), Ok(0.0));
        assert_eq!(clamp_grade(7.25), Ok(7.25));
        assert_eq!(clamp_grade(f64::INFINITY), Err(GradeError::NotFinite));
    }

    #[test]
    fn status_is_derived_from_the_grade() {
        assert_eq!(status(None, 6.0), GradeStatus::Pending);
        assert_eq!(status(Some(6.0), 6.0), GradeStatus::Approved);
        assert_eq!(status(Some(5.99), 6.0), GradeStatus::Failed);
    }

    #[test]
    fn record_requires_a_key() {
        let req = UpsertGradeReq {
            student_id: " ".into(),
            assessment: "P1".into(),
            grade: Some(5.0),
        };
        assert_eq!(record_from(req, Utc::now()), Err(GradeError::MissingKey));

        let req = UpsertGradeReq {
            student_id: "ana".into(),
            assessment: "P1".into(),
            grade: Some(12.0),
        };
        let rec = record_from(req, Utc::now()).unwrap();
        assert_eq!(rec.grade, Some(10.0));
    }
}
