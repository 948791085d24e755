use thiserror::Error;

/// Failure kinds surfaced by the store layer and batch operations. The
/// aggregation engine itself never raises these: missing data is exclusion,
/// not an error, and grade validation reports through enums.
#[derive(Debug, Error)]
pub enum GradingError {
    #[error("gradebook '{0}' not found")]
    GradebookNotFound(String),

    #[error("assessment '{0}' not found in this gradebook")]
    AssessmentNotFound(String),

    #[error("category '{0}' not found in this gradebook")]
    CategoryNotFound(String),

    #[error("invalid grade '{grade}' for student {student}")]
    InvalidGrade { student: String, grade: String },

    #[error("{} grade(s) failed validation, nothing saved: {}", students.len(), students.join(", "))]
    InvalidGradeBatch { students: Vec<String> },

    #[error("grading scale '{0}' is malformed: {1}")]
    InvalidScale(String, String),
}
