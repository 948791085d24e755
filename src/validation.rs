use crate::models::GradeEntryType;
use crate::scale::GradingScale;

/// Outcome of validating a points-possible value. An enum rather than an
/// error so callers can branch into user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointsValidation {
    Valid,
    InvalidNullValue,
    InvalidNumericValue,
    InvalidDecimal,
}

pub fn points_possible_valid(candidate: Option<f64>) -> PointsValidation {
    let Some(points) = candidate else {
        return PointsValidation::InvalidNullValue;
    };
    if !points.is_finite() || points <= 0.0 {
        return PointsValidation::InvalidNumericValue;
    }
    if exceeds_two_decimals(points) {
        return PointsValidation::InvalidDecimal;
    }
    PointsValidation::Valid
}

/// One grade to check in a batch, in gradebook entry order.
#[derive(Debug, Clone)]
pub struct GradeEntry {
    pub student: String,
    pub grade: String,
    /// Upper bound for points-entry gradebooks; percentage and letter
    /// entries ignore it.
    pub points_possible: Option<f64>,
}

/// Whether a grade string is acceptable for the gradebook's entry type.
/// A blank string is valid: saving it clears the grade.
pub fn grade_is_valid(
    entry_type: GradeEntryType,
    scale: &GradingScale,
    grade: &str,
    points_possible: Option<f64>,
) -> bool {
    let grade = grade.trim();
    if grade.is_empty() {
        return true;
    }
    match entry_type {
        GradeEntryType::Points => match grade.parse::<f64>() {
            Ok(value) => {
                value.is_finite()
                    && value >= 0.0
                    && !exceeds_two_decimals(value)
                    && points_possible.map_or(true, |max| value <= max)
            }
            Err(_) => false,
        },
        GradeEntryType::Percentage => match grade.parse::<f64>() {
            Ok(value) => (0.0..=100.0).contains(&value) && !exceeds_two_decimals(value),
            Err(_) => false,
        },
        GradeEntryType::Letter => scale.has_label(grade),
    }
}

/// Students whose grade fails validation, in input order. Checks every
/// entry; never stops at the first failure.
pub fn identify_invalid_grades(
    entry_type: GradeEntryType,
    scale: &GradingScale,
    entries: &[GradeEntry],
) -> Vec<String> {
    entries
        .iter()
        .filter(|e| !grade_is_valid(entry_type, scale, &e.grade, e.points_possible))
        .map(|e| e.student.clone())
        .collect()
}

fn exceeds_two_decimals(value: f64) -> bool {
    let scaled = value * 100.0;
    (scaled - scaled.round()).abs() > 1e-7
}
