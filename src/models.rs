use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::scale::GradingScale;

/// How grades are entered in a gradebook: raw points, percentages, or
/// letters from the gradebook's grading scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeEntryType {
    Points,
    Percentage,
    Letter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryType {
    /// Items are aggregated directly, no categories.
    NoCategories,
    /// Items belong to categories but the course grade is a plain
    /// points aggregate.
    Unweighted,
    /// Each category carries a weight that is a fraction of the course grade.
    Weighted,
}

#[derive(Debug, Clone)]
pub struct GradebookItem {
    pub id: i64,
    pub name: String,
    /// None means ungraded; such items never enter aggregation.
    pub points_possible: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub released: bool,
    pub counted: bool,
    pub extra_credit: bool,
    pub category_id: Option<i64>,
    pub external_id: Option<String>,
}

/// Drop/keep policy for a set of ranked items. At most one of the three
/// counts is honored per calculation pass: keep_highest wins over
/// drop_lowest, which wins over drop_highest. A count that is not smaller
/// than the number of rankable items disables the rule for that pass.
#[derive(Debug, Clone, Default)]
pub struct DropRule {
    pub drop_lowest: u32,
    pub drop_highest: u32,
    pub keep_highest: u32,
}

impl DropRule {
    pub fn is_set(&self) -> bool {
        self.drop_lowest > 0 || self.drop_highest > 0 || self.keep_highest > 0
    }
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    /// Fraction of the course grade in [0, 1]; only meaningful when the
    /// gradebook uses weighted categories.
    pub weight: Option<f64>,
    pub drop_rule: DropRule,
    pub extra_credit: bool,
    /// sum(earned)/sum(possible) instead of a mean of item percentages.
    pub points_weighted: bool,
}

/// One student's recorded grade for one item. The grade string is in the
/// gradebook's entry type. An absent record means ungraded.
#[derive(Debug, Clone)]
pub struct RawScore {
    pub grade: Option<String>,
    pub excused: bool,
}

#[derive(Debug, Clone)]
pub struct GradebookSettings {
    pub uid: String,
    pub name: String,
    pub entry_type: GradeEntryType,
    pub category_type: CategoryType,
    pub decimal_places: u32,
    /// Honored only when the gradebook has no categories.
    pub drop_rule: DropRule,
}

/// Immutable read snapshot of one gradebook. The engine never mutates it;
/// each calculation is a pure function over this data.
#[derive(Debug, Clone)]
pub struct GradebookSnapshot {
    pub settings: GradebookSettings,
    pub categories: Vec<Category>,
    pub items: Vec<GradebookItem>,
    /// (item id, student uuid) -> recorded score.
    pub scores: HashMap<(i64, String), RawScore>,
    /// student uuid -> instructor-entered course grade override.
    pub overrides: HashMap<String, String>,
    pub scale: GradingScale,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryScoreResult {
    pub percentage: f64,
    pub dropped_item_ids: Vec<i64>,
    pub includes_non_released: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseGrade {
    pub student: String,
    pub percentage: Option<f64>,
    pub letter: Option<String>,
    pub overridden: bool,
}

/// Typed item address, resolved once at the store/CLI boundary instead of
/// threading name-or-id fallbacks through every call.
#[derive(Debug, Clone)]
pub enum ItemRef {
    ById(i64),
    ByName(String),
}

impl ItemRef {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(id) => ItemRef::ById(id),
            Err(_) => ItemRef::ByName(raw.to_string()),
        }
    }
}
