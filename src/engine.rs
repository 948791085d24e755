use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::GradingError;
use crate::models::{
    Category, CategoryScoreResult, CategoryType, CourseGrade, DropRule, GradeEntryType,
    GradebookItem, GradebookSnapshot, ItemRef, RawScore,
};
use crate::scale::GradingScale;

/// How grade strings convert to earned points. Letter and percentage
/// entries go through the gradebook's own scale; the output scale for
/// course grades may differ (see `course_grades_for_students`).
pub struct EntryContext<'a> {
    pub entry_type: GradeEntryType,
    pub scale: &'a GradingScale,
}

impl EntryContext<'_> {
    fn earned_points(&self, grade: &str, points_possible: f64) -> Option<f64> {
        let grade = grade.trim();
        if grade.is_empty() {
            return None;
        }
        match self.entry_type {
            GradeEntryType::Points => grade.parse::<f64>().ok(),
            GradeEntryType::Percentage => grade
                .parse::<f64>()
                .ok()
                .map(|p| p / 100.0 * points_possible),
            GradeEntryType::Letter => self
                .scale
                .percent_for(grade)
                .map(|p| p / 100.0 * points_possible),
        }
    }
}

#[derive(Debug, Clone)]
struct GradedItem {
    id: i64,
    earned: f64,
    possible: f64,
    percentage: f64,
    extra_credit: bool,
}

/// Filter one student's items down to the countable set and normalize each
/// surviving grade to a percentage of its points possible.
///
/// Exclusions: uncounted items, unreleased items (unless requested),
/// ungraded items (null or non-positive points possible), excused scores,
/// and regular items with no score. An extra-credit item with no score
/// stays in with zero earned.
fn collect_graded(
    items: &[&GradebookItem],
    scores: &HashMap<i64, RawScore>,
    ctx: &EntryContext,
    include_non_released: bool,
) -> (Vec<GradedItem>, bool) {
    let mut graded = Vec::new();
    let mut non_released_included = false;

    for item in items {
        if !item.counted {
            continue;
        }
        if !item.released && !include_non_released {
            continue;
        }
        let Some(possible) = item.points_possible else {
            continue;
        };
        if possible <= 0.0 {
            continue;
        }
        let record = scores.get(&item.id);
        if record.is_some_and(|r| r.excused) {
            continue;
        }
        let earned = record
            .and_then(|r| r.grade.as_deref())
            .and_then(|g| ctx.earned_points(g, possible));
        let earned = match earned {
            Some(earned) => earned,
            None if item.extra_credit => 0.0,
            None => continue,
        };
        if !item.released {
            non_released_included = true;
        }
        graded.push(GradedItem {
            id: item.id,
            earned,
            possible,
            percentage: earned / possible * 100.0,
            extra_credit: item.extra_credit,
        });
    }

    (graded, non_released_included)
}

/// Rank items by percentage and remove the configured count. Ties break by
/// ascending item id. A count that is not smaller than the number of items
/// disables the rule. Returns retained items and dropped item ids sorted
/// ascending.
fn apply_drop_rule(mut items: Vec<GradedItem>, rule: &DropRule) -> (Vec<GradedItem>, Vec<i64>) {
    if !rule.is_set() {
        return (items, Vec::new());
    }
    let n = items.len();
    let (drop_count, from_bottom) = if rule.keep_highest > 0 && (rule.keep_highest as usize) < n {
        (n - rule.keep_highest as usize, true)
    } else if rule.drop_lowest > 0 && (rule.drop_lowest as usize) < n {
        (rule.drop_lowest as usize, true)
    } else if rule.drop_highest > 0 && (rule.drop_highest as usize) < n {
        (rule.drop_highest as usize, false)
    } else {
        return (items, Vec::new());
    };

    if from_bottom {
        items.sort_by(|a, b| {
            a.percentage
                .partial_cmp(&b.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
    } else {
        items.sort_by(|a, b| {
            b.percentage
                .partial_cmp(&a.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
    }

    let retained = items.split_off(drop_count);
    let mut dropped: Vec<i64> = items.into_iter().map(|g| g.id).collect();
    dropped.sort_unstable();
    (retained, dropped)
}

pub fn round_half_up(value: f64, decimal_places: u32) -> f64 {
    let factor = 10f64.powi(decimal_places as i32);
    (value * factor + 0.5).floor() / factor
}

/// One student's score for one category. Extra-credit items are never
/// eligible for the drop rule and add on top of the base average. Returns
/// None when no countable regular items remain after filtering -- an empty
/// category is not a zero.
pub fn category_score(
    category: &Category,
    items: &[&GradebookItem],
    scores: &HashMap<i64, RawScore>,
    ctx: &EntryContext,
    include_non_released: bool,
    decimal_places: u32,
) -> Option<CategoryScoreResult> {
    let (graded, non_released) = collect_graded(items, scores, ctx, include_non_released);
    let (base, extra): (Vec<_>, Vec<_>) = graded.into_iter().partition(|g| !g.extra_credit);
    if base.is_empty() {
        return None;
    }

    let (retained, dropped) = apply_drop_rule(base, &category.drop_rule);

    let percentage = if category.points_weighted {
        let possible: f64 = retained.iter().map(|g| g.possible).sum();
        let earned: f64 = retained.iter().map(|g| g.earned).sum::<f64>()
            + extra.iter().map(|g| g.earned).sum::<f64>();
        earned / possible * 100.0
    } else {
        let count = retained.len() as f64;
        let mean = retained.iter().map(|g| g.percentage).sum::<f64>() / count;
        let bonus = extra.iter().map(|g| g.percentage).sum::<f64>() / count;
        mean + bonus
    };

    Some(CategoryScoreResult {
        percentage: round_half_up(percentage, decimal_places),
        dropped_item_ids: dropped,
        includes_non_released: non_released,
    })
}

/// Convenience wrapper computing one category's score for one student
/// straight from a snapshot.
pub fn category_score_for_student(
    snapshot: &GradebookSnapshot,
    category: &Category,
    student: &str,
    include_non_released: bool,
) -> Option<CategoryScoreResult> {
    let items: Vec<&GradebookItem> = snapshot
        .items
        .iter()
        .filter(|i| i.category_id == Some(category.id))
        .collect();
    let scores = student_scores(snapshot, student);
    let ctx = EntryContext {
        entry_type: snapshot.settings.entry_type,
        scale: &snapshot.scale,
    };
    category_score(
        category,
        &items,
        &scores,
        &ctx,
        include_non_released,
        snapshot.settings.decimal_places,
    )
}

pub fn course_grade_for_student(snapshot: &GradebookSnapshot, student: &str) -> CourseGrade {
    let scores = student_scores(snapshot, student);
    compute_course_grade(snapshot, student, &scores, &snapshot.scale)
}

/// Course grades for many students in one pass over the shared snapshot.
/// `alt_scale` maps the resulting percentages through a different scale
/// without touching the gradebook's stored one; grade-string conversion
/// still uses the stored scale.
pub fn course_grades_for_students(
    snapshot: &GradebookSnapshot,
    students: &[String],
    alt_scale: Option<&GradingScale>,
) -> BTreeMap<String, CourseGrade> {
    let scale = alt_scale.unwrap_or(&snapshot.scale);

    let mut by_student: HashMap<&str, HashMap<i64, RawScore>> = HashMap::new();
    for ((item_id, student), score) in &snapshot.scores {
        by_student
            .entry(student.as_str())
            .or_default()
            .insert(*item_id, score.clone());
    }

    let empty = HashMap::new();
    students
        .iter()
        .map(|student| {
            let scores = by_student.get(student.as_str()).unwrap_or(&empty);
            (
                student.clone(),
                compute_course_grade(snapshot, student, scores, scale),
            )
        })
        .collect()
}

fn compute_course_grade(
    snapshot: &GradebookSnapshot,
    student: &str,
    scores: &HashMap<i64, RawScore>,
    scale: &GradingScale,
) -> CourseGrade {
    // An instructor override supersedes any computation.
    if let Some(grade) = snapshot.overrides.get(student) {
        return CourseGrade {
            student: student.to_string(),
            percentage: None,
            letter: Some(grade.clone()),
            overridden: true,
        };
    }

    let ctx = EntryContext {
        entry_type: snapshot.settings.entry_type,
        scale: &snapshot.scale,
    };
    let decimals = snapshot.settings.decimal_places;

    let percentage = match snapshot.settings.category_type {
        CategoryType::Weighted => weighted_percentage(snapshot, scores, &ctx),
        CategoryType::Unweighted => {
            let mut earned = 0.0;
            let mut possible = 0.0;
            for category in &snapshot.categories {
                let items: Vec<&GradebookItem> = snapshot
                    .items
                    .iter()
                    .filter(|i| i.category_id == Some(category.id))
                    .collect();
                accumulate_points(
                    &items,
                    scores,
                    &ctx,
                    &category.drop_rule,
                    &mut earned,
                    &mut possible,
                );
            }
            let loose: Vec<&GradebookItem> = snapshot
                .items
                .iter()
                .filter(|i| i.category_id.is_none())
                .collect();
            accumulate_points(
                &loose,
                scores,
                &ctx,
                &DropRule::default(),
                &mut earned,
                &mut possible,
            );
            (possible > 0.0).then(|| earned / possible * 100.0)
        }
        CategoryType::NoCategories => {
            let mut earned = 0.0;
            let mut possible = 0.0;
            let items: Vec<&GradebookItem> = snapshot.items.iter().collect();
            accumulate_points(
                &items,
                scores,
                &ctx,
                &snapshot.settings.drop_rule,
                &mut earned,
                &mut possible,
            );
            (possible > 0.0).then(|| earned / possible * 100.0)
        }
    };

    let percentage = percentage.map(|p| round_half_up(p, decimals));
    let letter = percentage.and_then(|p| scale.letter_for(p).map(str::to_string));

    CourseGrade {
        student: student.to_string(),
        percentage,
        letter,
        overridden: false,
    }
}

/// Weighted course percentage. Categories that produce no score drop out
/// of both sides: the remaining weights are renormalized to their own sum,
/// so a student with nothing in one category is not handed a zero for it.
/// Extra-credit categories add their weighted score on top without joining
/// the weight sum.
fn weighted_percentage(
    snapshot: &GradebookSnapshot,
    scores: &HashMap<i64, RawScore>,
    ctx: &EntryContext,
) -> Option<f64> {
    let mut numerator = 0.0;
    let mut weight_sum = 0.0;
    let mut bonus = 0.0;

    for category in &snapshot.categories {
        let Some(weight) = category.weight else {
            continue;
        };
        if weight <= 0.0 {
            continue;
        }
        let items: Vec<&GradebookItem> = snapshot
            .items
            .iter()
            .filter(|i| i.category_id == Some(category.id))
            .collect();
        let Some(result) = category_score(
            category,
            &items,
            scores,
            ctx,
            true,
            snapshot.settings.decimal_places,
        ) else {
            continue;
        };
        if category.extra_credit {
            bonus += weight * result.percentage;
        } else {
            numerator += weight * result.percentage;
            weight_sum += weight;
        }
    }

    (weight_sum > 0.0).then(|| numerator / weight_sum + bonus)
}

fn accumulate_points(
    items: &[&GradebookItem],
    scores: &HashMap<i64, RawScore>,
    ctx: &EntryContext,
    rule: &DropRule,
    earned_total: &mut f64,
    possible_total: &mut f64,
) {
    let (graded, _) = collect_graded(items, scores, ctx, true);
    let (base, extra): (Vec<_>, Vec<_>) = graded.into_iter().partition(|g| !g.extra_credit);
    let (retained, _) = apply_drop_rule(base, rule);
    for g in &retained {
        *earned_total += g.earned;
        *possible_total += g.possible;
    }
    // Extra credit raises the numerator only.
    for g in &extra {
        *earned_total += g.earned;
    }
}

fn student_scores(snapshot: &GradebookSnapshot, student: &str) -> HashMap<i64, RawScore> {
    snapshot
        .scores
        .iter()
        .filter(|((_, s), _)| s == student)
        .map(|((item_id, _), score)| (*item_id, score.clone()))
        .collect()
}

/// Every student uuid with a recorded score or an override, sorted.
pub fn students_in(snapshot: &GradebookSnapshot) -> Vec<String> {
    let mut students: BTreeSet<String> = snapshot
        .scores
        .keys()
        .map(|(_, student)| student.clone())
        .collect();
    students.extend(snapshot.overrides.keys().cloned());
    students.into_iter().collect()
}

pub fn resolve_item<'a>(
    items: &'a [GradebookItem],
    item_ref: &ItemRef,
) -> Result<&'a GradebookItem, GradingError> {
    match item_ref {
        ItemRef::ById(id) => items
            .iter()
            .find(|i| i.id == *id)
            .ok_or_else(|| GradingError::AssessmentNotFound(id.to_string())),
        ItemRef::ByName(name) => items
            .iter()
            .find(|i| i.name == *name)
            .ok_or_else(|| GradingError::AssessmentNotFound(name.clone())),
    }
}

pub fn find_category<'a>(
    categories: &'a [Category],
    id: Option<i64>,
    name: Option<&str>,
) -> Result<&'a Category, GradingError> {
    if let Some(id) = id {
        return categories
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| GradingError::CategoryNotFound(id.to_string()));
    }
    let name = name.unwrap_or_default();
    categories
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| GradingError::CategoryNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryType, GradebookSettings};

    fn item(id: i64, category_id: Option<i64>, points: f64) -> GradebookItem {
        GradebookItem {
            id,
            name: format!("item-{id}"),
            points_possible: Some(points),
            due_date: None,
            released: true,
            counted: true,
            extra_credit: false,
            category_id,
            external_id: None,
        }
    }

    fn ec_item(id: i64, category_id: Option<i64>, points: f64) -> GradebookItem {
        GradebookItem {
            extra_credit: true,
            ..item(id, category_id, points)
        }
    }

    fn category(id: i64) -> Category {
        Category {
            id,
            name: format!("cat-{id}"),
            weight: None,
            drop_rule: DropRule::default(),
            extra_credit: false,
            points_weighted: false,
        }
    }

    fn graded(grade: &str) -> RawScore {
        RawScore {
            grade: Some(grade.to_string()),
            excused: false,
        }
    }

    fn excused() -> RawScore {
        RawScore {
            grade: None,
            excused: true,
        }
    }

    fn points_ctx(scale: &GradingScale) -> EntryContext<'_> {
        EntryContext {
            entry_type: GradeEntryType::Points,
            scale,
        }
    }

    fn snapshot(category_type: CategoryType) -> GradebookSnapshot {
        GradebookSnapshot {
            settings: GradebookSettings {
                uid: "bio-101".to_string(),
                name: "Intro Biology".to_string(),
                entry_type: GradeEntryType::Points,
                category_type,
                decimal_places: 2,
                drop_rule: DropRule::default(),
            },
            categories: Vec::new(),
            items: Vec::new(),
            scores: HashMap::new(),
            overrides: HashMap::new(),
            scale: GradingScale::letter_standard(),
        }
    }

    fn record(snapshot: &mut GradebookSnapshot, item_id: i64, student: &str, grade: &str) {
        snapshot
            .scores
            .insert((item_id, student.to_string()), graded(grade));
    }

    #[test]
    fn drop_lowest_drops_k_lowest_with_id_tiebreak() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.drop_lowest = 2;

        // id 1 and id 3 tie at 70%; the smaller id is dropped first.
        let items = [
            item(1, Some(1), 10.0),
            item(2, Some(1), 10.0),
            item(3, Some(1), 10.0),
            item(4, Some(1), 10.0),
        ];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([
            (1, graded("7")),
            (2, graded("5")),
            (3, graded("7")),
            (4, graded("9")),
        ]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.dropped_item_ids, vec![1, 2]);
        assert_eq!(result.percentage, 80.0); // mean of 70 and 90
    }

    #[test]
    fn dropped_items_never_beat_retained_ones() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.drop_lowest = 2;

        let items: Vec<GradebookItem> = (1..=6).map(|id| item(id, Some(1), 10.0)).collect();
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([
            (1, graded("4")),
            (2, graded("9")),
            (3, graded("6")),
            (4, graded("6")),
            (5, graded("10")),
            (6, graded("3")),
        ]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        // 30% and 40% go; every retained percentage is at least 60.
        assert_eq!(result.dropped_item_ids, vec![1, 6]);
        assert_eq!(result.percentage, 77.5); // mean of 90, 60, 60, 100
    }

    #[test]
    fn drop_highest_removes_top_scores() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.drop_highest = 1;

        let items = [item(1, Some(1), 10.0), item(2, Some(1), 10.0), item(3, Some(1), 10.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("10")), (2, graded("6")), (3, graded("8"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.dropped_item_ids, vec![1]);
        assert_eq!(result.percentage, 70.0);
    }

    #[test]
    fn keep_highest_drops_everything_else() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.keep_highest = 2;

        let items: Vec<GradebookItem> = (1..=4).map(|id| item(id, Some(1), 10.0)).collect();
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([
            (1, graded("4")),
            (2, graded("9")),
            (3, graded("6")),
            (4, graded("10")),
        ]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.dropped_item_ids, vec![1, 3]);
        assert_eq!(result.percentage, 95.0);
    }

    #[test]
    fn oversized_drop_count_disables_the_rule() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.drop_lowest = 2;

        let items = [item(1, Some(1), 10.0), item(2, Some(1), 10.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("5")), (2, graded("10"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert!(result.dropped_item_ids.is_empty());
        assert_eq!(result.percentage, 75.0);
    }

    #[test]
    fn fully_filtered_category_has_no_score() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);

        let mut uncounted = item(1, Some(1), 10.0);
        uncounted.counted = false;
        let mut unreleased = item(2, Some(1), 10.0);
        unreleased.released = false;
        let mut ungraded = item(3, Some(1), 10.0);
        ungraded.points_possible = None;

        let items = [uncounted, unreleased, ungraded];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("10")), (2, graded("10")), (3, graded("10"))]);

        assert!(category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).is_none());
    }

    #[test]
    fn unreleased_items_count_when_requested() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);

        let mut unreleased = item(1, Some(1), 10.0);
        unreleased.released = false;
        let items = [unreleased];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("9"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), true, 2).unwrap();
        assert_eq!(result.percentage, 90.0);
        assert!(result.includes_non_released);
    }

    #[test]
    fn extra_credit_is_never_dropped_and_adds_on_top() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.drop_rule.drop_lowest = 1;

        let items = [
            item(1, Some(1), 10.0),
            item(2, Some(1), 10.0),
            ec_item(3, Some(1), 10.0),
        ];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        // Extra credit scores lowest of all but must not be dropped.
        let scores = HashMap::from([(1, graded("5")), (2, graded("10")), (3, graded("4"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.dropped_item_ids, vec![1]);
        // Base mean 100, plus 40 bonus over the single retained item.
        assert_eq!(result.percentage, 140.0);
    }

    #[test]
    fn excused_scores_are_excluded_not_zeroed() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);

        let items = [
            item(1, Some(1), 10.0),
            item(2, Some(1), 10.0),
            ec_item(3, Some(1), 10.0),
        ];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("8")), (2, excused()), (3, graded("5"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        // Base is 8/10 = 80, the excused item vanishes, extra credit adds 50.
        assert_eq!(result.percentage, 130.0);
        assert!(result.dropped_item_ids.is_empty());
    }

    #[test]
    fn missing_regular_score_excludes_but_missing_extra_credit_is_zero() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);

        let items = [
            item(1, Some(1), 10.0),
            item(2, Some(1), 10.0),
            ec_item(3, Some(1), 10.0),
        ];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("6"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.percentage, 60.0);
    }

    #[test]
    fn points_weighted_category_uses_point_totals() {
        let scale = GradingScale::letter_standard();
        let mut cat = category(1);
        cat.points_weighted = true;

        let items = [item(1, Some(1), 10.0), item(2, Some(1), 90.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("10")), (2, graded("45"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        // (10 + 45) / 100, not the mean of 100% and 50%.
        assert_eq!(result.percentage, 55.0);
    }

    #[test]
    fn percentages_round_half_up_to_configured_precision() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);

        let items = [item(1, Some(1), 9.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("7"))]);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 2).unwrap();
        assert_eq!(result.percentage, 77.78);

        let result = category_score(&cat, &refs, &scores, &points_ctx(&scale), false, 0).unwrap();
        assert_eq!(result.percentage, 78.0);
    }

    #[test]
    fn letter_entry_grades_convert_through_the_scale() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);
        let ctx = EntryContext {
            entry_type: GradeEntryType::Letter,
            scale: &scale,
        };

        let items = [item(1, Some(1), 10.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("B"))]);

        let result = category_score(&cat, &refs, &scores, &ctx, false, 2).unwrap();
        assert_eq!(result.percentage, 80.0);
    }

    #[test]
    fn percentage_entry_grades_scale_by_points_possible() {
        let scale = GradingScale::letter_standard();
        let cat = category(1);
        let ctx = EntryContext {
            entry_type: GradeEntryType::Percentage,
            scale: &scale,
        };

        let items = [item(1, Some(1), 20.0)];
        let refs: Vec<&GradebookItem> = items.iter().collect();
        let scores = HashMap::from([(1, graded("85"))]);

        let result = category_score(&cat, &refs, &scores, &ctx, false, 2).unwrap();
        assert_eq!(result.percentage, 85.0);
    }

    #[test]
    fn override_wins_over_any_computation() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        record(&mut snap, 1, "s1", "2");
        snap.overrides.insert("s1".to_string(), "A".to_string());

        let grade = course_grade_for_student(&snap, "s1");
        assert!(grade.overridden);
        assert_eq!(grade.letter.as_deref(), Some("A"));
        assert_eq!(grade.percentage, None);
    }

    #[test]
    fn weighted_grade_renormalizes_around_empty_categories() {
        let mut snap = snapshot(CategoryType::Weighted);
        for id in 1..=3 {
            let mut cat = category(id);
            cat.weight = Some(1.0 / 3.0);
            snap.categories.push(cat);
        }
        snap.items.push(item(1, Some(1), 10.0));
        snap.items.push(item(2, Some(2), 10.0));
        snap.items.push(item(3, Some(3), 10.0));
        record(&mut snap, 1, "s1", "9"); // 90%
        record(&mut snap, 2, "s1", "6"); // 60%
        // Nothing in category 3: its weight must drop out, not dilute.

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, Some(75.0));
        assert_eq!(grade.letter.as_deref(), Some("C"));
    }

    #[test]
    fn weighted_grade_with_unequal_weights() {
        let mut snap = snapshot(CategoryType::Weighted);
        let mut homework = category(1);
        homework.weight = Some(0.6);
        let mut exams = category(2);
        exams.weight = Some(0.4);
        snap.categories.push(homework);
        snap.categories.push(exams);

        snap.items.push(item(1, Some(1), 10.0));
        snap.items.push(item(2, Some(2), 100.0));
        record(&mut snap, 1, "s1", "10"); // 100%
        record(&mut snap, 2, "s1", "50"); // 50%

        let grade = course_grade_for_student(&snap, "s1");
        // 0.6 * 100 + 0.4 * 50 = 80
        assert_eq!(grade.percentage, Some(80.0));
        assert_eq!(grade.letter.as_deref(), Some("B"));
    }

    #[test]
    fn extra_credit_category_adds_without_joining_weights() {
        let mut snap = snapshot(CategoryType::Weighted);
        let mut main = category(1);
        main.weight = Some(1.0);
        let mut bonus = category(2);
        bonus.weight = Some(0.1);
        bonus.extra_credit = true;
        snap.categories.push(main);
        snap.categories.push(bonus);

        snap.items.push(item(1, Some(1), 10.0));
        snap.items.push(item(2, Some(2), 10.0));
        record(&mut snap, 1, "s1", "8"); // 80%
        record(&mut snap, 2, "s1", "10"); // 100% -> +10 on top

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, Some(90.0));
    }

    #[test]
    fn weighted_gradebook_with_no_scores_has_no_grade() {
        let mut snap = snapshot(CategoryType::Weighted);
        let mut cat = category(1);
        cat.weight = Some(1.0);
        snap.categories.push(cat);
        snap.items.push(item(1, Some(1), 10.0));

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, None);
        assert_eq!(grade.letter, None);
        assert!(!grade.overridden);
    }

    #[test]
    fn uncategorized_gradebook_aggregates_by_points() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        snap.items.push(item(2, None, 30.0));
        record(&mut snap, 1, "s1", "8");
        record(&mut snap, 2, "s1", "20");

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, Some(70.0));
        assert_eq!(grade.letter.as_deref(), Some("C"));
    }

    #[test]
    fn gradebook_level_drop_rule_applies_without_categories() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.settings.drop_rule.drop_lowest = 1;
        for id in 1..=3 {
            snap.items.push(item(id, None, 10.0));
        }
        record(&mut snap, 1, "s1", "10");
        record(&mut snap, 2, "s1", "5");
        record(&mut snap, 3, "s1", "0");

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, Some(75.0));
    }

    #[test]
    fn extra_credit_item_raises_points_aggregate_numerator_only() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        snap.items.push(ec_item(2, None, 10.0));
        record(&mut snap, 1, "s1", "8");
        record(&mut snap, 2, "s1", "5");

        let grade = course_grade_for_student(&snap, "s1");
        assert_eq!(grade.percentage, Some(130.0));
        assert_eq!(grade.letter.as_deref(), Some("A"));
    }

    #[test]
    fn unweighted_categories_apply_their_own_drop_rules() {
        let mut snap = snapshot(CategoryType::Unweighted);
        let mut quizzes = category(1);
        quizzes.drop_rule.drop_lowest = 1;
        snap.categories.push(quizzes);

        snap.items.push(item(1, Some(1), 10.0));
        snap.items.push(item(2, Some(1), 10.0));
        snap.items.push(item(3, None, 20.0)); // uncategorized, no drop
        record(&mut snap, 1, "s1", "2");
        record(&mut snap, 2, "s1", "10");
        record(&mut snap, 3, "s1", "15");

        let grade = course_grade_for_student(&snap, "s1");
        // (10 + 15) / (10 + 20) after dropping the 2/10 quiz.
        assert_eq!(grade.percentage, Some(round_half_up(25.0 / 30.0 * 100.0, 2)));
    }

    #[test]
    fn batch_covers_every_requested_student() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        record(&mut snap, 1, "s1", "9");
        snap.overrides.insert("s2".to_string(), "B".to_string());

        let students = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];
        let grades = course_grades_for_students(&snap, &students, None);

        assert_eq!(grades.len(), 3);
        assert_eq!(grades["s1"].percentage, Some(90.0));
        assert!(grades["s2"].overridden);
        assert_eq!(grades["s3"].percentage, None);
    }

    #[test]
    fn batch_alternate_scale_maps_output_without_mutating_snapshot() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        record(&mut snap, 1, "s1", "8");

        let alt = GradingScale::pass_fail();
        let students = vec!["s1".to_string()];
        let grades = course_grades_for_students(&snap, &students, Some(&alt));

        assert_eq!(grades["s1"].letter.as_deref(), Some("P"));
        assert_eq!(snap.scale.name, "letters");
        assert_eq!(snap.scale.letter_for(80.0), Some("B"));
    }

    #[test]
    fn students_in_collects_scores_and_overrides() {
        let mut snap = snapshot(CategoryType::NoCategories);
        snap.items.push(item(1, None, 10.0));
        record(&mut snap, 1, "beta", "9");
        record(&mut snap, 1, "alpha", "7");
        snap.overrides.insert("gamma".to_string(), "A".to_string());

        assert_eq!(students_in(&snap), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn item_refs_resolve_by_id_and_name() {
        let items = vec![item(7, None, 10.0)];
        assert_eq!(resolve_item(&items, &ItemRef::ById(7)).unwrap().id, 7);
        assert_eq!(
            resolve_item(&items, &ItemRef::ByName("item-7".to_string()))
                .unwrap()
                .id,
            7
        );
        assert!(matches!(
            resolve_item(&items, &ItemRef::ById(8)),
            Err(GradingError::AssessmentNotFound(_))
        ));
        assert!(matches!(
            resolve_item(&items, &ItemRef::ByName("missing".to_string())),
            Err(GradingError::AssessmentNotFound(_))
        ));
    }

    #[test]
    fn item_ref_parse_prefers_numeric_ids() {
        assert!(matches!(ItemRef::parse("42"), ItemRef::ById(42)));
        assert!(matches!(ItemRef::parse("Quiz 1"), ItemRef::ByName(_)));
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_half_up(2.5, 0), 3.0);
        assert_eq!(round_half_up(84.456, 2), 84.46);
        assert_eq!(round_half_up(84.454, 2), 84.45);
    }
}
