use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::Utc;

use crate::engine;
use crate::models::{CourseGrade, GradebookSnapshot};

#[derive(Debug, Clone)]
pub struct LetterCount {
    pub label: String,
    pub count: usize,
}

/// Count course grades per scale label, in scale order. Students without a
/// computed or overridden grade are not counted here.
pub fn summarize_distribution(
    snapshot: &GradebookSnapshot,
    grades: &BTreeMap<String, CourseGrade>,
) -> Vec<LetterCount> {
    snapshot
        .scale
        .entries()
        .iter()
        .map(|entry| LetterCount {
            label: entry.label.clone(),
            count: grades
                .values()
                .filter(|g| {
                    g.letter
                        .as_deref()
                        .is_some_and(|l| l.eq_ignore_ascii_case(&entry.label))
                })
                .count(),
        })
        .collect()
}

pub fn build_report(
    snapshot: &GradebookSnapshot,
    grades: &BTreeMap<String, CourseGrade>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Grade Report");
    let _ = writeln!(
        output,
        "{} ({}) as of {} | {} students",
        snapshot.settings.name,
        snapshot.settings.uid,
        Utc::now().date_naive(),
        grades.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");

    if grades.is_empty() {
        let _ = writeln!(output, "No students with grades in this gradebook.");
    } else {
        let ungraded = grades.values().filter(|g| g.letter.is_none()).count();
        for bucket in summarize_distribution(snapshot, grades) {
            let _ = writeln!(output, "- {}: {} students", bucket.label, bucket.count);
        }
        if ungraded > 0 {
            let _ = writeln!(output, "- no grade: {ungraded} students");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Averages");

    if snapshot.categories.is_empty() {
        let _ = writeln!(output, "This gradebook has no categories.");
    } else {
        for category in &snapshot.categories {
            let scores: Vec<f64> = grades
                .keys()
                .filter_map(|student| {
                    engine::category_score_for_student(snapshot, category, student, true)
                })
                .map(|r| r.percentage)
                .collect();
            if scores.is_empty() {
                let _ = writeln!(output, "- {}: no countable scores", category.name);
            } else {
                let avg = scores.iter().sum::<f64>() / scores.len() as f64;
                let _ = writeln!(
                    output,
                    "- {}: average {:.2}% across {} students",
                    category.name,
                    avg,
                    scores.len()
                );
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Attention");

    let mut struggling: Vec<&CourseGrade> = grades
        .values()
        .filter(|g| g.percentage.is_some_and(|p| p < 70.0))
        .collect();
    struggling.sort_by(|a, b| {
        a.percentage
            .partial_cmp(&b.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if struggling.is_empty() {
        let _ = writeln!(output, "No students below 70%.");
    } else {
        for grade in struggling.iter().take(10) {
            let _ = writeln!(
                output,
                "- {}: {:.2}% ({})",
                grade.student,
                grade.percentage.unwrap_or(0.0),
                grade.letter.as_deref().unwrap_or("-")
            );
        }
    }

    output
}
