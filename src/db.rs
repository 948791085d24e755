use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::engine;
use crate::error::GradingError;
use crate::models::{
    Category, CategoryType, DropRule, GradeEntryType, GradebookItem, GradebookSettings,
    GradebookSnapshot, ItemRef, RawScore,
};
use crate::scale::{GradingScale, ScaleEntry};
use crate::validation::{self, GradeEntry};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Load one gradebook and everything the engine needs as an immutable
/// snapshot: settings, categories, items, scores, overrides, and the
/// grading scale.
pub async fn fetch_snapshot(pool: &PgPool, gradebook_uid: &str) -> anyhow::Result<GradebookSnapshot> {
    let row = sqlx::query(
        "SELECT id, uid, name, entry_type, category_type, decimal_places, \
         drop_lowest, drop_highest, keep_highest \
         FROM gradebook.gradebooks WHERE uid = $1",
    )
    .bind(gradebook_uid)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| GradingError::GradebookNotFound(gradebook_uid.to_string()))?;

    let gradebook_id: i64 = row.get("id");
    let settings = GradebookSettings {
        uid: row.get("uid"),
        name: row.get("name"),
        entry_type: parse_entry_type(row.get::<String, _>("entry_type").as_str())?,
        category_type: parse_category_type(row.get::<String, _>("category_type").as_str())?,
        decimal_places: row.get::<i32, _>("decimal_places") as u32,
        drop_rule: DropRule {
            drop_lowest: row.get::<i32, _>("drop_lowest") as u32,
            drop_highest: row.get::<i32, _>("drop_highest") as u32,
            keep_highest: row.get::<i32, _>("keep_highest") as u32,
        },
    };

    let mut categories = Vec::new();
    let rows = sqlx::query(
        "SELECT id, name, weight, drop_lowest, drop_highest, keep_highest, \
         extra_credit, points_weighted \
         FROM gradebook.categories WHERE gradebook_id = $1 ORDER BY id",
    )
    .bind(gradebook_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        categories.push(Category {
            id: row.get("id"),
            name: row.get("name"),
            weight: row.get("weight"),
            drop_rule: DropRule {
                drop_lowest: row.get::<i32, _>("drop_lowest") as u32,
                drop_highest: row.get::<i32, _>("drop_highest") as u32,
                keep_highest: row.get::<i32, _>("keep_highest") as u32,
            },
            extra_credit: row.get("extra_credit"),
            points_weighted: row.get("points_weighted"),
        });
    }

    let mut items = Vec::new();
    let rows = sqlx::query(
        "SELECT id, category_id, name, points_possible, due_date, released, \
         counted, extra_credit, external_id \
         FROM gradebook.items WHERE gradebook_id = $1 ORDER BY id",
    )
    .bind(gradebook_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        items.push(GradebookItem {
            id: row.get("id"),
            name: row.get("name"),
            points_possible: row.get("points_possible"),
            due_date: row.get("due_date"),
            released: row.get("released"),
            counted: row.get("counted"),
            extra_credit: row.get("extra_credit"),
            category_id: row.get("category_id"),
            external_id: row.get("external_id"),
        });
    }

    let mut scores = HashMap::new();
    let rows = sqlx::query(
        "SELECT s.item_id, s.student_uuid, s.grade, s.excused \
         FROM gradebook.scores s \
         JOIN gradebook.items i ON i.id = s.item_id \
         WHERE i.gradebook_id = $1",
    )
    .bind(gradebook_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        scores.insert(
            (row.get::<i64, _>("item_id"), row.get::<String, _>("student_uuid")),
            RawScore {
                grade: row.get("grade"),
                excused: row.get("excused"),
            },
        );
    }

    let mut overrides = HashMap::new();
    let rows = sqlx::query(
        "SELECT student_uuid, grade FROM gradebook.course_grade_overrides \
         WHERE gradebook_id = $1",
    )
    .bind(gradebook_id)
    .fetch_all(pool)
    .await?;
    for row in rows {
        overrides.insert(row.get("student_uuid"), row.get("grade"));
    }

    let rows = sqlx::query(
        "SELECT label, min_percent FROM gradebook.scale_entries \
         WHERE gradebook_id = $1 ORDER BY min_percent DESC",
    )
    .bind(gradebook_id)
    .fetch_all(pool)
    .await?;
    let scale = if rows.is_empty() {
        GradingScale::letter_standard()
    } else {
        let entries = rows
            .into_iter()
            .map(|row| ScaleEntry {
                label: row.get("label"),
                min_percent: row.get("min_percent"),
            })
            .collect();
        GradingScale::new(gradebook_uid, entries)?
    };

    Ok(GradebookSnapshot {
        settings,
        categories,
        items,
        scores,
        overrides,
        scale,
    })
}

pub struct NewItem<'a> {
    pub name: &'a str,
    pub points_possible: Option<f64>,
    pub due_date: Option<NaiveDate>,
    pub category: Option<&'a str>,
    pub released: bool,
    pub counted: bool,
    pub extra_credit: bool,
}

/// Insert a gradebook item. The caller is expected to have run the
/// points-possible validation first.
pub async fn add_item(pool: &PgPool, gradebook_uid: &str, item: NewItem<'_>) -> anyhow::Result<i64> {
    let gradebook_id = lookup_gradebook_id(pool, gradebook_uid).await?;

    let category_id = match item.category {
        Some(name) => {
            let row = sqlx::query(
                "SELECT id FROM gradebook.categories WHERE gradebook_id = $1 AND name = $2",
            )
            .bind(gradebook_id)
            .bind(name)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| GradingError::CategoryNotFound(name.to_string()))?;
            Some(row.get::<i64, _>("id"))
        }
        None => None,
    };

    let row = sqlx::query(
        r#"
        INSERT INTO gradebook.items
        (gradebook_id, category_id, name, points_possible, due_date, released, counted, extra_credit)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (gradebook_id, name) DO UPDATE
        SET category_id = EXCLUDED.category_id,
            points_possible = EXCLUDED.points_possible,
            due_date = EXCLUDED.due_date,
            released = EXCLUDED.released,
            counted = EXCLUDED.counted,
            extra_credit = EXCLUDED.extra_credit
        RETURNING id
        "#,
    )
    .bind(gradebook_id)
    .bind(category_id)
    .bind(item.name)
    .bind(item.points_possible)
    .bind(item.due_date)
    .bind(item.released)
    .bind(item.counted)
    .bind(item.extra_credit)
    .fetch_one(pool)
    .await?;

    Ok(row.get("id"))
}

/// Record an instructor course-grade override. The grade must be a label
/// from the gradebook's scale; the caller validates before saving.
pub async fn set_override(
    pool: &PgPool,
    gradebook_uid: &str,
    student_uuid: &str,
    grade: &str,
) -> anyhow::Result<()> {
    let gradebook_id = lookup_gradebook_id(pool, gradebook_uid).await?;
    sqlx::query(
        r#"
        INSERT INTO gradebook.course_grade_overrides (gradebook_id, student_uuid, grade)
        VALUES ($1, $2, $3)
        ON CONFLICT (gradebook_id, student_uuid) DO UPDATE SET grade = EXCLUDED.grade
        "#,
    )
    .bind(gradebook_id)
    .bind(student_uuid)
    .bind(grade)
    .execute(pool)
    .await?;
    Ok(())
}

/// Import scores from CSV, all-or-nothing: every row is resolved and
/// validated before a single write, and the writes share one transaction.
pub async fn import_scores_csv(
    pool: &PgPool,
    snapshot: &GradebookSnapshot,
    csv_path: &Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        item: String,
        student_uuid: String,
        #[serde(default)]
        grade: Option<String>,
        #[serde(default)]
        excused: bool,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize::<CsvRow>() {
        rows.push(result?);
    }

    let mut resolved = Vec::new();
    let mut entries = Vec::new();
    for row in &rows {
        let item = engine::resolve_item(&snapshot.items, &ItemRef::parse(&row.item))?;
        if !row.excused {
            if let Some(grade) = &row.grade {
                entries.push(GradeEntry {
                    student: row.student_uuid.clone(),
                    grade: grade.clone(),
                    points_possible: item.points_possible,
                });
            }
        }
        resolved.push((item.id, row));
    }

    let invalid = validation::identify_invalid_grades(
        snapshot.settings.entry_type,
        &snapshot.scale,
        &entries,
    );
    if !invalid.is_empty() {
        return Err(GradingError::InvalidGradeBatch { students: invalid }.into());
    }

    let mut tx = pool.begin().await?;
    let mut saved = 0usize;
    for (item_id, row) in resolved {
        let result = sqlx::query(
            r#"
            INSERT INTO gradebook.scores (id, item_id, student_uuid, grade, excused)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id, student_uuid) DO UPDATE
            SET grade = EXCLUDED.grade, excused = EXCLUDED.excused
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item_id)
        .bind(&row.student_uuid)
        .bind(row.grade.as_deref())
        .bind(row.excused)
        .execute(&mut *tx)
        .await?;
        saved += result.rows_affected() as usize;
    }
    tx.commit().await?;

    Ok(saved)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let gradebook_id: i64 = sqlx::query(
        r#"
        INSERT INTO gradebook.gradebooks
        (uid, name, entry_type, category_type, decimal_places)
        VALUES ($1, $2, 'points', 'weighted', 2)
        ON CONFLICT (uid) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind("intro-bio-101")
    .bind("Intro Biology 101")
    .fetch_one(pool)
    .await?
    .get("id");

    for entry in GradingScale::letter_standard().entries() {
        sqlx::query(
            r#"
            INSERT INTO gradebook.scale_entries (gradebook_id, label, min_percent)
            VALUES ($1, $2, $3)
            ON CONFLICT (gradebook_id, label) DO UPDATE SET min_percent = EXCLUDED.min_percent
            "#,
        )
        .bind(gradebook_id)
        .bind(&entry.label)
        .bind(entry.min_percent)
        .execute(pool)
        .await?;
    }

    // name, weight, drop_lowest
    let categories = vec![
        ("Homework", 0.5_f64, 1_i32),
        ("Exams", 0.3, 0),
        ("Labs", 0.2, 0),
    ];
    let mut category_ids = HashMap::new();
    for (name, weight, drop_lowest) in categories {
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO gradebook.categories (gradebook_id, name, weight, drop_lowest)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (gradebook_id, name) DO UPDATE
            SET weight = EXCLUDED.weight, drop_lowest = EXCLUDED.drop_lowest
            RETURNING id
            "#,
        )
        .bind(gradebook_id)
        .bind(name)
        .bind(weight)
        .bind(drop_lowest)
        .fetch_one(pool)
        .await?
        .get("id");
        category_ids.insert(name, id);
    }

    // name, category, points, released, extra_credit
    let items = vec![
        ("Homework 1", Some("Homework"), Some(10.0_f64), true, false),
        ("Homework 2", Some("Homework"), Some(10.0), true, false),
        ("Homework 3", Some("Homework"), Some(10.0), true, false),
        ("Bonus Quiz", Some("Homework"), Some(5.0), true, true),
        ("Midterm", Some("Exams"), Some(100.0), true, false),
        ("Final Exam", Some("Exams"), Some(100.0), false, false),
        ("Lab 1", Some("Labs"), Some(20.0), true, false),
        ("Lab 2", Some("Labs"), Some(20.0), true, false),
    ];
    let mut item_ids = HashMap::new();
    for (name, category, points, released, extra_credit) in items {
        let category_id = category.and_then(|c| category_ids.get(c)).copied();
        let id: i64 = sqlx::query(
            r#"
            INSERT INTO gradebook.items
            (gradebook_id, category_id, name, points_possible, released, extra_credit)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (gradebook_id, name) DO UPDATE
            SET category_id = EXCLUDED.category_id,
                points_possible = EXCLUDED.points_possible,
                released = EXCLUDED.released,
                extra_credit = EXCLUDED.extra_credit
            RETURNING id
            "#,
        )
        .bind(gradebook_id)
        .bind(category_id)
        .bind(name)
        .bind(points)
        .bind(released)
        .bind(extra_credit)
        .fetch_one(pool)
        .await?
        .get("id");
        item_ids.insert(name, id);
    }

    let avery = "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2";
    let jules = "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc";
    let kiara = "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2";

    // item, student, grade, excused
    let scores = vec![
        ("Homework 1", avery, Some("9"), false),
        ("Homework 2", avery, Some("4"), false),
        ("Homework 3", avery, Some("10"), false),
        ("Bonus Quiz", avery, Some("5"), false),
        ("Midterm", avery, Some("82"), false),
        ("Lab 1", avery, Some("18"), false),
        ("Lab 2", avery, None, true),
        ("Homework 1", jules, Some("7"), false),
        ("Homework 2", jules, Some("8"), false),
        ("Midterm", jules, Some("65"), false),
        ("Lab 1", jules, Some("12"), false),
        ("Homework 1", kiara, Some("10"), false),
        ("Midterm", kiara, Some("95"), false),
    ];
    for (item, student, grade, excused) in scores {
        let item_id = item_ids
            .get(item)
            .copied()
            .ok_or_else(|| GradingError::AssessmentNotFound(item.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO gradebook.scores (id, item_id, student_uuid, grade, excused)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (item_id, student_uuid) DO UPDATE
            SET grade = EXCLUDED.grade, excused = EXCLUDED.excused
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(item_id)
        .bind(student)
        .bind(grade)
        .bind(excused)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT INTO gradebook.course_grade_overrides (gradebook_id, student_uuid, grade)
        VALUES ($1, $2, $3)
        ON CONFLICT (gradebook_id, student_uuid) DO UPDATE SET grade = EXCLUDED.grade
        "#,
    )
    .bind(gradebook_id)
    .bind(kiara)
    .bind("A")
    .execute(pool)
    .await?;

    Ok(())
}

async fn lookup_gradebook_id(pool: &PgPool, gradebook_uid: &str) -> anyhow::Result<i64> {
    let row = sqlx::query("SELECT id FROM gradebook.gradebooks WHERE uid = $1")
        .bind(gradebook_uid)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| GradingError::GradebookNotFound(gradebook_uid.to_string()))?;
    Ok(row.get("id"))
}

fn parse_entry_type(raw: &str) -> anyhow::Result<GradeEntryType> {
    match raw {
        "points" => Ok(GradeEntryType::Points),
        "percentage" => Ok(GradeEntryType::Percentage),
        "letter" => Ok(GradeEntryType::Letter),
        other => anyhow::bail!("unknown grade entry type '{other}'"),
    }
}

fn parse_category_type(raw: &str) -> anyhow::Result<CategoryType> {
    match raw {
        "none" => Ok(CategoryType::NoCategories),
        "unweighted" => Ok(CategoryType::Unweighted),
        "weighted" => Ok(CategoryType::Weighted),
        other => anyhow::bail!("unknown category type '{other}'"),
    }
}
