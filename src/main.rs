use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod db;
mod engine;
mod error;
mod models;
mod report;
mod scale;
mod validation;

use error::GradingError;
use models::CourseGrade;
use scale::GradingScale;
use validation::PointsValidation;

#[derive(Parser)]
#[command(name = "gradebook-aggregation")]
#[command(about = "Category and course grade aggregation over a gradebook store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a realistic sample gradebook
    Seed,
    /// Import scores from a CSV file (item,student_uuid,grade,excused)
    Import {
        #[arg(long)]
        gradebook: String,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Create or update a gradebook item
    AddItem {
        #[arg(long)]
        gradebook: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        points: Option<f64>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        due: Option<NaiveDate>,
        /// Item carries no points and never enters aggregation
        #[arg(long)]
        ungraded: bool,
        #[arg(long)]
        unreleased: bool,
        #[arg(long)]
        uncounted: bool,
        #[arg(long)]
        extra_credit: bool,
    },
    /// One student's score for one category
    #[command(group(
        ArgGroup::new("which")
            .args(["category_id", "category_name"])
            .required(true)
            .multiple(false)
    ))]
    CategoryScore {
        #[arg(long)]
        gradebook: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        category_id: Option<i64>,
        #[arg(long)]
        category_name: Option<String>,
        #[arg(long)]
        include_non_released: bool,
    },
    /// One student's course grade
    CourseGrade {
        #[arg(long)]
        gradebook: String,
        #[arg(long)]
        student: String,
    },
    /// Course grades for every student in the gradebook
    CourseGrades {
        #[arg(long)]
        gradebook: String,
        /// Map results through a built-in scale instead of the gradebook's
        /// own (letters, letters-plus-minus, pass-fail)
        #[arg(long)]
        scale: Option<String>,
        #[arg(long)]
        json: bool,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Set an instructor course-grade override for a student
    Override {
        #[arg(long)]
        gradebook: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        grade: String,
    },
    /// Generate a markdown grade report
    Report {
        #[arg(long)]
        gradebook: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed gradebook inserted.");
        }
        Commands::Import { gradebook, csv } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            let saved = db::import_scores_csv(&pool, &snapshot, &csv).await?;
            println!("Saved {saved} scores from {}.", csv.display());
        }
        Commands::AddItem {
            gradebook,
            name,
            points,
            category,
            due,
            ungraded,
            unreleased,
            uncounted,
            extra_credit,
        } => {
            if !ungraded {
                match validation::points_possible_valid(points) {
                    PointsValidation::Valid => {}
                    PointsValidation::InvalidNullValue => {
                        anyhow::bail!("points are required; pass --points or mark the item --ungraded")
                    }
                    PointsValidation::InvalidNumericValue => {
                        anyhow::bail!("points must be a positive number")
                    }
                    PointsValidation::InvalidDecimal => {
                        anyhow::bail!("points may have at most two decimal places")
                    }
                }
            }
            let id = db::add_item(
                &pool,
                &gradebook,
                db::NewItem {
                    name: &name,
                    points_possible: if ungraded { None } else { points },
                    due_date: due,
                    category: category.as_deref(),
                    released: !unreleased,
                    counted: !uncounted,
                    extra_credit,
                },
            )
            .await?;
            println!("Item '{name}' saved with id {id}.");
        }
        Commands::CategoryScore {
            gradebook,
            student,
            category_id,
            category_name,
            include_non_released,
        } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            let category = engine::find_category(
                &snapshot.categories,
                category_id,
                category_name.as_deref(),
            )?;
            match engine::category_score_for_student(
                &snapshot,
                category,
                &student,
                include_non_released,
            ) {
                Some(result) => {
                    println!(
                        "{}: {:.2}% for student {student}",
                        category.name, result.percentage
                    );
                    if !result.dropped_item_ids.is_empty() {
                        println!("Dropped item ids: {:?}", result.dropped_item_ids);
                    }
                    if result.includes_non_released {
                        println!("Includes non-released items.");
                    }
                }
                None => println!(
                    "{}: no countable items for student {student}.",
                    category.name
                ),
            }
        }
        Commands::CourseGrade { gradebook, student } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            let grade = engine::course_grade_for_student(&snapshot, &student);
            print_grade(&grade);
        }
        Commands::CourseGrades {
            gradebook,
            scale,
            json,
            limit,
        } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            let alt_scale = match scale {
                Some(name) => Some(GradingScale::by_name(&name).ok_or_else(|| {
                    GradingError::InvalidScale(
                        name,
                        "not a built-in scale (try letters, letters-plus-minus, pass-fail)"
                            .to_string(),
                    )
                })?),
                None => None,
            };
            let students = engine::students_in(&snapshot);
            let grades =
                engine::course_grades_for_students(&snapshot, &students, alt_scale.as_ref());

            if grades.is_empty() {
                println!("No students with scores in this gradebook.");
                return Ok(());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&grades)?);
            } else {
                let mut rows: Vec<&CourseGrade> = grades.values().collect();
                rows.sort_by(|a, b| match (a.percentage, b.percentage) {
                    (Some(x), Some(y)) => {
                        y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal)
                    }
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (None, None) => a.student.cmp(&b.student),
                });
                for grade in rows.iter().take(limit) {
                    print_grade(grade);
                }
            }
        }
        Commands::Override {
            gradebook,
            student,
            grade,
        } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            if !snapshot.scale.has_label(&grade) {
                return Err(GradingError::InvalidGrade {
                    student,
                    grade,
                }
                .into());
            }
            db::set_override(&pool, &gradebook, &student, &grade).await?;
            println!("Override '{grade}' set for student {student}.");
        }
        Commands::Report { gradebook, out } => {
            let snapshot = db::fetch_snapshot(&pool, &gradebook).await?;
            let students = engine::students_in(&snapshot);
            let grades = engine::course_grades_for_students(&snapshot, &students, None);
            let report = report::build_report(&snapshot, &grades);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn print_grade(grade: &CourseGrade) {
    match (grade.percentage, grade.letter.as_deref()) {
        (Some(p), Some(l)) => println!("- {}: {:.2}% ({})", grade.student, p, l),
        (Some(p), None) => println!("- {}: {:.2}%", grade.student, p),
        (None, Some(l)) if grade.overridden => {
            println!("- {}: {} (instructor override)", grade.student, l)
        }
        (None, Some(l)) => println!("- {}: {}", grade.student, l),
        (None, None) => println!("- {}: no grade", grade.student),
    }
}
