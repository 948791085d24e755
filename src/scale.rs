use crate::error::GradingError;

/// One row of a grading scale: the label awarded at or above `min_percent`.
#[derive(Debug, Clone)]
pub struct ScaleEntry {
    pub label: String,
    pub min_percent: f64,
}

/// Ordered percentage-threshold-to-label table. Entries are kept sorted by
/// descending threshold; the last entry must sit at 0.0 so every percentage
/// in [0, 100] maps to a label.
#[derive(Debug, Clone)]
pub struct GradingScale {
    pub name: String,
    entries: Vec<ScaleEntry>,
}

impl GradingScale {
    pub fn new(name: &str, mut entries: Vec<ScaleEntry>) -> Result<Self, GradingError> {
        if entries.is_empty() {
            return Err(GradingError::InvalidScale(
                name.to_string(),
                "scale has no entries".to_string(),
            ));
        }
        entries.sort_by(|a, b| {
            b.min_percent
                .partial_cmp(&a.min_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for pair in entries.windows(2) {
            if pair[1].min_percent >= pair[0].min_percent {
                return Err(GradingError::InvalidScale(
                    name.to_string(),
                    format!(
                        "thresholds for '{}' and '{}' are not strictly decreasing",
                        pair[0].label, pair[1].label
                    ),
                ));
            }
        }
        let floor = entries.last().map(|e| e.min_percent).unwrap_or(f64::NAN);
        if floor != 0.0 {
            return Err(GradingError::InvalidScale(
                name.to_string(),
                format!("lowest threshold is {floor}, must be 0 to cover [0, 100]"),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            entries,
        })
    }

    /// Standard A-F scale.
    pub fn letter_standard() -> Self {
        Self::builtin(
            "letters",
            &[("A", 90.0), ("B", 80.0), ("C", 70.0), ("D", 60.0), ("F", 0.0)],
        )
    }

    pub fn letter_plus_minus() -> Self {
        Self::builtin(
            "letters-plus-minus",
            &[
                ("A", 95.0),
                ("A-", 90.0),
                ("B+", 87.0),
                ("B", 83.0),
                ("B-", 80.0),
                ("C+", 77.0),
                ("C", 73.0),
                ("C-", 70.0),
                ("D+", 67.0),
                ("D", 63.0),
                ("D-", 60.0),
                ("F", 0.0),
            ],
        )
    }

    pub fn pass_fail() -> Self {
        Self::builtin("pass-fail", &[("P", 75.0), ("NP", 0.0)])
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "letters" => Some(Self::letter_standard()),
            "letters-plus-minus" => Some(Self::letter_plus_minus()),
            "pass-fail" => Some(Self::pass_fail()),
            _ => None,
        }
    }

    fn builtin(name: &str, rows: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            entries: rows
                .iter()
                .map(|(label, min_percent)| ScaleEntry {
                    label: (*label).to_string(),
                    min_percent: *min_percent,
                })
                .collect(),
        }
    }

    pub fn entries(&self) -> &[ScaleEntry] {
        &self.entries
    }

    /// Label for a percentage, or None when the percentage is negative.
    pub fn letter_for(&self, percentage: f64) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| percentage >= e.min_percent)
            .map(|e| e.label.as_str())
    }

    /// Threshold percentage for a label, used to convert letter-entry
    /// grades into numeric values before aggregation.
    pub fn percent_for(&self, label: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.label.eq_ignore_ascii_case(label.trim()))
            .map(|e| e.min_percent)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.percent_for(label).is_some()
    }
}
