use crate::calc::{self, round_off_2_decimals};
use crate::grading::GRADE_LADDER;
use crate::loader::{Marks, StudentRecord};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedStudent {
    pub roll_number: String,
    pub name: String,
    pub marks: Marks,
    pub total: f64,
    pub grade: String,
    pub percentage: f64,
    pub rank: usize,
}

impl GradedStudent {
    pub fn new(record: StudentRecord, grade: String, percentage: f64, rank: usize) -> Self {
        GradedStudent {
            roll_number: record.student_id,
            name: record.name,
            marks: record.marks,
            total: record.total,
            grade,
            percentage: round_off_2_decimals(percentage),
            rank,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    pub total_students: usize,
    pub class_average: f64,
    pub subject_averages: BTreeMap<String, f64>,
    pub highest_score: f64,
    pub lowest_score: f64,
    pub median_score: f64,
    pub headers: Vec<String>,
    pub grade_distribution: BTreeMap<String, usize>,
    pub sequential_totals: Vec<f64>,
}

/// Every ladder grade present, all zero.
pub fn empty_distribution() -> BTreeMap<String, usize> {
    GRADE_LADDER.iter().map(|g| (g.to_string(), 0)).collect()
}

/// Builds class statistics from students in source-row order, then sorts
/// the students best-first (stable for equal totals).
pub fn build_statistics(
    students: &mut Vec<GradedStudent>,
    records: &[StudentRecord],
    headers: Vec<String>,
) -> ClassStatistics {
    let sequential_totals: Vec<f64> = students.iter().map(|s| s.total).collect();

    students.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(Ordering::Equal));

    let mut grade_distribution = empty_distribution();
    for s in students.iter() {
        if let Some(count) = grade_distribution.get_mut(&s.grade) {
            *count += 1;
        }
    }

    let highest_score = students.first().map(|s| s.total).unwrap_or(0.0);
    let lowest_score = students.last().map(|s| s.total).unwrap_or(0.0);

    let subject_averages = calc::subject_averages(records, &headers)
        .into_iter()
        .map(|a| (a.label, round_off_2_decimals(a.average)))
        .collect();

    ClassStatistics {
        total_students: students.len(),
        class_average: round_off_2_decimals(calc::class_average(records)),
        subject_averages,
        highest_score,
        lowest_score,
        median_score: calc::compute_median(&sequential_totals),
        headers,
        grade_distribution,
        sequential_totals,
    }
}
