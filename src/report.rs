use crate::error::ReportError;
use crate::grading::{percentage_of_max, Grader, GradingConfig, GradingMethod};
use crate::loader::{self, load_table};
use crate::overrides::{self, OverrideStore};
use crate::source::RowSource;
use crate::stats::{build_statistics, ClassStatistics, GradedStudent};
use serde::Serialize;
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub source_id: String,
    pub method: GradingMethod,
    pub students: Vec<GradedStudent>,
    pub statistics: ClassStatistics,
}

impl GradeReport {
    pub fn find_by_roll_no(&self, roll_no: &str) -> Option<&GradedStudent> {
        let wanted = loader::normalize_roll_no(roll_no);
        if wanted.is_empty() {
            return None;
        }
        self.students
            .iter()
            .find(|s| loader::normalize_roll_no(&s.roll_number) == wanted)
    }
}

pub fn compute_statistics(
    rows: &dyn RowSource,
    store: &dyn OverrideStore,
    source_id: &str,
) -> Result<GradeReport, ReportError> {
    compute_grades(rows, store, source_id, &GradingConfig::automatic())
}

/// One full pass: fetch, load, grade, then summarize. Overrides are read once
/// and only for the manual method.
pub fn compute_grades(
    rows: &dyn RowSource,
    store: &dyn OverrideStore,
    source_id: &str,
    config: &GradingConfig,
) -> Result<GradeReport, ReportError> {
    let config = config.clone().validated()?;
    let table = rows.fetch_rows(source_id)?;

    let loaded = load_table(&table.headers, &table.rows);
    let headers = loaded.headers;
    let records = loaded.students;

    let manual_overrides = if config.method == GradingMethod::Manual {
        overrides::lookup(store, source_id)?
    } else {
        HashMap::new()
    };

    let all_totals: Vec<Option<f64>> = records.iter().map(|r| Some(r.total)).collect();
    let grader = Grader::new(&all_totals, &config, &manual_overrides);

    let mut students: Vec<GradedStudent> = records
        .iter()
        .cloned()
        .map(|r| {
            let grade = grader.grade(Some(r.total), &r.student_id);
            let rank = grader.rank_table().rank(r.total);
            let percentage = percentage_of_max(r.total);
            GradedStudent::new(r, grade, percentage, rank)
        })
        .collect();

    let statistics = build_statistics(&mut students, &records, headers);

    info!(
        source_id,
        method = config.method.as_str(),
        students = statistics.total_students,
        ranked = grader.rank_table().len(),
        overrides = manual_overrides.len(),
        "grading pass complete"
    );

    Ok(GradeReport {
        source_id: source_id.to_string(),
        method: config.method,
        students,
        statistics,
    })
}
