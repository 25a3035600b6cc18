use crate::error::GradingError;
use crate::loader::{student_key, PERCENTAGE_MAX_POINTS};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// Canonical grade ladder, best to worst.
pub const GRADE_LADDER: [&str; 13] = [
    "A+", "A", "A-", "B+", "B", "B-", "C+", "C", "C-", "D+", "D", "D-", "F",
];

pub const NOT_AVAILABLE: &str = "N/A";

/// Percentile floors for every grade below the A+ band.
const PERCENTILE_TABLE: [(f64, &str); 11] = [
    (85.0, "A"),
    (75.0, "A-"),
    (65.0, "B+"),
    (55.0, "B"),
    (45.0, "B-"),
    (35.0, "C+"),
    (28.0, "C"),
    (21.0, "C-"),
    (14.0, "D+"),
    (9.0, "D"),
    (5.0, "D-"),
];

/// Rank-2 gets A+ when it trails rank 1 by this inclusive range.
const RUNNER_UP_GAP: (f64, f64) = (1.0, 3.0);

/// Returns the canonical spelling of a ladder grade, matching case-insensitively.
pub fn canonical_grade(raw: &str) -> Option<&'static str> {
    let t = raw.trim();
    GRADE_LADDER
        .iter()
        .copied()
        .find(|g| g.eq_ignore_ascii_case(t))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GradingMethod {
    #[default]
    Automatic,
    #[serde(alias = "percentage")]
    PercentageBased,
    #[serde(alias = "limits")]
    ClassLimits,
    Manual,
}

impl GradingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            GradingMethod::Automatic => "automatic",
            GradingMethod::PercentageBased => "percentage-based",
            GradingMethod::ClassLimits => "class-limits",
            GradingMethod::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingConfig {
    #[serde(default)]
    pub method: GradingMethod,
    /// grade -> minimum percentage (percentage-based only)
    #[serde(default)]
    pub ranges: BTreeMap<String, f64>,
    /// grade -> maximum headcount (class-limits only)
    #[serde(default)]
    pub limits: BTreeMap<String, u32>,
}

impl GradingConfig {
    pub fn automatic() -> Self {
        Self::default()
    }

    /// Checks labels and thresholds and rewrites grade keys to their
    /// canonical spelling.
    pub fn validated(self) -> Result<GradingConfig, GradingError> {
        let mut ranges = BTreeMap::new();
        for (grade, threshold) in self.ranges {
            let Some(g) = canonical_grade(&grade) else {
                return Err(GradingError::UnknownGrade(grade));
            };
            if !threshold.is_finite() {
                return Err(GradingError::BadThreshold { grade, threshold });
            }
            ranges.insert(g.to_string(), threshold);
        }
        let mut limits = BTreeMap::new();
        for (grade, limit) in self.limits {
            let Some(g) = canonical_grade(&grade) else {
                return Err(GradingError::UnknownGrade(grade));
            };
            limits.insert(g.to_string(), limit);
        }
        Ok(GradingConfig {
            method: self.method,
            ranges,
            limits,
        })
    }
}

/// Totals of one class sorted best-first, built once per grading pass.
#[derive(Debug, Clone)]
pub struct RankTable {
    sorted: Vec<f64>,
}

impl RankTable {
    /// Null and non-finite totals are discarded.
    pub fn new(all_totals: &[Option<f64>]) -> Self {
        let mut sorted: Vec<f64> = all_totals
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));
        RankTable { sorted }
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    /// 1 + number of strictly greater totals; equal totals share a rank.
    pub fn rank(&self, total: f64) -> usize {
        self.sorted.partition_point(|v| *v > total) + 1
    }

    pub fn percentile(&self, rank: usize) -> f64 {
        let n = self.sorted.len();
        if n == 0 {
            return 0.0;
        }
        (n.saturating_sub(rank) as f64) * 100.0 / (n as f64)
    }

    fn score_at_rank(&self, rank: usize) -> Option<f64> {
        self.sorted.get(rank.checked_sub(1)?).copied()
    }
}

fn percentile_grade(percentile: f64) -> &'static str {
    PERCENTILE_TABLE
        .iter()
        .find(|(floor, _)| percentile >= *floor)
        .map(|(_, g)| *g)
        .unwrap_or("F")
}

fn automatic_grade(total: f64, table: &RankTable) -> String {
    let rank = table.rank(total);
    if rank == 1 {
        return "A+".to_string();
    }
    if rank == 2 {
        let (Some(first), Some(second)) = (table.score_at_rank(1), table.score_at_rank(2)) else {
            return "A".to_string();
        };
        let gap = first - second;
        if gap >= RUNNER_UP_GAP.0 && gap <= RUNNER_UP_GAP.1 {
            return "A+".to_string();
        }
        return "A".to_string();
    }
    percentile_grade(table.percentile(rank)).to_string()
}

pub fn percentage_of_max(total: f64) -> f64 {
    total / PERCENTAGE_MAX_POINTS * 100.0
}

fn ladder_position(grade: &str) -> usize {
    GRADE_LADDER
        .iter()
        .position(|g| *g == grade)
        .unwrap_or(GRADE_LADDER.len())
}

fn percentage_grade(total: f64, ranges: &BTreeMap<String, f64>) -> String {
    let percentage = percentage_of_max(total);
    let mut ordered: Vec<(&String, &f64)> = ranges.iter().collect();
    // Highest floor first; equal floors go to the better ladder grade.
    ordered.sort_by(|a, b| {
        b.1.partial_cmp(a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| ladder_position(a.0).cmp(&ladder_position(b.0)))
    });
    ordered
        .into_iter()
        .find(|(_, threshold)| **threshold <= percentage)
        .map(|(grade, _)| grade.clone())
        .unwrap_or_else(|| "F".to_string())
}

fn class_limits_grade(total: f64, table: &RankTable, limits: &BTreeMap<String, u32>) -> String {
    let rank = table.rank(total);
    let mut boundary: u64 = 0;
    for grade in GRADE_LADDER {
        boundary += u64::from(limits.get(grade).copied().unwrap_or(0));
        if (rank as u64) <= boundary {
            return grade.to_string();
        }
    }
    "F".to_string()
}

/// Grades every student of one pass against the same rank table and
/// override snapshot.
#[derive(Debug, Clone)]
pub struct Grader<'a> {
    config: &'a GradingConfig,
    table: RankTable,
    overrides: &'a HashMap<String, String>,
}

impl<'a> Grader<'a> {
    /// `overrides` is keyed by `loader::student_key`.
    pub fn new(
        all_totals: &[Option<f64>],
        config: &'a GradingConfig,
        overrides: &'a HashMap<String, String>,
    ) -> Self {
        Grader {
            config,
            table: RankTable::new(all_totals),
            overrides,
        }
    }

    pub fn rank_table(&self) -> &RankTable {
        &self.table
    }

    pub fn grade(&self, student_total: Option<f64>, student_id: &str) -> String {
        let total = match student_total {
            Some(v) if v.is_finite() => v,
            _ => return NOT_AVAILABLE.to_string(),
        };
        if self.table.is_empty() {
            return NOT_AVAILABLE.to_string();
        }
        match self.config.method {
            GradingMethod::Automatic => automatic_grade(total, &self.table),
            GradingMethod::PercentageBased => percentage_grade(total, &self.config.ranges),
            GradingMethod::ClassLimits => class_limits_grade(total, &self.table, &self.config.limits),
            GradingMethod::Manual => match self.overrides.get(&student_key(student_id)) {
                Some(g) => g.clone(),
                None => automatic_grade(total, &self.table),
            },
        }
    }
}

/// One-off grading of a single student. Passes over a whole class should
/// build a `Grader` once instead.
#[allow(dead_code)]
pub fn grade(
    student_total: Option<f64>,
    all_totals: &[Option<f64>],
    config: &GradingConfig,
    student_id: &str,
    manual_overrides: &HashMap<String, String>,
) -> String {
    Grader::new(all_totals, config, manual_overrides).grade(student_total, student_id)
}
