use crate::loader::{is_total_label, StudentRecord};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Half-up rounding to two decimals, applied only at the output boundary.
/// Values too large to scale have no fractional part and pass through.
pub fn round_off_2_decimals(x: f64) -> f64 {
    let scaled = 100.0 * x;
    if !scaled.is_finite() {
        return x;
    }
    (scaled + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub label: String,
    pub average: f64,
    pub scored_count: usize,
}

/// Mean that stays finite for finite inputs. Values are scaled before
/// summing only when the plain sum overflows.
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        sum / n
    } else {
        values.iter().map(|v| v / n).sum()
    }
}

/// Per-label averages over the students that have a numeric value for the
/// label, in column order. Labels nobody has a number for are left out.
pub fn subject_averages(records: &[StudentRecord], headers: &[String]) -> Vec<SubjectAverage> {
    let mut scored: HashMap<&str, Vec<f64>> = HashMap::new();
    for r in records {
        for cell in r.marks.iter() {
            if is_total_label(&cell.label) {
                continue;
            }
            let Some(v) = cell.value.as_number() else {
                continue;
            };
            scored.entry(cell.label.as_str()).or_default().push(v);
        }
    }

    headers
        .iter()
        .filter_map(|label| {
            let values = scored.get(label.as_str())?;
            if values.is_empty() {
                return None;
            }
            Some(SubjectAverage {
                label: label.clone(),
                average: mean(values),
                scored_count: values.len(),
            })
        })
        .collect()
}

pub fn class_average(records: &[StudentRecord]) -> f64 {
    let totals: Vec<f64> = records.iter().map(|r| r.total).collect();
    mean(&totals)
}

pub fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        sorted[(n / 2) - 1] / 2.0 + sorted[n / 2] / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_table;

    fn cells(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn round_off_two_decimals() {
        assert_eq!(round_off_2_decimals(0.0), 0.0);
        assert_eq!(round_off_2_decimals(54.545454), 54.55);
        assert_eq!(round_off_2_decimals(25.0), 25.0);
    }

    #[test]
    fn subject_averages_skip_non_numeric_and_empty_columns() {
        let headers = cells(&["Quiz", "Mid", "Lab", "Total"]);
        let rows = vec![
            cells(&["R1", "Alice", "10", "20", "", "30"]),
            cells(&["R2", "Bob", "5", "abs", "-", "5"]),
        ];
        let students = load_table(&headers, &rows).students;
        let avgs = subject_averages(&students, &headers);
        assert_eq!(avgs.len(), 2);
        assert_eq!(avgs[0].label, "Quiz");
        assert_eq!(avgs[0].average, 7.5);
        assert_eq!(avgs[1].label, "Mid");
        assert_eq!(avgs[1].average, 20.0);
        assert_eq!(avgs[1].scored_count, 1);
    }

    #[test]
    fn class_average_is_mean_of_totals() {
        let headers = cells(&["Quiz", "Mid"]);
        let rows = vec![
            cells(&["R1", "Alice", "10", "20"]),
            cells(&["R2", "Bob", "5", "15"]),
        ];
        let students = load_table(&headers, &rows).students;
        assert_eq!(class_average(&students), 25.0);
        assert_eq!(class_average(&[]), 0.0);
    }

    #[test]
    fn large_finite_totals_average_without_overflow() {
        let headers = cells(&["Quiz"]);
        let rows: Vec<Vec<String>> = (1..=5)
            .map(|i| cells(&[format!("R{}", i).as_str(), "Student", "4e307"]))
            .collect();
        let students = load_table(&headers, &rows).students;
        let avg = class_average(&students);
        assert!(avg.is_finite());
        assert!((avg - 4e307).abs() / 4e307 < 1e-12);
        let subject = subject_averages(&students, &headers)[0].average;
        assert!((subject - 4e307).abs() / 4e307 < 1e-12);
        assert_eq!(compute_median(&[f64::MAX, f64::MAX]), f64::MAX);
        assert_eq!(round_off_2_decimals(4e307), 4e307);
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(compute_median(&[]), 0.0);
        assert_eq!(compute_median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(compute_median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
