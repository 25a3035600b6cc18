use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::HashSet;

/// Label that is carried through for display but never summed.
pub const TOTAL_LABEL: &str = "Total";

/// Raw points that make up 100% of a student's percentage.
pub const PERCENTAGE_MAX_POINTS: f64 = 55.0;

pub fn is_total_label(label: &str) -> bool {
    label.trim().eq_ignore_ascii_case(TOTAL_LABEL)
}

/// One raw table row as delivered by a row source:
/// `[student id, name, mark, mark, ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRow {
    pub student_id: String,
    pub name: String,
    pub raw_marks: Vec<String>,
}

impl ScoreRow {
    /// Returns `None` for malformed rows (missing id or name).
    pub fn from_cells(cells: &[String]) -> Option<ScoreRow> {
        let student_id = cells.first()?.trim();
        let name = cells.get(1)?.trim();
        if student_id.is_empty() || name.is_empty() {
            return None;
        }
        Some(ScoreRow {
            student_id: student_id.to_string(),
            name: name.to_string(),
            raw_marks: cells[2..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkValue {
    Number(f64),
    Text(String),
    Empty,
}

impl MarkValue {
    pub fn parse(raw: &str) -> MarkValue {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return MarkValue::Empty;
        }
        let numeric = trimmed.trim_end_matches('%').trim();
        match numeric.parse::<f64>() {
            Ok(v) if v.is_finite() => MarkValue::Number(v),
            _ => MarkValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MarkValue::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Contribution to a total: non-numeric cells count as 0.
    pub fn points(&self) -> f64 {
        self.as_number().unwrap_or(0.0)
    }
}

impl Serialize for MarkValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MarkValue::Number(v) => serializer.serialize_f64(*v),
            MarkValue::Text(s) => serializer.serialize_str(s),
            MarkValue::Empty => serializer.serialize_str("-"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkCell {
    pub label: String,
    pub value: MarkValue,
}

/// Ordered label -> mark mapping; serializes as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marks(pub Vec<MarkCell>);

impl Marks {
    #[cfg(test)]
    pub fn get(&self, label: &str) -> Option<&MarkValue> {
        self.0.iter().find(|c| c.label == label).map(|c| &c.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkCell> {
        self.0.iter()
    }
}

impl Serialize for Marks {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for cell in &self.0 {
            map.serialize_entry(&cell.label, &cell.value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub name: String,
    pub marks: Marks,
    pub total: f64,
}

/// Largest total magnitude accepted; its percentage of
/// `PERCENTAGE_MAX_POINTS` stays well inside the finite range.
const MAX_TOTAL: f64 = f64::MAX / 200.0 * PERCENTAGE_MAX_POINTS;

/// Final mark column labels for `width` columns: header labels first, then
/// `Extra {n}` for columns past the header row. Blank headers become
/// `Column {n}`. Every label is distinct (case-insensitively); a repeat gets
/// the first free ` ({k})` suffix.
pub fn column_labels(headers: &[String], width: usize) -> Vec<String> {
    let count = headers.len().max(width);
    let mut seen: HashSet<String> = HashSet::with_capacity(count);
    let mut out = Vec::with_capacity(count);
    for idx in 0..count {
        let base = match headers.get(idx).map(|h| h.trim()) {
            Some(h) if !h.is_empty() => h.to_string(),
            Some(_) => format!("Column {}", idx + 1),
            None => format!("Extra {}", idx + 1),
        };
        let mut label = base.clone();
        let mut k = 2;
        while !seen.insert(label.to_lowercase()) {
            label = format!("{} ({})", base, k);
            k += 1;
        }
        out.push(label);
    }
    out
}

/// `labels` must come from `column_labels` and cover every mark of the row.
/// Short rows get an `Empty` placeholder up to `labelled` columns.
fn load_record(row: &ScoreRow, labels: &[String], labelled: usize) -> StudentRecord {
    let mut cells = Vec::with_capacity(row.raw_marks.len().max(labelled));
    let mut total = 0.0_f64;
    for (raw, label) in row.raw_marks.iter().zip(labels) {
        let mut value = MarkValue::parse(raw);
        if !is_total_label(label) {
            if let Some(v) = value.as_number() {
                let next = total + v;
                if next.abs() <= MAX_TOTAL {
                    total = next;
                } else {
                    // Out of range for a total; kept for display only.
                    value = MarkValue::Text(raw.trim().to_string());
                }
            }
        }
        cells.push(MarkCell {
            label: label.clone(),
            value,
        });
    }
    for label in labels.iter().take(labelled).skip(row.raw_marks.len()) {
        cells.push(MarkCell {
            label: label.clone(),
            value: MarkValue::Empty,
        });
    }
    StudentRecord {
        student_id: row.student_id.clone(),
        name: row.name.clone(),
        marks: Marks(cells),
        total,
    }
}

/// Student records plus the mark labels they are keyed by, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedTable {
    pub headers: Vec<String>,
    pub students: Vec<StudentRecord>,
}

/// Normalizes raw rows into student records, dropping malformed rows.
/// `headers` are the raw mark column labels of the header row.
pub fn load_table(headers: &[String], rows: &[Vec<String>]) -> LoadedTable {
    let parsed: Vec<ScoreRow> = rows
        .iter()
        .filter_map(|cells| ScoreRow::from_cells(cells))
        .collect();
    let width = parsed.iter().map(|r| r.raw_marks.len()).max().unwrap_or(0);
    let labels = column_labels(headers, width);
    let students = parsed
        .iter()
        .map(|row| load_record(row, &labels, headers.len()))
        .collect();
    LoadedTable {
        headers: labels,
        students,
    }
}

/// Roll number key used for student lookups: alphanumerics only, upper case.
pub fn normalize_roll_no(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Key used to match student ids across collaborators.
pub fn student_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}
