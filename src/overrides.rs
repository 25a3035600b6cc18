//! Manual grade overrides keyed by (source id, student id).

use crate::error::StoreError;
use crate::grading::canonical_grade;
use crate::loader::student_key;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub student_id: String,
    pub grade: String,
    pub updated_at: String,
}

pub trait OverrideStore {
    /// All overrides of one source, keyed by `loader::student_key`.
    fn get_overrides(&self, source_id: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Upserts every entry atomically; the last write for a key wins.
    fn put_overrides(&self, source_id: &str, entries: &[(String, String)]) -> Result<(), StoreError>;
}

pub struct SqliteOverrideStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteOverrideStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteOverrideStore { conn }
    }

    pub fn list(&self, source_id: &str) -> Result<Vec<OverrideEntry>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT student_id, grade, updated_at
                 FROM grade_overrides
                 WHERE source_id = ?
                 ORDER BY student_key",
            )
            .map_err(StoreError::Query)?;
        stmt.query_map([source_id], |r| {
            Ok(OverrideEntry {
                student_id: r.get(0)?,
                grade: r.get(1)?,
                updated_at: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(StoreError::Query)
    }

    /// Returns whether an override existed.
    pub fn clear(&self, source_id: &str, student_id: &str) -> Result<bool, StoreError> {
        let n = self
            .conn
            .execute(
                "DELETE FROM grade_overrides WHERE source_id = ? AND student_key = ?",
                (source_id, student_key(student_id)),
            )
            .map_err(StoreError::Write)?;
        Ok(n > 0)
    }

    pub fn clear_source(&self, source_id: &str) -> Result<usize, StoreError> {
        self.conn
            .execute("DELETE FROM grade_overrides WHERE source_id = ?", [source_id])
            .map_err(StoreError::Write)
    }
}

impl OverrideStore for SqliteOverrideStore<'_> {
    fn get_overrides(&self, source_id: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT student_key, grade FROM grade_overrides WHERE source_id = ?")
            .map_err(StoreError::Query)?;
        let rows = stmt
            .query_map([source_id], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(StoreError::Query)?;
        Ok(rows.into_iter().collect())
    }

    fn put_overrides(&self, source_id: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction().map_err(StoreError::Write)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO grade_overrides(source_id, student_key, student_id, grade, updated_at)
                     VALUES(?, ?, ?, ?, ?)
                     ON CONFLICT(source_id, student_key) DO UPDATE SET
                       student_id = excluded.student_id,
                       grade = excluded.grade,
                       updated_at = excluded.updated_at",
                )
                .map_err(StoreError::Write)?;
            for (student_id, grade) in entries {
                stmt.execute((
                    source_id,
                    student_key(student_id),
                    student_id.trim(),
                    grade,
                    &now,
                ))
                .map_err(StoreError::Write)?;
            }
        }
        tx.commit().map_err(StoreError::Write)
    }
}

/// Validates and canonicalizes a batch before it reaches the store.
pub fn prepare_entries(entries: &[(String, String)]) -> Result<Vec<(String, String)>, StoreError> {
    entries
        .iter()
        .map(|(student_id, grade)| {
            if student_id.trim().is_empty() {
                return Err(StoreError::MissingStudent);
            }
            let g = canonical_grade(grade).ok_or_else(|| StoreError::UnknownGrade(grade.clone()))?;
            Ok((student_id.trim().to_string(), g.to_string()))
        })
        .collect()
}

/// Validates a batch and applies it in one write. Returns the entry count.
pub fn upsert_batch<S: OverrideStore + ?Sized>(
    store: &S,
    source_id: &str,
    entries: &[(String, String)],
) -> Result<usize, StoreError> {
    let entries = prepare_entries(entries)?;
    store.put_overrides(source_id, &entries)?;
    Ok(entries.len())
}

pub fn upsert<S: OverrideStore + ?Sized>(
    store: &S,
    source_id: &str,
    student_id: &str,
    grade: &str,
) -> Result<(), StoreError> {
    upsert_batch(store, source_id, &[(student_id.to_string(), grade.to_string())]).map(|_| ())
}

pub fn lookup<S: OverrideStore + ?Sized>(
    store: &S,
    source_id: &str,
) -> Result<HashMap<String, String>, StoreError> {
    store.get_overrides(source_id)
}
