//! Row source collaborator: rectangular score tables per source id, stored in
//! the workspace database, plus the time-bounded cache that fronts it.

use crate::error::SourceError;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Header labels (mark columns only) plus raw rows
/// `[student id, name, marks...]` in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub trait RowSource {
    fn fetch_rows(&self, source_id: &str) -> Result<Arc<ScoreTable>, SourceError>;
}

pub struct SqliteRowSource<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRowSource<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteRowSource { conn }
    }
}

pub fn source_exists(conn: &Connection, source_id: &str) -> Result<bool, rusqlite::Error> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM sources WHERE id = ?", [source_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

impl RowSource for SqliteRowSource<'_> {
    fn fetch_rows(&self, source_id: &str) -> Result<Arc<ScoreTable>, SourceError> {
        if !source_exists(self.conn, source_id)? {
            return Err(SourceError::NotFound(source_id.to_string()));
        }

        let headers_json: Option<String> = self
            .conn
            .query_row(
                "SELECT headers_json FROM source_tables WHERE source_id = ?",
                [source_id],
                |r| r.get(0),
            )
            .optional()?;
        let headers: Vec<String> = match headers_json {
            Some(s) => serde_json::from_str(&s).map_err(|e| SourceError::Corrupt(e.to_string()))?,
            None => Vec::new(),
        };

        let mut stmt = self.conn.prepare(
            "SELECT cells_json FROM source_rows WHERE source_id = ? ORDER BY row_idx",
        )?;
        let raw_rows = stmt
            .query_map([source_id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut rows = Vec::with_capacity(raw_rows.len());
        for raw in raw_rows {
            let cells: Vec<String> =
                serde_json::from_str(&raw).map_err(|e| SourceError::Corrupt(e.to_string()))?;
            rows.push(cells);
        }

        Ok(Arc::new(ScoreTable { headers, rows }))
    }
}

#[derive(Debug, Clone)]
struct CachedTable {
    fetched_at: Instant,
    table: Arc<ScoreTable>,
}

/// Per-source snapshot cache with a time bound and explicit invalidation.
#[derive(Debug)]
pub struct RowCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedTable>>,
}

impl RowCache {
    pub fn new(ttl: Duration) -> Self {
        RowCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedTable>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn get_fresh(&self, source_id: &str, now: Instant) -> Option<Arc<ScoreTable>> {
        let entries = self.lock();
        let entry = entries.get(source_id)?;
        if now.saturating_duration_since(entry.fetched_at) < self.ttl {
            Some(entry.table.clone())
        } else {
            None
        }
    }

    fn store(&self, source_id: &str, table: Arc<ScoreTable>, now: Instant) {
        if self.ttl.is_zero() {
            return;
        }
        self.lock().insert(
            source_id.to_string(),
            CachedTable {
                fetched_at: now,
                table,
            },
        );
    }

    pub fn invalidate(&self, source_id: &str) {
        if self.lock().remove(source_id).is_some() {
            debug!(source_id, "row cache entry invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

pub struct CachedRowSource<'a, S: RowSource> {
    inner: S,
    cache: &'a RowCache,
}

impl<'a, S: RowSource> CachedRowSource<'a, S> {
    pub fn new(inner: S, cache: &'a RowCache) -> Self {
        CachedRowSource { inner, cache }
    }
}

impl<S: RowSource> RowSource for CachedRowSource<'_, S> {
    fn fetch_rows(&self, source_id: &str) -> Result<Arc<ScoreTable>, SourceError> {
        let now = Instant::now();
        if let Some(table) = self.cache.get_fresh(source_id, now) {
            debug!(source_id, "row cache hit");
            return Ok(table);
        }
        debug!(source_id, "row cache miss");
        let table = self.inner.fetch_rows(source_id)?;
        self.cache.store(source_id, table.clone(), now);
        Ok(table)
    }
}

/// A raw sheet split into its header row and data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    pub id_title: Option<String>,
    pub name_title: Option<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetGrid {
    /// First row is the header row; its first two cells title the id and
    /// name columns.
    pub fn from_values(mut values: Vec<Vec<String>>) -> SheetGrid {
        if values.is_empty() {
            return SheetGrid::default();
        }
        let header_row = values.remove(0);
        let mut cells = header_row.into_iter();
        let id_title = cells.next();
        let name_title = cells.next();
        SheetGrid {
            id_title,
            name_title,
            headers: cells.collect(),
            rows: values,
        }
    }
}

pub fn cell_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn read_csv_values(path: &Path) -> anyhow::Result<Vec<Vec<String>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record?;
        out.push(record.iter().map(|c| c.to_string()).collect());
    }
    Ok(out)
}

/// Replaces the stored table of `source_id` in one transaction.
pub fn replace_table(conn: &Connection, source_id: &str, grid: &SheetGrid) -> anyhow::Result<usize> {
    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM source_rows WHERE source_id = ?", [source_id])?;
    tx.execute(
        "INSERT INTO source_tables(source_id, headers_json, id_title, name_title, updated_at)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(source_id) DO UPDATE SET
           headers_json = excluded.headers_json,
           id_title = excluded.id_title,
           name_title = excluded.name_title,
           updated_at = excluded.updated_at",
        (
            source_id,
            serde_json::to_string(&grid.headers)?,
            grid.id_title.as_deref(),
            grid.name_title.as_deref(),
            &now,
        ),
    )?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO source_rows(source_id, row_idx, cells_json) VALUES(?, ?, ?)")?;
        for (i, cells) in grid.rows.iter().enumerate() {
            stmt.execute((source_id, i as i64, serde_json::to_string(cells)?))?;
        }
    }
    tx.commit()?;
    Ok(grid.rows.len())
}
