use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::overrides::SqliteOverrideStore;
use crate::source::{self, SheetGrid};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

const IMPORT_MAX_ROWS: usize = 20_000;

struct SourceRow {
    id: String,
    sheet_id: String,
    tab_name: String,
    description: String,
    owner_id: Option<String>,
    created_at: String,
}

fn load_source(conn: &Connection, id: &str) -> rusqlite::Result<Option<SourceRow>> {
    conn.query_row(
        "SELECT id, sheet_id, tab_name, description, owner_id, created_at
         FROM sources WHERE id = ?",
        [id],
        |r| {
            Ok(SourceRow {
                id: r.get(0)?,
                sheet_id: r.get(1)?,
                tab_name: r.get(2)?,
                description: r.get(3)?,
                owner_id: r.get(4)?,
                created_at: r.get(5)?,
            })
        },
    )
    .optional()
}

fn handle_sources_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let sheet_id = match required_str(req, "sheetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let tab_name = match required_str(req, "tabName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let id = optional_str(req, "id").unwrap_or_else(|| Uuid::new_v4().to_string());
    let description = optional_str(req, "description").unwrap_or_else(|| "New Sheet".to_string());
    let owner_id = optional_str(req, "ownerId");

    match load_source(conn, &id) {
        Ok(Some(_)) => {
            return err(
                &req.id,
                "conflict",
                "source id already exists",
                Some(json!({ "id": id })),
            )
        }
        Ok(None) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let created_at = chrono::Utc::now().to_rfc3339();
    if let Err(e) = conn.execute(
        "INSERT INTO sources(id, sheet_id, tab_name, description, owner_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &sheet_id, &tab_name, &description, owner_id.as_deref(), &created_at),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sources" })),
        );
    }

    info!(source_id = %id, sheet_id = %sheet_id, tab = %tab_name, "source added");
    ok(&req.id, json!({ "id": id }))
}

fn handle_sources_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "sources": [] }));
    };
    let owner = optional_str(req, "ownerId");

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.sheet_id, s.tab_name, s.description, s.owner_id, s.created_at,
           (SELECT COUNT(*) FROM source_rows r WHERE r.source_id = s.id) AS row_count
         FROM sources s
         WHERE ?1 IS NULL OR s.owner_id = ?1
         ORDER BY s.created_at, s.id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([owner.as_deref()], |r| {
            Ok((
                SourceRow {
                    id: r.get(0)?,
                    sheet_id: r.get(1)?,
                    tab_name: r.get(2)?,
                    description: r.get(3)?,
                    owner_id: r.get(4)?,
                    created_at: r.get(5)?,
                },
                r.get::<_, i64>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let sources: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|(s, row_count)| {
            let status = state
                .source_status
                .get(&s.id)
                .map(|st| json!(st))
                .unwrap_or_else(|| json!({ "status": "unknown" }));
            json!({
                "id": s.id,
                "sheetId": s.sheet_id,
                "tabName": s.tab_name,
                "description": s.description,
                "ownerId": s.owner_id,
                "createdAt": s.created_at,
                "rowCount": row_count,
                "status": status,
            })
        })
        .collect();
    ok(&req.id, json!({ "sources": sources }))
}

fn handle_sources_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let id = match required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let caller = optional_str(req, "ownerId");

    let existing = match load_source(conn, &id) {
        Ok(Some(s)) => s,
        Ok(None) => return err(&req.id, "not_found", "source not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Some(owner) = existing.owner_id.as_deref() {
        if caller.as_deref() != Some(owner) {
            return err(
                &req.id,
                "permission_denied",
                "source belongs to another owner",
                Some(json!({ "id": existing.id })),
            );
        }
    }

    let removed = (|| -> anyhow::Result<()> {
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM source_rows WHERE source_id = ?", [&id])?;
        tx.execute("DELETE FROM source_tables WHERE source_id = ?", [&id])?;
        SqliteOverrideStore::new(&tx).clear_source(&id)?;
        db::settings_delete(&tx, &db::grading_config_key(&id))?;
        tx.execute("DELETE FROM sources WHERE id = ?", [&id])?;
        tx.commit()?;
        Ok(())
    })();
    if let Err(e) = removed {
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    state.row_cache.invalidate(&id);
    state.source_status.remove(&id);
    info!(source_id = %id, "source removed");
    ok(&req.id, json!({ "removed": true }))
}

fn import_grid(state: &mut AppState, req: &Request, grid: SheetGrid) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match source::source_exists(conn, &source_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "source not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    if grid.rows.len() > IMPORT_MAX_ROWS {
        return err(
            &req.id,
            "bad_params",
            "too many rows",
            Some(json!({ "max": IMPORT_MAX_ROWS, "got": grid.rows.len() })),
        );
    }

    let header_count = grid.headers.len();
    match source::replace_table(conn, &source_id, &grid) {
        Ok(rows) => {
            state.row_cache.invalidate(&source_id);
            info!(source_id = %source_id, rows, headers = header_count, "score table imported");
            ok(
                &req.id,
                json!({ "sourceId": source_id, "rows": rows, "headers": grid.headers }),
            )
        }
        Err(e) => {
            warn!(source_id = %source_id, error = %e, "score table import failed");
            err(&req.id, "db_insert_failed", e.to_string(), None)
        }
    }
}

fn handle_sources_import_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(values) = req.params.get("values").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing values", None);
    };
    let mut grid_values = Vec::with_capacity(values.len());
    for (i, row) in values.iter().enumerate() {
        let Some(cells) = row.as_array() else {
            return err(
                &req.id,
                "bad_params",
                "values must be an array of rows",
                Some(json!({ "row": i })),
            );
        };
        grid_values.push(cells.iter().map(source::cell_to_string).collect());
    }
    import_grid(state, req, SheetGrid::from_values(grid_values))
}

fn handle_sources_import_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let values = match source::read_csv_values(&path) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": path.to_string_lossy() })),
            )
        }
    };
    import_grid(state, req, SheetGrid::from_values(values))
}

fn handle_sources_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    match optional_str(req, "sourceId") {
        Some(id) => state.row_cache.invalidate(&id),
        None => state.row_cache.invalidate_all(),
    }
    ok(&req.id, json!({ "cachedSources": state.row_cache.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sources.add" => Some(handle_sources_add(state, req)),
        "sources.list" => Some(handle_sources_list(state, req)),
        "sources.remove" => Some(handle_sources_remove(state, req)),
        "sources.importRows" => Some(handle_sources_import_rows(state, req)),
        "sources.importCsv" => Some(handle_sources_import_csv(state, req)),
        "sources.refresh" => Some(handle_sources_refresh(state, req)),
        _ => None,
    }
}
