use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::overrides::{self, SqliteOverrideStore};
use crate::source::source_exists;
use serde_json::json;
use tracing::info;

const UPSERT_MAX_ENTRIES: usize = 5000;

enum UpsertInput {
    One(String, String),
    Batch(Vec<(String, String)>),
}

fn parse_entries(req: &Request) -> Result<UpsertInput, serde_json::Value> {
    if let Some(list) = req.params.get("entries").and_then(|v| v.as_array()) {
        if list.len() > UPSERT_MAX_ENTRIES {
            return Err(err(
                &req.id,
                "bad_params",
                "too many entries",
                Some(json!({ "max": UPSERT_MAX_ENTRIES, "got": list.len() })),
            ));
        }
        let mut out = Vec::with_capacity(list.len());
        for (i, e) in list.iter().enumerate() {
            let student_id = e.get("studentId").and_then(|v| v.as_str());
            let grade = e.get("grade").and_then(|v| v.as_str());
            let (Some(student_id), Some(grade)) = (student_id, grade) else {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "entries must have studentId and grade strings",
                    Some(json!({ "index": i })),
                ));
            };
            out.push((student_id.to_string(), grade.to_string()));
        }
        return Ok(UpsertInput::Batch(out));
    }

    let student_id = required_str(req, "studentId")?;
    let grade = required_str(req, "grade")?;
    Ok(UpsertInput::One(student_id, grade))
}

fn handle_overrides_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let input = match parse_entries(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match source_exists(conn, &source_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "source not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let store = SqliteOverrideStore::new(conn);
    let saved = match input {
        UpsertInput::One(student_id, grade) => {
            overrides::upsert(&store, &source_id, &student_id, &grade).map(|_| 1)
        }
        UpsertInput::Batch(entries) => overrides::upsert_batch(&store, &source_id, &entries),
    };
    match saved {
        Ok(count) => {
            info!(source_id = %source_id, count, "grade overrides saved");
            ok(&req.id, json!({ "sourceId": source_id, "saved": count }))
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_overrides_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match SqliteOverrideStore::new(conn).list(&source_id) {
        Ok(entries) => ok(&req.id, json!({ "sourceId": source_id, "overrides": entries })),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

fn handle_overrides_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(student_id) = optional_str(req, "studentId") else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    match SqliteOverrideStore::new(conn).clear(&source_id, &student_id) {
        Ok(removed) => ok(&req.id, json!({ "removed": removed })),
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "overrides.upsert" => Some(handle_overrides_upsert(state, req)),
        "overrides.list" => Some(handle_overrides_list(state, req)),
        "overrides.clear" => Some(handle_overrides_clear(state, req)),
        _ => None,
    }
}
