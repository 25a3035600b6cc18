use crate::db;
use crate::error::ReportError;
use crate::grading::GradingConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, flag, required_str};
use crate::ipc::types::{AppState, Request, SourceStatus};
use crate::overrides::SqliteOverrideStore;
use crate::report::{self, GradeReport};
use crate::source::{source_exists, CachedRowSource, SqliteRowSource};
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;

fn parse_config(req: &Request, raw: &serde_json::Value) -> Result<GradingConfig, serde_json::Value> {
    let cfg: GradingConfig = serde_json::from_value(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid config: {}", e),
            None,
        )
    })?;
    cfg.validated()
        .map_err(|e| err(&req.id, "bad_params", e.to_string(), None))
}

fn saved_config(conn: &Connection, source_id: &str) -> anyhow::Result<Option<GradingConfig>> {
    match db::settings_get_json(conn, &db::grading_config_key(source_id))? {
        Some(v) => Ok(Some(serde_json::from_value(v)?)),
        None => Ok(None),
    }
}

/// Runs one grading pass and records the fetch outcome for the source.
/// Without a config the pass is the default statistics view.
fn run_report(
    state: &mut AppState,
    req: &Request,
    source_id: &str,
    config: Option<&GradingConfig>,
) -> Result<GradeReport, serde_json::Value> {
    if flag(req, "refresh") {
        state.row_cache.invalidate(source_id);
    }
    let conn = db_conn(state, req)?;
    let rows = CachedRowSource::new(SqliteRowSource::new(conn), &state.row_cache);
    let store = SqliteOverrideStore::new(conn);
    let result = match config {
        Some(cfg) => report::compute_grades(&rows, &store, source_id, cfg),
        None => report::compute_statistics(&rows, &store, source_id),
    };

    match result {
        Ok(r) => {
            state
                .source_status
                .insert(source_id.to_string(), SourceStatus::connected(r.students.len()));
            Ok(r)
        }
        Err(e) => {
            warn!(source_id, error = %e, "grading pass failed");
            if let ReportError::Source(src) = &e {
                state
                    .source_status
                    .insert(source_id.to_string(), SourceStatus::failed(src.to_string()));
            }
            Err(err(&req.id, e.code(), e.to_string(), Some(json!({ "sourceId": source_id }))))
        }
    }
}

fn report_response(req: &Request, report: &GradeReport) -> serde_json::Value {
    match serde_json::to_value(report) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "serialize_failed", e.to_string(), None),
    }
}

fn handle_grades_statistics(state: &mut AppState, req: &Request) -> serde_json::Value {
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match run_report(state, req, &source_id, None) {
        Ok(r) => report_response(req, &r),
        Err(e) => e,
    }
}

fn handle_grades_compute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let config = match req.params.get("config") {
        Some(raw) if !raw.is_null() => match parse_config(req, raw) {
            Ok(c) => c,
            Err(e) => return e,
        },
        _ => {
            let conn = match db_conn(state, req) {
                Ok(c) => c,
                Err(e) => return e,
            };
            match saved_config(conn, &source_id) {
                Ok(c) => c.unwrap_or_default(),
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            }
        }
    };
    match run_report(state, req, &source_id, Some(&config)) {
        Ok(r) => report_response(req, &r),
        Err(e) => e,
    }
}

fn handle_grades_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match saved_config(conn, &source_id) {
        Ok(c) => ok(
            &req.id,
            json!({
                "sourceId": source_id,
                "saved": c.is_some(),
                "config": c.unwrap_or_default(),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_config_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(raw) = req.params.get("config") else {
        return err(&req.id, "bad_params", "missing config", None);
    };
    let config = match parse_config(req, raw) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match source_exists(conn, &source_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "source not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let value = json!(config);
    if let Err(e) = db::settings_set_json(conn, &db::grading_config_key(&source_id), &value) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "sourceId": source_id, "config": value }))
}

fn handle_students_marks(state: &mut AppState, req: &Request) -> serde_json::Value {
    let source_id = match required_str(req, "sourceId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let roll_no = match required_str(req, "rollNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report = match run_report(state, req, &source_id, None) {
        Ok(r) => r,
        Err(e) => return e,
    };
    match report.find_by_roll_no(&roll_no) {
        Some(student) => ok(
            &req.id,
            json!({
                "sourceId": source_id,
                "student": student,
                "totalStudents": report.statistics.total_students,
            }),
        ),
        None => err(
            &req.id,
            "not_found",
            "student data not found",
            Some(json!({ "rollNo": roll_no })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.statistics" => Some(handle_grades_statistics(state, req)),
        "grades.compute" => Some(handle_grades_compute(state, req)),
        "grades.config.get" => Some(handle_grades_config_get(state, req)),
        "grades.config.set" => Some(handle_grades_config_set(state, req)),
        "students.marks" => Some(handle_students_marks(state, req)),
        _ => None,
    }
}
