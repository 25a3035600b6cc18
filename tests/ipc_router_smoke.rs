use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradebook-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "sources.add",
        json!({ "id": "s1", "sheetId": "sheet-1", "tabName": "Tab1" }),
    );
    let _ = request(&mut stdin, &mut reader, "4", "sources.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "sources.importRows",
        json!({ "sourceId": "s1", "values": [["Roll", "Name", "Quiz"], ["R1", "Alice", "10"]] }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "grades.statistics",
        json!({ "sourceId": "s1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "grades.compute",
        json!({ "sourceId": "s1", "config": { "method": "manual" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "grades.config.get",
        json!({ "sourceId": "s1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "grades.config.set",
        json!({ "sourceId": "s1", "config": { "method": "automatic" } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "students.marks",
        json!({ "sourceId": "s1", "rollNo": "r1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "overrides.upsert",
        json!({ "sourceId": "s1", "studentId": "R1", "grade": "B" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "overrides.list",
        json!({ "sourceId": "s1" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "overrides.clear",
        json!({ "sourceId": "s1", "studentId": "R1" }),
    );
    let _ = request(&mut stdin, &mut reader, "14", "sources.refresh", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "sources.remove",
        json!({ "id": "s1" }),
    );

    let unknown = {
        let payload = json!({ "id": "16", "method": "nope.method", "params": {} });
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read");
        serde_json::from_str::<serde_json::Value>(line.trim()).expect("json")
    };
    assert_eq!(unknown["ok"], json!(false));
    assert_eq!(unknown["error"]["code"], json!("not_implemented"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bad_json_lines_get_an_error_without_id() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(value["error"]["code"], json!("bad_json"));

    // The sidecar keeps serving after a bad line.
    let resp = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(resp["ok"], json!(true));
    assert_eq!(resp["result"]["dbConnected"], json!(false));

    drop(stdin);
    let _ = child.wait();
}
