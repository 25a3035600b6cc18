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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn setup_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "add",
        "sources.add",
        json!({ "id": "s1", "sheetId": "sheet-1", "tabName": "Scores" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "import",
        "sources.importRows",
        json!({
            "sourceId": "s1",
            "values": [
                ["Roll", "Name", "Quiz", "Mid"],
                ["R1", "Alice", "10", "20"],
                ["R2", "Bob", "5", "15"],
                ["R3", "Carol", "2", "3"],
            ]
        }),
    );
}

fn grades_by_name(result: &serde_json::Value) -> Vec<(String, String)> {
    result["students"]
        .as_array()
        .expect("students")
        .iter()
        .map(|s| {
            (
                s["name"].as_str().unwrap_or_default().to_string(),
                s["grade"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn pairs(v: &[(&str, &str)]) -> Vec<(String, String)> {
    v.iter()
        .map(|(a, b)| (a.to_string(), b.to_string()))
        .collect()
}

#[test]
fn automatic_is_the_default_policy() {
    let workspace = temp_dir("gradebook-policy-auto");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.compute",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(res["method"], json!("automatic"));
    assert_eq!(
        grades_by_name(&res),
        pairs(&[("Alice", "A+"), ("Bob", "A"), ("Carol", "F")])
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn percentage_based_policy_uses_configured_floors() {
    let workspace = temp_dir("gradebook-policy-percentage");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.compute",
        json!({
            "sourceId": "s1",
            "config": { "method": "percentage-based", "ranges": { "a": 50, "B": 30 } }
        }),
    );
    assert_eq!(res["method"], json!("percentage-based"));
    // 30/55, 20/55 and 5/55 of the points.
    assert_eq!(
        grades_by_name(&res),
        pairs(&[("Alice", "A"), ("Bob", "B"), ("Carol", "F")])
    );
    assert_eq!(res["statistics"]["gradeDistribution"]["B"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_limits_fill_the_ladder_then_fall_to_f() {
    let workspace = temp_dir("gradebook-policy-limits");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.compute",
        json!({
            "sourceId": "s1",
            "config": { "method": "class-limits", "limits": { "A+": 1, "A": 1 } }
        }),
    );
    assert_eq!(
        grades_by_name(&res),
        pairs(&[("Alice", "A+"), ("Bob", "A"), ("Carol", "F")])
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn manual_policy_prefers_overrides_and_falls_back() {
    let workspace = temp_dir("gradebook-policy-manual");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "overrides.upsert",
        json!({ "sourceId": "s1", "studentId": "r3", "grade": "b-" }),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.compute",
        json!({ "sourceId": "s1", "config": { "method": "manual" } }),
    );
    assert_eq!(
        grades_by_name(&res),
        pairs(&[("Alice", "A+"), ("Bob", "A"), ("Carol", "B-")])
    );
    assert_eq!(res["statistics"]["gradeDistribution"]["B-"], json!(1));
    assert_eq!(res["statistics"]["gradeDistribution"]["F"], json!(0));

    // Other methods ignore stored overrides.
    let auto = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.statistics",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(auto["students"][2]["grade"], json!("F"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn saved_config_is_used_when_compute_has_none() {
    let workspace = temp_dir("gradebook-policy-saved");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "grades.config.get",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(before["saved"], json!(false));
    assert_eq!(before["config"]["method"], json!("automatic"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.config.set",
        json!({
            "sourceId": "s1",
            "config": { "method": "percentage", "ranges": { "A": 50 } }
        }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.config.get",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(after["saved"], json!(true));
    assert_eq!(after["config"]["method"], json!("percentage-based"));
    assert_eq!(after["config"]["ranges"]["A"], json!(50.0));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.compute",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(res["method"], json!("percentage-based"));
    assert_eq!(
        grades_by_name(&res),
        pairs(&[("Alice", "A"), ("Bob", "F"), ("Carol", "F")])
    );

    // grades.statistics always uses the automatic policy.
    let stats = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.statistics",
        json!({ "sourceId": "s1" }),
    );
    assert_eq!(stats["method"], json!("automatic"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn invalid_configs_are_rejected() {
    let workspace = temp_dir("gradebook-policy-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    setup_class(&mut stdin, &mut reader, &workspace);

    let unknown_grade = request(
        &mut stdin,
        &mut reader,
        "1",
        "grades.compute",
        json!({
            "sourceId": "s1",
            "config": { "method": "percentage-based", "ranges": { "Q": 10 } }
        }),
    );
    assert_eq!(unknown_grade["ok"], json!(false));
    assert_eq!(unknown_grade["error"]["code"], json!("bad_params"));

    let unknown_method = request(
        &mut stdin,
        &mut reader,
        "2",
        "grades.config.set",
        json!({ "sourceId": "s1", "config": { "method": "curve" } }),
    );
    assert_eq!(unknown_method["error"]["code"], json!("bad_params"));

    let missing_source = request(
        &mut stdin,
        &mut reader,
        "3",
        "grades.config.set",
        json!({ "sourceId": "nope", "config": { "method": "manual" } }),
    );
    assert_eq!(missing_source["error"]["code"], json!("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
