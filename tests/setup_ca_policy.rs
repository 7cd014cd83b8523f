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
    let exe = env!("CARGO_BIN_EXE_reportcardd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn reportcardd");
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
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn seed_teacher(workspace: &std::path::Path) {
    let conn = rusqlite::Connection::open(workspace.join("reportcard.sqlite3")).expect("open db");
    conn.execute(
        "INSERT INTO users(id, name, email, role, assigned_department, assigned_class, assigned_subjects_json)
         VALUES('t1', 'Ama Mensah', 'ama@example.org', 'teacher', 'Primary', 'Primary 4', '[\"English\"]')",
        [],
    )
    .expect("seed teacher");
}

#[test]
fn setup_defaults_and_validation() {
    let workspace = temp_dir("reportcard-setup-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    assert_eq!(
        request_err_code(&mut stdin, &mut reader, "1", "setup.get", json!({})),
        "no_workspace"
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(setup["calc"]["caPolicy"], "normalized");
    assert_eq!(setup["reports"]["missingValueText"], "N/A");
    assert_eq!(setup["reports"]["showGeneratedAt"], true);

    let bad = [
        json!({ "section": "calc", "patch": { "caPolicy": "generous" } }),
        json!({ "section": "calc", "patch": { "rounding": "down" } }),
        json!({ "section": "reports", "patch": { "showGeneratedAt": "yes" } }),
        json!({ "section": "grading", "patch": {} }),
        json!({ "section": "calc", "patch": "legacyCapped" }),
    ];
    for (i, params) in bad.iter().enumerate() {
        assert_eq!(
            request_err_code(&mut stdin, &mut reader, &format!("b{}", i), "setup.update", params.clone()),
            "bad_params",
            "case {}",
            i
        );
    }
    let unchanged = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(unchanged["calc"]["caPolicy"], "normalized");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn legacy_capped_policy_applies_to_new_saves_only() {
    let workspace = temp_dir("reportcard-setup-ca-policy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_teacher(&workspace);
    request_ok(&mut stdin, &mut reader, "2", "session.begin", json!({ "userId": "t1" }));
    request_ok(&mut stdin, &mut reader, "3", "session.selectTerm", json!({ "term": "Term 1" }));
    let created = request_ok(&mut stdin, &mut reader, "4", "students.create", json!({ "name": "Abena" }));
    let sid = created["student"]["id"].as_str().expect("id").to_string();

    // quiz 4/20: normalized 4/20*10 = 2, legacy 4/20*50 = 10.
    let payload = json!({ "studentId": sid, "subjects": [{ "subject": "English", "quiz": 4 }] });
    let normalized = request_ok(&mut stdin, &mut reader, "5", "scores.save", payload.clone());
    assert_eq!(normalized["record"]["subjects"][0]["ca"], 2);

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "calc", "patch": { "caPolicy": "legacyCapped" } }),
    );
    let card_before = request_ok(&mut stdin, &mut reader, "7", "reports.reportCard", json!({ "studentId": sid }));
    assert_eq!(card_before["rows"][0]["ca"], 2);

    let legacy = request_ok(&mut stdin, &mut reader, "8", "scores.save", payload);
    assert_eq!(legacy["record"]["subjects"][0]["ca"], 10);

    // Full components under the legacy formula are capped at 50.
    let capped = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "scores.save",
        json!({
            "studentId": sid,
            "subjects": [{ "subject": "English", "quiz": 20, "test1": 10, "test2": 10, "test3": 10, "project": 30 }]
        }),
    );
    assert_eq!(capped["record"]["subjects"][0]["ca"], 50);
    assert_eq!(capped["record"]["totalScore"], 50);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
