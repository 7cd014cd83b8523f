use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

fn seed_users(workspace: &Path) {
    let conn = rusqlite::Connection::open(workspace.join("reportcard.sqlite3")).expect("open db");
    conn.execute_batch(
        "INSERT INTO users(id, name, email, role, assigned_department, assigned_class, assigned_subjects_json)
         VALUES('t1', 'Ama Mensah', 'ama@example.org', 'teacher', 'Primary', 'Primary 4', '[\"English\",\"Science\",\"Maths\"]');
         INSERT INTO users(id, name, email, role, assigned_department, assigned_class, assigned_subjects_json)
         VALUES('t2', 'Yaw Darko', 'yaw@example.org', 'teacher', 'Primary', 'Primary 5', '[\"English\"]');
         INSERT INTO users(id, name, email, role, assigned_department, assigned_class, assigned_subjects_json)
         VALUES('a1', 'Head Teacher', 'head@example.org', 'admin', NULL, NULL, '[]');",
    )
    .expect("seed users");
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("reportcard-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json reply");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse reply");
    assert_eq!(bad["error"]["code"], "bad_json");

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());
    assert_eq!(
        request_err_code(&mut stdin, &mut reader, "2", "students.list", json!({})),
        "no_workspace"
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_users(&workspace);
    assert_eq!(
        request_err_code(&mut stdin, &mut reader, "4", "students.list", json!({})),
        "no_session"
    );
    assert_eq!(
        request_err_code(
            &mut stdin,
            &mut reader,
            "5",
            "session.begin",
            json!({ "userId": "ghost" })
        ),
        "not_found"
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "session.begin",
        json!({ "userId": "t1" }),
    );

    let methods = [
        ("session.selectTerm", json!({ "term": "Term 1" })),
        ("setup.get", json!({})),
        ("setup.update", json!({ "section": "reports", "patch": { "showGeneratedAt": false } })),
        ("students.list", json!({})),
        ("students.create", json!({ "name": "Smoke Student" })),
        ("students.delete", json!({ "studentId": "missing" })),
        ("scores.open", json!({ "studentId": "missing" })),
        ("scores.save", json!({ "studentId": "missing", "subjects": [] })),
        ("classTerm.get", json!({})),
        ("classTerm.save", json!({ "records": { "numberOnRoll": "30" } })),
        ("records.termTable", json!({})),
        ("reports.reportCard", json!({ "studentId": "missing" })),
        ("teachers.list", json!({})),
        ("signature.upload", json!({ "dataUrl": "data:image/png;base64,AAAA" })),
        ("blobs.get", json!({ "reference": "blob:sha256:missing" })),
        ("session.end", json!({})),
    ];
    for (i, (method, params)) in methods.iter().enumerate() {
        let id = format!("m{}", i);
        let value = request(&mut stdin, &mut reader, &id, method, params.clone());
        if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            assert_ne!(
                value["error"]["code"], "not_implemented",
                "unexpected unknown method for {}",
                method
            );
        }
    }

    assert_eq!(
        request_err_code(&mut stdin, &mut reader, "7", "grades.explode", json!({})),
        "not_implemented"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn selecting_a_workspace_ends_the_session() {
    let workspace = temp_dir("reportcard-router-reset");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let path = workspace.to_string_lossy().to_string();

    request_ok(&mut stdin, &mut reader, "1", "workspace.select", json!({ "path": path }));
    seed_users(&workspace);
    request_ok(&mut stdin, &mut reader, "2", "session.begin", json!({ "userId": "t1" }));
    request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    request_ok(&mut stdin, &mut reader, "4", "workspace.select", json!({ "path": path }));
    assert_eq!(
        request_err_code(&mut stdin, &mut reader, "5", "students.list", json!({})),
        "no_session"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
