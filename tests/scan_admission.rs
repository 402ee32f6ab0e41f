use serde_json::{json, Value};
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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
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
    let value: Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
        .to_string()
}

fn boot(prefix: &str) -> (Child, ChildStdin, BufReader<ChildStdout>, String) {
    let workspace = temp_dir(prefix);
    let (child, mut stdin, mut reader) = spawn_daemon();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let token = request_ok(
        &mut stdin,
        &mut reader,
        "login",
        "auth.login",
        json!({ "credential": "1234" }),
    )
    .get("authToken")
    .and_then(|v| v.as_str())
    .expect("auth token")
    .to_string();
    (child, stdin, reader, token)
}

fn start_session(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    token: &str,
    minutes: i64,
) -> String {
    request_ok(
        stdin,
        reader,
        "start",
        "session.start",
        json!({
            "authToken": token,
            "title": "Algebra I",
            "timeSlot": "P1",
            "teacherId": "missing-teacher",
            "subjectId": "missing-subject",
            "durationMinutes": minutes,
        }),
    )
    .get("code")
    .and_then(|v| v.as_str())
    .expect("session code")
    .to_string()
}

fn scan(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    code: &str,
    student_id: &str,
    ip: &str,
    ua: &str,
) -> Value {
    request(
        stdin,
        reader,
        "scan",
        "scan.submit",
        json!({
            "code": code,
            "studentId": student_id,
            "clientIp": ip,
            "userAgent": ua,
        }),
    )
}

fn error_code(resp: &Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
}

#[test]
fn scan_dedups_per_student_and_per_device() {
    let (_child, mut stdin, mut reader, token) = boot("attendanced-scan-matrix");
    let code = start_session(&mut stdin, &mut reader, &token, 120);

    let first = scan(&mut stdin, &mut reader, &code, "S001", "10.0.0.1", "ua-a");
    assert_eq!(first.get("ok").and_then(|v| v.as_bool()), Some(true));
    let record = first
        .get("result")
        .and_then(|r| r.get("record"))
        .expect("record");
    assert_eq!(record.get("studentId").and_then(|v| v.as_str()), Some("S001"));
    assert_eq!(record.get("fullName").and_then(|v| v.as_str()), Some("S001"));

    // Same student from a different device.
    let second = scan(&mut stdin, &mut reader, &code, "S001", "10.0.0.2", "ua-b");
    assert_eq!(error_code(&second), "duplicate_scan");

    // Different student from the first device.
    let third = scan(&mut stdin, &mut reader, &code, "S002", "10.0.0.1", "ua-a");
    assert_eq!(error_code(&third), "duplicate_scan");
    // Same uniform message for both duplicate paths.
    assert_eq!(
        second.get("error").and_then(|e| e.get("message")),
        third.get("error").and_then(|e| e.get("message")),
    );

    let records = request_ok(
        &mut stdin,
        &mut reader,
        "records",
        "session.records",
        json!({ "authToken": token, "code": code }),
    );
    assert_eq!(records.get("count").and_then(|v| v.as_i64()), Some(1));
    let first_row = records
        .get("records")
        .and_then(|r| r.as_array())
        .and_then(|r| r.first())
        .expect("one record");
    assert_eq!(
        first_row.get("studentId").and_then(|v| v.as_str()),
        Some("S001")
    );
}

#[test]
fn blank_identifier_and_unknown_code_are_rejected() {
    let (_child, mut stdin, mut reader, token) = boot("attendanced-scan-reject");
    let code = start_session(&mut stdin, &mut reader, &token, 120);

    let blank = scan(&mut stdin, &mut reader, &code, "   ", "10.0.0.1", "ua-a");
    assert_eq!(error_code(&blank), "missing_identifier");

    let records = request_ok(
        &mut stdin,
        &mut reader,
        "records",
        "session.records",
        json!({ "authToken": token, "code": code }),
    );
    assert_eq!(records.get("count").and_then(|v| v.as_i64()), Some(0));

    let missing = scan(&mut stdin, &mut reader, "nope", "S001", "10.0.0.1", "ua-a");
    assert_eq!(error_code(&missing), "session_not_found");
}

#[test]
fn stopped_session_rejects_scans() {
    let (_child, mut stdin, mut reader, token) = boot("attendanced-scan-stopped");
    let code = start_session(&mut stdin, &mut reader, &token, 120);
    request_ok(
        &mut stdin,
        &mut reader,
        "stop",
        "session.stop",
        json!({ "authToken": token, "code": code }),
    );
    let resp = scan(&mut stdin, &mut reader, &code, "S001", "10.0.0.1", "ua-a");
    assert_eq!(error_code(&resp), "session_closed");
}

#[test]
fn require_registered_policy_blocks_self_registration() {
    let (_child, mut stdin, mut reader, token) = boot("attendanced-scan-policy");
    let code = start_session(&mut stdin, &mut reader, &token, 120);

    let values = request_ok(
        &mut stdin,
        &mut reader,
        "setup",
        "setup.update",
        json!({
            "authToken": token,
            "section": "scan",
            "values": { "requireRegistered": true },
        }),
    );
    assert_eq!(
        values
            .get("values")
            .and_then(|v| v.get("requireRegistered"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    let rejected = scan(&mut stdin, &mut reader, &code, "S010", "10.0.0.1", "ua-a");
    assert_eq!(error_code(&rejected), "unknown_student");

    request_ok(
        &mut stdin,
        &mut reader,
        "create",
        "students.create",
        json!({ "authToken": token, "studentId": "S010", "fullName": "Student 010" }),
    );
    let accepted = scan(&mut stdin, &mut reader, &code, "S010", "10.0.0.1", "ua-a");
    assert_eq!(accepted.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        accepted
            .get("result")
            .and_then(|r| r.get("record"))
            .and_then(|r| r.get("fullName"))
            .and_then(|v| v.as_str()),
        Some("Student 010")
    );

    // Self-registration comes back once the policy is reset.
    request_ok(
        &mut stdin,
        &mut reader,
        "reset",
        "setup.update",
        json!({
            "authToken": token,
            "section": "scan",
            "values": { "requireRegistered": false },
        }),
    );
    let lazy = scan(&mut stdin, &mut reader, &code, "S011", "10.0.0.2", "ua-b");
    assert_eq!(lazy.get("ok").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn scan_context_lists_active_roster() {
    let (_child, mut stdin, mut reader, token) = boot("attendanced-scan-context");
    let code = start_session(&mut stdin, &mut reader, &token, 120);
    for (sid, name) in [("S002", "Bea"), ("S001", "Ana"), ("S003", "Cal")] {
        request_ok(
            &mut stdin,
            &mut reader,
            "create",
            "students.create",
            json!({ "authToken": token, "studentId": sid, "fullName": name }),
        );
    }
    request_ok(
        &mut stdin,
        &mut reader,
        "toggle",
        "students.toggleActive",
        json!({ "authToken": token, "studentId": "S003" }),
    );

    let ctx = request_ok(
        &mut stdin,
        &mut reader,
        "ctx",
        "scan.context",
        json!({ "code": code }),
    );
    assert_eq!(
        ctx.get("session")
            .and_then(|s| s.get("isOpen"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );
    let names: Vec<&str> = ctx
        .get("students")
        .and_then(|s| s.as_array())
        .expect("students")
        .iter()
        .filter_map(|s| s.get("fullName").and_then(|v| v.as_str()))
        .collect();
    // Sorted by name, inactive S003 filtered out.
    assert_eq!(names, vec!["Ana", "Bea"]);

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "ctx2",
        "scan.context",
        json!({ "code": "nope" }),
    );
    assert_eq!(missing, "session_not_found");
}
