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
    let exe = env!("CARGO_BIN_EXE_siapd");
    let mut child = Command::new(exe)
        .env_remove("SIAPD_WORKSPACE")
        .env_remove("SIAPD_BOOTSTRAP_ADMIN_PASSWORD")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn siapd");
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
    assert!(!line.trim().is_empty(), "empty response");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn succeeded(result: &serde_json::Value) -> bool {
    result.get("success").and_then(|v| v.as_bool()).unwrap_or(false)
}

fn errors(result: &serde_json::Value) -> Vec<String> {
    result
        .get("errors")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|e| e.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn open_as_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> String {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "username": "admin", "password": "admin123" }),
    );
    login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("admin token")
        .to_string()
}

#[test]
fn class_delete_is_refused_while_students_remain() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = open_as_admin(&mut stdin, &mut reader, "siapd-class-guard");

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "classes.create",
        json!({ "token": token, "class_name": "8B" }),
    );
    let class_id = class.get("id").and_then(|v| v.as_i64()).expect("class id");
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "token": token, "nis": "8B001", "full_name": "Ani", "gender": "P", "class_id": class_id }),
    );
    let student_id = student.get("id").and_then(|v| v.as_i64()).expect("student id");

    let refused = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.delete",
        json!({ "token": token, "id": class_id }),
    );
    assert!(!succeeded(&refused));
    assert!(
        refused["message"].as_str().unwrap_or("").contains("students"),
        "{refused}"
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.delete",
        json!({ "token": token, "id": student_id }),
    );
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.delete",
        json!({ "token": token, "id": class_id }),
    );
    assert!(succeeded(&deleted), "{deleted}");
}

#[test]
fn profile_validation_reports_every_problem() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = open_as_admin(&mut stdin, &mut reader, "siapd-validation");

    let short = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.create",
        json!({ "token": token, "username": "ab", "password": "123", "role": "admin" }),
    );
    assert!(!succeeded(&short));
    let problems = errors(&short);
    assert!(
        problems.iter().any(|e| e == "Username must be at least 3 characters."),
        "{problems:?}"
    );
    assert!(problems.len() >= 2, "{problems:?}");

    let taken = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "token": token, "username": "admin", "password": "secret99", "role": "admin" }),
    );
    assert!(!succeeded(&taken));
    assert!(errors(&taken).iter().any(|e| e == "Username is already in use."));

    let bad_role = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "token": token, "username": "kepala", "password": "secret99", "role": "root" }),
    );
    assert!(!succeeded(&bad_role));

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({ "token": token, "class_name": "9C" }),
    );
    let class_id = class["id"].as_i64().expect("class id");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.create",
        json!({ "token": token, "nis": "9C001", "full_name": "Rina", "gender": "P", "class_id": class_id }),
    );
    let dup_nis = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "token": token, "nis": "9C001", "full_name": "Rani", "gender": "X", "class_id": class_id, "birth_date": "2999-01-01" }),
    );
    assert!(!succeeded(&dup_nis));
    let problems = errors(&dup_nis);
    assert!(problems.iter().any(|e| e == "NIS is already in use."), "{problems:?}");
    assert!(problems.iter().any(|e| e == "Gender must be L or P."), "{problems:?}");
    assert_eq!(problems.len(), 3, "{problems:?}");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "teachers.create",
        json!({ "token": token, "nip": "1975", "full_name": "Sri", "username": "sri", "password": "guru123" }),
    );
    let dup_nip = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "teachers.create",
        json!({ "token": token, "nip": "1975", "full_name": "Sri Dua", "username": "sri2", "password": "guru123", "email": "not-an-email" }),
    );
    assert!(!succeeded(&dup_nip));
    let problems = errors(&dup_nip);
    assert!(problems.iter().any(|e| e == "NIP is already in use."), "{problems:?}");
    assert!(problems.iter().any(|e| e == "Email address is not valid."), "{problems:?}");

    // The refused teacher must not leave a login behind.
    let users = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "records.query",
        json!({ "token": token, "table": "users", "filter": ["username,eq,sri2"] }),
    );
    assert_eq!(users["count"].as_i64(), Some(0));
}

#[test]
fn teacher_delete_removes_login_and_open_sessions() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = open_as_admin(&mut stdin, &mut reader, "siapd-teacher-delete");

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "teachers.create",
        json!({ "token": token, "nip": "1980", "full_name": "Agus", "username": "agus", "password": "guru123" }),
    );
    assert!(succeeded(&teacher), "{teacher}");
    let teacher_id = teacher["id"].as_i64().expect("teacher id");

    let guru = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "agus", "password": "guru123" }),
    );
    assert_eq!(guru["role"].as_str(), Some("guru"));
    let guru_token = guru["token"].as_str().expect("guru token").to_string();

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "token": token, "class_name": "7C", "homeroom_teacher_id": teacher_id }),
    );
    let class_id = class["id"].as_i64().expect("class id");

    let blocked = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.delete",
        json!({ "token": token, "id": teacher_id }),
    );
    assert!(!succeeded(&blocked));
    assert!(blocked["message"].as_str().unwrap_or("").contains("homeroom"), "{blocked}");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.update",
        json!({ "token": token, "id": class_id, "class_name": "7C" }),
    );
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.delete",
        json!({ "token": token, "id": teacher_id }),
    );
    assert!(succeeded(&deleted), "{deleted}");

    let stale = request(
        &mut stdin,
        &mut reader,
        "7",
        "teacher.overview",
        json!({ "token": guru_token }),
    );
    assert_eq!(stale.pointer("/error/code").and_then(|v| v.as_str()), Some("unauthorized"));

    let relogin = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "auth.login",
        json!({ "username": "agus", "password": "guru123" }),
    );
    assert!(!succeeded(&relogin));
}

#[test]
fn admin_cannot_delete_self_but_can_delete_another_admin() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = open_as_admin(&mut stdin, &mut reader, "siapd-user-delete");

    let who = request_ok(&mut stdin, &mut reader, "1", "auth.whoami", json!({ "token": token }));
    let my_id = who["userId"].as_i64().expect("user id");
    let refused = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.delete",
        json!({ "token": token, "id": my_id }),
    );
    assert!(!succeeded(&refused));

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.create",
        json!({ "token": token, "username": "wakasek", "password": "secret99", "role": "admin", "full_name": "Wakil Kepala" }),
    );
    assert!(succeeded(&other), "{other}");
    let other_login = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "username": "wakasek", "password": "secret99" }),
    );
    assert!(succeeded(&other_login), "{other_login}");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.delete",
        json!({ "token": token, "id": other["id"] }),
    );
    assert!(succeeded(&deleted), "{deleted}");
}
