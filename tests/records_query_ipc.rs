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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value.pointer("/error/code").and_then(|v| v.as_str())
}

fn names(result: &serde_json::Value) -> Vec<String> {
    result["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["full_name"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn admin_queries_filter_order_and_never_leak_passwords() {
    let workspace = temp_dir("siapd-records-admin");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "admin", "password": "admin123" }),
    );
    let admin = login["token"].as_str().expect("token").to_string();

    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "token": admin, "class_name": "7A" }),
    );
    for (n, name) in ["Citra", "Adi", "Bayu"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{n}"),
            "students.create",
            json!({ "token": admin, "nis": format!("N{n}"), "full_name": name, "gender": "L", "class_id": class["id"] }),
        );
    }

    let users = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "records.query",
        json!({ "token": admin, "table": "users" }),
    );
    assert_eq!(users["count"].as_i64(), Some(1));
    assert!(users["rows"][0].get("password").is_none());
    assert_eq!(users["rows"][0]["username"].as_str(), Some("admin"));

    let by_password = request(
        &mut stdin,
        &mut reader,
        "5",
        "records.query",
        json!({ "token": admin, "table": "users", "filter": "password,eq,x" }),
    );
    assert_eq!(error_code(&by_password), Some("bad_params"));

    let ordered = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "records.query",
        json!({ "token": admin, "table": "students", "order": "full_name" }),
    );
    assert_eq!(names(&ordered), ["Adi", "Bayu", "Citra"]);

    let limited = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "records.query",
        json!({ "token": admin, "table": "students", "order": "full_name,desc", "limit": 2 }),
    );
    assert_eq!(names(&limited), ["Citra", "Bayu"]);

    let contains = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "records.query",
        json!({ "token": admin, "table": "students", "filter": ["full_name,cs,ay"] }),
    );
    assert_eq!(names(&contains), ["Bayu"]);

    // A value may itself contain commas.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "subjects.create",
        json!({ "token": admin, "subject_name": "Art, Music" }),
    );
    let comma = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "records.query",
        json!({ "token": admin, "table": "subjects", "filter": ["subject_name,eq,Art, Music"] }),
    );
    assert_eq!(comma["count"].as_i64(), Some(1));

    let unknown_column = request(
        &mut stdin,
        &mut reader,
        "11",
        "records.query",
        json!({ "token": admin, "table": "students", "filter": ["nickname,eq,x"] }),
    );
    assert_eq!(error_code(&unknown_column), Some("bad_params"));

    let unknown_op = request(
        &mut stdin,
        &mut reader,
        "12",
        "records.query",
        json!({ "token": admin, "table": "students", "filter": ["nis,like,N%"] }),
    );
    assert_eq!(error_code(&unknown_op), Some("bad_params"));

    let unknown_table = request(
        &mut stdin,
        &mut reader,
        "13",
        "records.query",
        json!({ "token": admin, "table": "sqlite_master" }),
    );
    assert_eq!(error_code(&unknown_table), Some("bad_params"));

    let injected = request(
        &mut stdin,
        &mut reader,
        "14",
        "records.query",
        json!({ "token": admin, "table": "students", "order": "full_name; DROP TABLE students" }),
    );
    assert_eq!(error_code(&injected), Some("bad_params"));
}

#[test]
fn teacher_queries_stay_inside_assigned_classes() {
    let workspace = temp_dir("siapd-records-teacher");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "admin", "password": "admin123" }),
    );
    let admin = login["token"].as_str().expect("token").to_string();

    let class_a = request_ok(&mut stdin, &mut reader, "3", "classes.create", json!({ "token": admin, "class_name": "7A" }));
    let class_b = request_ok(&mut stdin, &mut reader, "4", "classes.create", json!({ "token": admin, "class_name": "7B" }));
    let math = request_ok(&mut stdin, &mut reader, "5", "subjects.create", json!({ "token": admin, "subject_name": "Math" }));
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "teachers.create",
        json!({ "token": admin, "nip": "1990", "full_name": "Dian", "username": "dian", "password": "guru123" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.create",
        json!({ "token": admin, "teacher_id": teacher["id"], "subject_id": math["id"], "class_id": class_a["id"] }),
    );
    let in_a = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "token": admin, "nis": "A1", "full_name": "Gita", "gender": "P", "class_id": class_a["id"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.create",
        json!({ "token": admin, "nis": "B1", "full_name": "Hadi", "gender": "L", "class_id": class_b["id"] }),
    );

    let guru_login = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "auth.login",
        json!({ "username": "dian", "password": "guru123" }),
    );
    let guru = guru_login["token"].as_str().expect("token").to_string();

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "records.query",
        json!({ "token": guru, "table": "students" }),
    );
    assert_eq!(names(&students), ["Gita"]);

    let other_class = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "records.query",
        json!({ "token": guru, "table": "students", "filter": [format!("class_id,eq,{}", class_b["id"])] }),
    );
    assert_eq!(other_class["count"].as_i64(), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "grades.saveBatch",
        json!({
            "token": guru,
            "grade_data": [{ "student_id": in_a["id"], "subject_id": math["id"], "score": 88, "assessment_type": "uas", "grade_date": "2024-11-01" }],
        }),
    );
    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "records.query",
        json!({ "token": guru, "table": "grades", "filter": [format!("class_id,eq,{}", class_a["id"])] }),
    );
    assert_eq!(grades["count"].as_i64(), Some(1));

    let users = request(
        &mut stdin,
        &mut reader,
        "15",
        "records.query",
        json!({ "token": guru, "table": "users" }),
    );
    assert_eq!(error_code(&users), Some("forbidden"));

    let overview = request_ok(&mut stdin, &mut reader, "16", "teacher.overview", json!({ "token": guru }));
    assert_eq!(overview["studentCount"].as_i64(), Some(1));
    assert_eq!(overview["assignments"][0]["subjectName"].as_str(), Some("Math"));
}
