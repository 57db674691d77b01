//! Batch upsert of attendance and grade rows keyed by their natural keys.
//!
//! A batch is decoded and validated row by row before anything is written.
//! Rows that fail validation or authorization are skipped with a numbered
//! message; the rest are inserted or updated inside one transaction.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::authz::{Denial, TeacherScope};
use crate::gateway::{self, Fields, Filter, GatewayError, Table};

pub const MAX_BATCH_ROWS: usize = 2000;
pub const DISPLAY_ERROR_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Attendance,
    Grade,
}

impl BatchKind {
    /// Form field carrying the encoded rows.
    pub fn payload_key(self) -> &'static str {
        match self {
            BatchKind::Attendance => "attendance_data",
            BatchKind::Grade => "grade_data",
        }
    }

    fn label(self) -> &'static str {
        match self {
            BatchKind::Attendance => "attendance",
            BatchKind::Grade => "grade",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Hadir,
    Sakit,
    Izin,
    Alpa,
}

impl AttendanceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hadir" => Some(Self::Hadir),
            "sakit" => Some(Self::Sakit),
            "izin" => Some(Self::Izin),
            "alpa" => Some(Self::Alpa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hadir => "hadir",
            Self::Sakit => "sakit",
            Self::Izin => "izin",
            Self::Alpa => "alpa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentType {
    Tugas,
    Uts,
    Uas,
}

impl AssessmentType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tugas" => Some(Self::Tugas),
            "uts" => Some(Self::Uts),
            "uas" => Some(Self::Uas),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tugas => "tugas",
            Self::Uts => "uts",
            Self::Uas => "uas",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttendanceRow {
    #[serde(default)]
    pub student_id: Option<Value>,
    #[serde(default)]
    pub subject_id: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default)]
    pub status: Option<Value>,
    #[serde(default)]
    pub notes: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawGradeRow {
    #[serde(default)]
    pub student_id: Option<Value>,
    #[serde(default)]
    pub subject_id: Option<Value>,
    #[serde(default)]
    pub score: Option<Value>,
    #[serde(default)]
    pub assessment_type: Option<Value>,
    #[serde(default)]
    pub grade_date: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum RawRow {
    Attendance(RawAttendanceRow),
    Grade(RawGradeRow),
}

impl RawRow {
    pub fn decode(kind: BatchKind, value: Value) -> Result<RawRow, String> {
        if !value.is_object() {
            return Err("row is not an object".to_string());
        }
        let row = match kind {
            BatchKind::Attendance => serde_json::from_value(value).map(RawRow::Attendance),
            BatchKind::Grade => serde_json::from_value(value).map(RawRow::Grade),
        };
        row.map_err(|e| format!("row could not be read: {e}"))
    }

    pub fn subject_id(&self) -> Option<i64> {
        let raw = match self {
            RawRow::Attendance(r) => r.subject_id.as_ref(),
            RawRow::Grade(r) => r.subject_id.as_ref(),
        };
        raw.and_then(positive_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendanceRow {
    pub student_id: i64,
    pub subject_id: i64,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeRow {
    pub student_id: i64,
    pub subject_id: i64,
    pub assessment_type: AssessmentType,
    pub score: f64,
    pub grade_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedRow {
    Attendance(AttendanceRow),
    Grade(GradeRow),
}

impl ValidatedRow {
    pub fn student_id(&self) -> i64 {
        match self {
            ValidatedRow::Attendance(r) => r.student_id,
            ValidatedRow::Grade(r) => r.student_id,
        }
    }

    pub fn subject_id(&self) -> i64 {
        match self {
            ValidatedRow::Attendance(r) => r.subject_id,
            ValidatedRow::Grade(r) => r.subject_id,
        }
    }
}

/// A skipped row, numbered from 1 in submission order.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Row {row}: {reason}")]
pub struct RowError {
    pub row: usize,
    pub reason: String,
}

impl RowError {
    fn new(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No {} data was submitted.", .0.label())]
    Empty(BatchKind),
    #[error("The {} data is not valid JSON.", .0.label())]
    Malformed(BatchKind),
    #[error("The {} data must be a non-empty list.", .0.label())]
    NotAList(BatchKind),
    #[error("Too many rows: {0} submitted, at most {max} per batch.", max = MAX_BATCH_ROWS)]
    TooLarge(usize),
    #[error("You do not have permission for this subject.")]
    SubjectNotAssigned,
    #[error("Database error: {0}")]
    Db(#[from] GatewayError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<RowError>,
}

impl BatchOutcome {
    fn skip(&mut self, error: RowError) {
        self.skipped += 1;
        self.errors.push(error);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} saved, {} updated, {} skipped.",
            self.inserted, self.updated, self.skipped
        )
    }

    /// The first few errors, then a count of the rest.
    pub fn display_errors(&self) -> Vec<String> {
        let mut shown: Vec<String> = self
            .errors
            .iter()
            .take(DISPLAY_ERROR_LIMIT)
            .map(ToString::to_string)
            .collect();
        if self.errors.len() > DISPLAY_ERROR_LIMIT {
            shown.push(format!(
                "... and {} more errors",
                self.errors.len() - DISPLAY_ERROR_LIMIT
            ));
        }
        shown
    }

    pub fn to_json(&self) -> Value {
        json!({
            "inserted": self.inserted,
            "updated": self.updated,
            "skipped": self.skipped,
            "errors": self.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "displayErrors": self.display_errors(),
        })
    }
}

/// Accepts JSON text or an already-decoded array.
pub fn decode_payload(kind: BatchKind, payload: &Value) -> Result<Vec<Value>, BatchError> {
    let decoded = match payload {
        Value::Null => return Err(BatchError::Empty(kind)),
        Value::String(text) if text.trim().is_empty() => return Err(BatchError::Empty(kind)),
        Value::String(text) => {
            serde_json::from_str::<Value>(text).map_err(|_| BatchError::Malformed(kind))?
        }
        other => other.clone(),
    };
    let Value::Array(items) = decoded else {
        return Err(BatchError::NotAList(kind));
    };
    if items.is_empty() {
        return Err(BatchError::NotAList(kind));
    }
    if items.len() > MAX_BATCH_ROWS {
        return Err(BatchError::TooLarge(items.len()));
    }
    Ok(items)
}

/// Whole numbers only; `3`, `3.0` and `"3.0"` all read as 3.
fn positive_id(v: &Value) -> Option<i64> {
    let id = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(whole))
        }
        _ => None,
    }?;
    (id > 0).then_some(id)
}

fn whole(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// `None` for absent, null or blank values.
fn text(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn ids(
    row: usize,
    student_id: Option<&Value>,
    subject_id: Option<&Value>,
) -> Result<(i64, i64), RowError> {
    let student_id = student_id
        .and_then(positive_id)
        .ok_or_else(|| RowError::new(row, "student_id is missing or not a number"))?;
    let subject_id = subject_id
        .and_then(positive_id)
        .ok_or_else(|| RowError::new(row, "subject_id is missing or not a number"))?;
    Ok((student_id, subject_id))
}

/// Checks one row's shape and values. No database access.
pub fn validate_row(raw: &RawRow, row: usize, today: NaiveDate) -> Result<ValidatedRow, RowError> {
    match raw {
        RawRow::Attendance(r) => {
            let (student_id, subject_id) = ids(row, r.student_id.as_ref(), r.subject_id.as_ref())?;
            let date = text(r.date.as_ref())
                .as_deref()
                .and_then(parse_date)
                .ok_or_else(|| RowError::new(row, "date is missing or not a valid YYYY-MM-DD date"))?;
            if date > today {
                return Err(RowError::new(row, format!("date {date} is in the future")));
            }
            let status = match text(r.status.as_ref()) {
                None => AttendanceStatus::Hadir,
                Some(s) => AttendanceStatus::parse(&s)
                    .ok_or_else(|| RowError::new(row, format!("invalid status `{s}`")))?,
            };
            Ok(ValidatedRow::Attendance(AttendanceRow {
                student_id,
                subject_id,
                date,
                status,
                notes: text(r.notes.as_ref()),
            }))
        }
        RawRow::Grade(r) => {
            let (student_id, subject_id) = ids(row, r.student_id.as_ref(), r.subject_id.as_ref())?;
            let score = r
                .score
                .as_ref()
                .and_then(number)
                .ok_or_else(|| RowError::new(row, "score is missing or not a number"))?;
            if !(0.0..=100.0).contains(&score) {
                return Err(RowError::new(row, format!("score {score} must be between 0 and 100")));
            }
            let assessment_type = match text(r.assessment_type.as_ref()) {
                None => AssessmentType::Tugas,
                Some(s) => AssessmentType::parse(&s)
                    .ok_or_else(|| RowError::new(row, format!("invalid assessment_type `{s}`")))?,
            };
            let grade_date = match text(r.grade_date.as_ref()) {
                None => today,
                Some(s) => parse_date(&s)
                    .ok_or_else(|| RowError::new(row, format!("invalid grade_date `{s}`")))?,
            };
            Ok(ValidatedRow::Grade(GradeRow {
                student_id,
                subject_id,
                assessment_type,
                score,
                grade_date,
            }))
        }
    }
}

enum Written {
    Inserted,
    Updated,
}

fn upsert(
    conn: &Connection,
    table: Table,
    key: Vec<(&str, rusqlite::types::Value)>,
    mutable: Fields,
) -> Result<Written, GatewayError> {
    let filter = key
        .iter()
        .fold(Filter::new(), |f, (col, v)| f.eq(col, v.clone()));
    if gateway::exists(conn, table, &filter)? {
        gateway::update(conn, table, &mutable, &filter)?;
        return Ok(Written::Updated);
    }
    let mut fields = key;
    fields.extend(mutable.iter().cloned());
    match gateway::insert(conn, table, &fields) {
        Ok(_) => Ok(Written::Inserted),
        // Lost a race on the natural key.
        Err(e) if e.is_constraint() => match gateway::update(conn, table, &mutable, &filter)? {
            1 => Ok(Written::Updated),
            _ => Err(e),
        },
        Err(e) => Err(e),
    }
}

fn commit_row(conn: &Connection, row: &ValidatedRow, class_id: Option<i64>) -> Result<Written, GatewayError> {
    match row {
        ValidatedRow::Attendance(r) => upsert(
            conn,
            Table::Attendances,
            vec![
                ("student_id", r.student_id.into()),
                ("subject_id", r.subject_id.into()),
                ("date", r.date.to_string().into()),
            ],
            vec![
                ("status", r.status.as_str().to_string().into()),
                ("notes", r.notes.clone().into()),
                ("class_id", class_id.into()),
            ],
        ),
        ValidatedRow::Grade(r) => upsert(
            conn,
            Table::Grades,
            vec![
                ("student_id", r.student_id.into()),
                ("subject_id", r.subject_id.into()),
                ("assessment_type", r.assessment_type.as_str().to_string().into()),
                ("grade_date", r.grade_date.to_string().into()),
            ],
            vec![("score", r.score.into())],
        ),
    }
}

fn skip_reason(denial: &Denial) -> &'static str {
    match denial {
        Denial::Subject => "subject not assigned to you",
        Denial::StudentNotFound => "student not found",
        _ => "student not in teacher's class",
    }
}

/// Validates and commits one batch on behalf of the teacher in `scope`.
pub fn run_batch(
    conn: &Connection,
    scope: &TeacherScope,
    kind: BatchKind,
    payload: &Value,
    today: NaiveDate,
) -> Result<BatchOutcome, BatchError> {
    let items = decode_payload(kind, payload)?;
    let raws: Vec<Result<RawRow, String>> = items
        .into_iter()
        .map(|item| RawRow::decode(kind, item))
        .collect();

    let first_subject = raws
        .first()
        .and_then(|r| r.as_ref().ok())
        .and_then(RawRow::subject_id);
    if !first_subject.is_some_and(|s| scope.teaches_subject(s)) {
        tracing::info!(teacher_id = scope.teacher_id, kind = kind.label(), "batch rejected: subject not assigned");
        return Err(BatchError::SubjectNotAssigned);
    }

    let validated: Vec<Result<ValidatedRow, RowError>> = raws
        .iter()
        .enumerate()
        .map(|(i, raw)| match raw {
            Ok(raw) => validate_row(raw, i + 1, today),
            Err(reason) => Err(RowError::new(i + 1, reason.clone())),
        })
        .collect();

    let outcome = gateway::with_tx(conn, |tx| {
        let mut outcome = BatchOutcome::default();
        for (i, row) in validated.into_iter().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    outcome.skip(e);
                    continue;
                }
            };
            let student = match scope.check_student(tx, row.subject_id(), row.student_id()) {
                Ok(student) => student,
                Err(Denial::Gateway(e)) => return Err(BatchError::Db(e)),
                Err(denial) => {
                    outcome.skip(RowError::new(i + 1, skip_reason(&denial)));
                    continue;
                }
            };
            match commit_row(tx, &row, student.i64("class_id")) {
                Ok(Written::Inserted) => outcome.inserted += 1,
                Ok(Written::Updated) => outcome.updated += 1,
                Err(e) => {
                    tracing::warn!(row = i + 1, error = %e, "row not saved");
                    outcome.skip(RowError::new(i + 1, "could not save the record"));
                }
            }
        }
        Ok(outcome)
    })?;

    tracing::info!(
        teacher_id = scope.teacher_id,
        kind = kind.label(),
        inserted = outcome.inserted,
        updated = outcome.updated,
        skipped = outcome.skipped,
        "batch committed"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).expect("date")
    }

    // Teacher 1 teaches Math(1) in 7A(1). Students 1..=30 sit in 7A, 31 in 7B.
    fn fixture() -> (Connection, TeacherScope) {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO users(username, password, role) VALUES('guru1', 'x', 'guru');
             INSERT INTO teachers(user_id, nip, full_name) VALUES(1, '111', 'Guru Satu');
             INSERT INTO classes(class_name) VALUES('7A');
             INSERT INTO classes(class_name) VALUES('7B');
             INSERT INTO subjects(subject_name) VALUES('Math');
             INSERT INTO subjects(subject_name) VALUES('Biologi');
             INSERT INTO teacher_subjects(teacher_id, subject_id, class_id) VALUES(1, 1, 1);",
        )
        .expect("fixture");
        for i in 1..=30 {
            conn.execute(
                "INSERT INTO students(nis, full_name, gender, class_id) VALUES(?, ?, 'L', 1)",
                (format!("{i:04}"), format!("Student {i}")),
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO students(nis, full_name, gender, class_id) VALUES('9999', 'Outsider', 'P', 2)",
            [],
        )
        .unwrap();
        let scope = TeacherScope::load(&conn, 1).unwrap();
        (conn, scope)
    }

    fn attendance_payload(status: &str) -> Value {
        let rows: Vec<Value> = (1..=30)
            .map(|i| json!({ "student_id": i, "subject_id": "1", "date": "2024-03-15", "status": status }))
            .collect();
        Value::String(Value::Array(rows).to_string())
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn class_attendance_inserts_then_updates_in_place() {
        let (conn, scope) = fixture();
        let first = run_batch(&conn, &scope, BatchKind::Attendance, &attendance_payload("hadir"), today()).unwrap();
        assert_eq!((first.inserted, first.updated, first.skipped), (30, 0, 0));

        let second = run_batch(&conn, &scope, BatchKind::Attendance, &attendance_payload("sakit"), today()).unwrap();
        assert_eq!((second.inserted, second.updated, second.skipped), (0, 30, 0));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attendances"), 30);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attendances WHERE status = 'sakit' AND class_id = 1"), 30);
    }

    #[test]
    fn unassigned_first_subject_rejects_whole_batch() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 1, "subject_id": 2, "date": "2024-03-15" },
            { "student_id": 2, "subject_id": 1, "date": "2024-03-15" },
        ]);
        let err = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap_err();
        assert!(matches!(err, BatchError::SubjectNotAssigned));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attendances"), 0);
    }

    #[test]
    fn later_rows_with_foreign_subject_are_skipped() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 1, "subject_id": 1, "date": "2024-03-15" },
            { "student_id": 2, "subject_id": 2, "date": "2024-03-15" },
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap();
        assert_eq!((outcome.inserted, outcome.skipped), (1, 1));
        assert_eq!(outcome.errors[0].to_string(), "Row 2: subject not assigned to you");
    }

    #[test]
    fn score_bounds_and_future_dates_are_row_errors() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 1, "subject_id": 1, "score": 101 },
            { "student_id": 2, "subject_id": 1, "score": -1 },
            { "student_id": 3, "subject_id": 1, "score": "100", "assessment_type": "uts" },
            { "student_id": 4, "subject_id": 1, "score": 0, "grade_date": "2024-03-01" },
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Grade, &payload, today()).unwrap();
        assert_eq!((outcome.inserted, outcome.skipped), (2, 2));
        assert!(outcome.errors[0].to_string().starts_with("Row 1: score"));
        assert!(outcome.errors[1].to_string().starts_with("Row 2: score"));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM grades WHERE grade_date = '2024-03-15'"), 1);

        let future = json!([{ "student_id": 1, "subject_id": 1, "date": "2024-03-16" }]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &future, today()).unwrap();
        assert_eq!(outcome.skipped, 1);
        assert!(outcome.errors[0].reason.contains("future"));
    }

    #[test]
    fn students_outside_reachable_classes_are_skipped() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 31, "subject_id": 1, "date": "2024-03-15" },
            { "student_id": 500, "subject_id": 1, "date": "2024-03-15" },
            { "student_id": "abc", "subject_id": 1, "date": "2024-03-15" },
            "not a row",
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap();
        assert_eq!(outcome.skipped, 4);
        let messages: Vec<String> = outcome.errors.iter().map(ToString::to_string).collect();
        assert_eq!(messages[0], "Row 1: student not in teacher's class");
        assert_eq!(messages[1], "Row 2: student not found");
        assert_eq!(messages[2], "Row 3: student_id is missing or not a number");
        assert_eq!(messages[3], "Row 4: row is not an object");
    }

    #[test]
    fn payload_errors_write_nothing() {
        let (conn, scope) = fixture();
        for payload in [json!(null), json!(""), json!("{not json"), json!("{}"), json!("[]"), json!(42)] {
            assert!(run_batch(&conn, &scope, BatchKind::Grade, &payload, today()).is_err());
        }
        let too_many = Value::Array(vec![json!({}); MAX_BATCH_ROWS + 1]);
        assert!(matches!(
            decode_payload(BatchKind::Grade, &too_many),
            Err(BatchError::TooLarge(n)) if n == MAX_BATCH_ROWS + 1
        ));
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM grades"), 0);
    }

    #[test]
    fn invalid_status_is_rejected_but_missing_defaults_to_hadir() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 1, "subject_id": 1, "date": "2024-03-15", "status": "bolos" },
            { "student_id": 2, "subject_id": 1, "date": "2024-03-15", "notes": "  telat  " },
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap();
        assert_eq!((outcome.inserted, outcome.skipped), (1, 1));
        let (status, notes): (String, String) = conn
            .query_row("SELECT status, notes FROM attendances WHERE student_id = 2", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(status, "hadir");
        assert_eq!(notes, "telat");
    }

    #[test]
    fn rows_the_database_refuses_are_skipped_not_counted() {
        let (conn, _) = fixture();
        // An assignment left dangling by an older database.
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             INSERT INTO teacher_subjects(teacher_id, subject_id, class_id) VALUES(1, 99, 1);
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
        let scope = TeacherScope::load(&conn, 1).unwrap();
        let payload = json!([
            { "student_id": 1, "subject_id": 99, "date": "2024-03-15" },
            { "student_id": 2, "subject_id": 1, "date": "2024-03-15" },
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap();
        assert_eq!((outcome.inserted, outcome.updated, outcome.skipped), (1, 0, 1));
        assert_eq!(outcome.errors[0].to_string(), "Row 1: could not save the record");
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attendances WHERE subject_id = 99"), 0);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM attendances"), 1);
    }

    #[test]
    fn whole_number_ids_may_be_written_as_decimals() {
        let (conn, scope) = fixture();
        let payload = json!([
            { "student_id": 1.0, "subject_id": 1, "date": "2024-03-15" },
            { "student_id": "2.0", "subject_id": "1.0", "date": "2024-03-15" },
            { "student_id": 3.5, "subject_id": 1, "date": "2024-03-15" },
            { "student_id": "-4", "subject_id": 1, "date": "2024-03-15" },
        ]);
        let outcome = run_batch(&conn, &scope, BatchKind::Attendance, &payload, today()).unwrap();
        assert_eq!((outcome.inserted, outcome.skipped), (2, 2));
        assert_eq!(outcome.errors[0].to_string(), "Row 3: student_id is missing or not a number");
        assert_eq!(outcome.errors[1].to_string(), "Row 4: student_id is missing or not a number");
    }

    #[test]
    fn display_errors_are_capped_but_counts_are_not() {
        let outcome = BatchOutcome {
            skipped: 8,
            errors: (1..=8).map(|i| RowError::new(i, "bad")).collect(),
            ..Default::default()
        };
        let shown = outcome.display_errors();
        assert_eq!(shown.len(), DISPLAY_ERROR_LIMIT + 1);
        assert_eq!(shown.last().map(String::as_str), Some("... and 3 more errors"));
        assert_eq!(outcome.to_json()["errors"].as_array().map(Vec::len), Some(8));
    }
}
