use rusqlite::Connection;
use serde_json::{json, Value};

use super::teacher::{delete_many, delete_one, scoped_record};
use crate::authz::{Denial, TeacherScope};
use crate::bulk::{self, AttendanceStatus, BatchError, BatchKind, RawRow, ValidatedRow};
use crate::gateway::{self, Filter, Table};
use crate::ipc::helpers::{
    failure, required_id, success, success_with, text, today, with_role, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};

const DUPLICATE: &str =
    "Attendance for this student, subject and date already exists; edit that record instead.";

/// Runs a bulk upsert for either kind and shapes the outcome.
pub(super) fn save_batch(
    conn: &Connection,
    ctx: &RequestContext,
    params: &Value,
    kind: BatchKind,
) -> Result<Value, HandlerErr> {
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let payload = params.get(kind.payload_key()).unwrap_or(&Value::Null);
    match bulk::run_batch(conn, &scope, kind, payload, today()) {
        Ok(outcome) => Ok(success_with(outcome.summary(), outcome.to_json())),
        Err(BatchError::Db(e)) => Err(e.into()),
        Err(e) => Ok(failure(e.to_string())),
    }
}

fn attendance_save_batch(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    save_batch(conn, ctx, params, BatchKind::Attendance)
}

fn attendance_add_individual(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let raw = match RawRow::decode(BatchKind::Attendance, params.clone()) {
        Ok(raw) => raw,
        Err(reason) => return Ok(failure(reason)),
    };
    let row = match bulk::validate_row(&raw, 1, today()) {
        Ok(ValidatedRow::Attendance(row)) => row,
        Ok(ValidatedRow::Grade(_)) => return Err(HandlerErr::bad_params("expected an attendance row")),
        Err(e) => return Ok(failure(e.reason)),
    };

    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let student = match scope.check_student(conn, row.subject_id, row.student_id) {
        Ok(student) => student,
        Err(Denial::Gateway(e)) => return Err(e.into()),
        Err(denial) => return Ok(failure(denial.to_string())),
    };

    let key = Filter::new()
        .eq("student_id", row.student_id)
        .eq("subject_id", row.subject_id)
        .eq("date", row.date.to_string());
    if gateway::exists(conn, Table::Attendances, &key)? {
        return Ok(failure(DUPLICATE));
    }
    let inserted = gateway::insert(
        conn,
        Table::Attendances,
        &[
            ("student_id", row.student_id.into()),
            ("subject_id", row.subject_id.into()),
            ("class_id", student.i64("class_id").into()),
            ("date", row.date.to_string().into()),
            ("status", row.status.as_str().to_string().into()),
            ("notes", row.notes.into()),
        ],
    );
    match inserted {
        Ok(id) => Ok(success_with("Attendance added.", json!({ "id": id }))),
        Err(e) if e.is_constraint() => Ok(failure(DUPLICATE)),
        Err(e) => Err(e.into()),
    }
}

fn attendance_edit(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_id(params, "id")?;
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    if let Err(reason) = scoped_record(conn, &scope, Table::Attendances, record_id)? {
        return Ok(failure(reason));
    }
    let Some(status) = text(params, "status").and_then(|raw| AttendanceStatus::parse(&raw)) else {
        return Ok(failure("Status must be one of hadir, sakit, izin or alpa."));
    };
    gateway::update(
        conn,
        Table::Attendances,
        &[
            ("status", status.as_str().to_string().into()),
            ("notes", text(params, "notes").into()),
        ],
        &Filter::by_id(record_id),
    )?;
    Ok(success("Attendance updated."))
}

fn attendance_delete(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    delete_one(conn, ctx, Table::Attendances, required_id(params, "id")?)
}

fn attendance_bulk_delete(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    delete_many(conn, ctx, params, Table::Attendances)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "attendance.saveBatch" => attendance_save_batch,
        "attendance.addIndividual" => attendance_add_individual,
        "attendance.edit" => attendance_edit,
        "attendance.delete" => attendance_delete,
        "attendance.bulkDelete" => attendance_bulk_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Guru], handler))
}
