use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::authz::{self, Denial, TeacherScope};
use crate::gateway::{self, Filter, Record, Table};
use crate::ipc::helpers::{failure, id, id_list, required_id, with_role, Handler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};

/// Loads an attendance or grade row and checks the teacher may touch it.
/// The inner `Err` is a user-facing refusal.
pub(super) fn scoped_record(
    conn: &Connection,
    scope: &TeacherScope,
    table: Table,
    record_id: i64,
) -> Result<Result<Record, String>, HandlerErr> {
    let Some(record) = gateway::find_one(conn, table, &Filter::by_id(record_id))? else {
        return Ok(Err("Record not found.".to_string()));
    };
    let subject_id = record.i64("subject_id").unwrap_or(0);
    let student_id = record.i64("student_id").unwrap_or(0);
    match scope.check_student(conn, subject_id, student_id) {
        Ok(_) => Ok(Ok(record)),
        Err(Denial::Gateway(e)) => Err(e.into()),
        Err(denial) => Ok(Err(denial.to_string())),
    }
}

pub(super) fn delete_one(
    conn: &Connection,
    ctx: &RequestContext,
    table: Table,
    record_id: i64,
) -> Result<Value, HandlerErr> {
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    match scoped_record(conn, &scope, table, record_id)? {
        Ok(_) => {
            gateway::delete(conn, table, &Filter::by_id(record_id))?;
            tracing::info!(table = table.name(), id = record_id, "deleted");
            Ok(json!({ "success": true, "message": "Record deleted." }))
        }
        Err(reason) => Ok(failure(reason)),
    }
}

/// Deletes every listed id the teacher may touch; the rest are reported.
pub(super) fn delete_many(
    conn: &Connection,
    ctx: &RequestContext,
    params: &Value,
    table: Table,
) -> Result<Value, HandlerErr> {
    let ids = id_list(params, "ids")?;
    if ids.is_empty() {
        return Ok(failure("No records selected."));
    }
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let (deleted, errors) = gateway::with_tx(conn, |tx| {
        let mut deleted = 0usize;
        let mut errors = Vec::new();
        for record_id in &ids {
            match scoped_record(tx, &scope, table, *record_id)? {
                Ok(_) => deleted += gateway::delete(tx, table, &Filter::by_id(*record_id))?,
                Err(reason) => errors.push(format!("ID {record_id}: {reason}")),
            }
        }
        Ok::<_, HandlerErr>((deleted, errors))
    })?;
    tracing::info!(table = table.name(), deleted, refused = errors.len(), "bulk delete");
    Ok(json!({
        "success": deleted > 0,
        "message": format!("{deleted} of {} records deleted.", ids.len()),
        "deleted": deleted,
        "errors": errors,
    }))
}

fn names(conn: &Connection, table: Table, column: &str, ids: impl Iterator<Item = i64>) -> Result<BTreeMap<i64, String>, HandlerErr> {
    let mut out = BTreeMap::new();
    for id in ids {
        if let Some(row) = gateway::find_one(conn, table, &Filter::by_id(id))? {
            out.insert(id, row.str(column).unwrap_or_default().to_string());
        }
    }
    Ok(out)
}

fn overview(conn: &Connection, ctx: &RequestContext, _params: &Value) -> Result<Value, HandlerErr> {
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let classes = names(
        conn,
        Table::Classes,
        "class_name",
        scope.class_ids().chain(scope.homeroom_class_ids()),
    )?;
    let subjects = names(conn, Table::Subjects, "subject_name", scope.subject_ids())?;
    let label = |map: &BTreeMap<i64, String>, id: i64| map.get(&id).cloned().unwrap_or_default();

    let assignments: Vec<Value> = scope
        .assignments
        .iter()
        .map(|a| {
            json!({
                "id": a.id,
                "subjectId": a.subject_id,
                "subjectName": label(&subjects, a.subject_id),
                "classId": a.class_id,
                "className": label(&classes, a.class_id),
            })
        })
        .collect();
    let homeroom: Vec<Value> = scope
        .homeroom_class_ids()
        .map(|id| json!({ "id": id, "className": label(&classes, id) }))
        .collect();
    let students = gateway::count(
        conn,
        Table::Students,
        &Filter::new().in_select("class_id", Table::TeacherSubjects, "class_id", "teacher_id", scope.teacher_id),
    )?;

    Ok(json!({
        "teacherId": scope.teacher_id,
        "assignments": assignments,
        "classes": scope.class_ids().map(|id| json!({ "id": id, "className": label(&classes, id) })).collect::<Vec<_>>(),
        "subjects": scope.subject_ids().map(|id| json!({ "id": id, "subjectName": label(&subjects, id) })).collect::<Vec<_>>(),
        "homeroomClasses": homeroom,
        "studentCount": students,
    }))
}

/// Lets a client gate its screens on the same check the writes use.
fn can_act_on(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = required_id(params, "subject_id")?;
    let class_id = id(params, "class_id");
    let allowed = authz::teacher_may_act_on(conn, ctx.profile_id(), subject_id, class_id)?;
    Ok(json!({ "allowed": allowed, "subjectId": subject_id, "classId": class_id }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "teacher.overview" => overview,
        "teacher.canActOn" => can_act_on,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Guru], handler))
}
