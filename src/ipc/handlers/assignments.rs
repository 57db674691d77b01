use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    failure, id, invalid, refuse_delete, require_row, required_id, success, success_with,
    with_role, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::Checks;

const TRIPLE_TAKEN: &str = "This teacher already teaches this subject in this class.";

fn read_assignment(
    conn: &Connection,
    params: &Value,
    self_id: Option<i64>,
    checks: &mut Checks,
) -> Result<Fields<'static>, HandlerErr> {
    let refs = [
        ("teacher_id", Table::Teachers, "Teacher"),
        ("subject_id", Table::Subjects, "Subject"),
        ("class_id", Table::Classes, "Class"),
    ];
    let mut ids = [None; 3];
    for (slot, (key, table, label)) in ids.iter_mut().zip(refs) {
        match id(params, key) {
            None => checks.push(format!("{label} is required.")),
            Some(ref_id) if !gateway::exists(conn, table, &Filter::by_id(ref_id))? => {
                checks.push(format!("{label} not found."))
            }
            Some(ref_id) => *slot = Some(ref_id),
        }
    }

    if let [Some(teacher_id), Some(subject_id), Some(class_id)] = ids {
        let mut taken = Filter::new()
            .eq("teacher_id", teacher_id)
            .eq("subject_id", subject_id)
            .eq("class_id", class_id);
        if let Some(me) = self_id {
            taken = taken.neq("id", me);
        }
        if gateway::exists(conn, Table::TeacherSubjects, &taken)? {
            checks.push(TRIPLE_TAKEN);
        }
    }

    Ok(vec![
        ("teacher_id", ids[0].into()),
        ("subject_id", ids[1].into()),
        ("class_id", ids[2].into()),
    ])
}

fn assignment_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let fields = read_assignment(conn, params, None, &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::insert(conn, Table::TeacherSubjects, &fields) {
        Ok(id) => Ok(success_with("Assignment added.", json!({ "id": id }))),
        Err(e) if e.is_constraint() => Ok(failure(TRIPLE_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn assignment_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = required_id(params, "id")?;
    require_row(conn, Table::TeacherSubjects, assignment_id, "assignment")?;
    let mut checks = Checks::new();
    let fields = read_assignment(conn, params, Some(assignment_id), &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::update(conn, Table::TeacherSubjects, &fields, &Filter::by_id(assignment_id)) {
        Ok(_) => Ok(success("Assignment updated.")),
        Err(e) if e.is_constraint() => Ok(failure(TRIPLE_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

/// Refused while grades or attendance exist for the subject among the
/// class's students.
fn assignment_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let assignment_id = required_id(params, "id")?;
    let assignment = require_row(conn, Table::TeacherSubjects, assignment_id, "assignment")?;
    let (Some(subject_id), Some(class_id)) = (assignment.i64("subject_id"), assignment.i64("class_id")) else {
        return Err(HandlerErr::not_found("assignment is incomplete"));
    };

    let in_class = Filter::new()
        .eq("subject_id", subject_id)
        .in_select("student_id", Table::Students, "id", "class_id", class_id);
    let mut blocked = Vec::new();
    if gateway::exists(conn, Table::Grades, &in_class)? {
        blocked.push("grades");
    }
    if gateway::exists(conn, Table::Attendances, &in_class)? {
        blocked.push("attendance records");
    }
    if !blocked.is_empty() {
        return Ok(refuse_delete(Table::TeacherSubjects, assignment_id, "assignment", &blocked));
    }

    gateway::delete(conn, Table::TeacherSubjects, &Filter::by_id(assignment_id))?;
    tracing::info!(assignment_id, "assignment deleted");
    Ok(success("The assignment was deleted."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "assignments.create" => assignment_create,
        "assignments.update" => assignment_update,
        "assignments.delete" => assignment_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
