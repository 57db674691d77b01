use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    delete_guarded, dependent, invalid, require_row, required_id, success, success_with, text,
    with_role, Dependent, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::Checks;

const SUBJECT_DEPENDENTS: [Dependent; 3] = [
    dependent(Table::TeacherSubjects, "subject_id", "teacher assignments"),
    dependent(Table::Grades, "subject_id", "grades"),
    dependent(Table::Attendances, "subject_id", "attendance records"),
];

fn read_subject(params: &Value, checks: &mut Checks) -> Fields<'static> {
    vec![
        (
            "subject_name",
            checks.require("Subject name", text(params, "subject_name")).into(),
        ),
        ("description", text(params, "description").into()),
    ]
}

fn subject_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let fields = read_subject(params, &mut checks);
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    let subject_id = gateway::insert(conn, Table::Subjects, &fields)?;
    Ok(success_with("Subject added.", json!({ "id": subject_id })))
}

fn subject_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = required_id(params, "id")?;
    require_row(conn, Table::Subjects, subject_id, "subject")?;
    let mut checks = Checks::new();
    let fields = read_subject(params, &mut checks);
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    gateway::update(conn, Table::Subjects, &fields, &Filter::by_id(subject_id))?;
    Ok(success("Subject updated."))
}

fn subject_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = required_id(params, "id")?;
    delete_guarded(conn, Table::Subjects, subject_id, "subject", &SUBJECT_DEPENDENTS)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "subjects.create" => subject_create,
        "subjects.update" => subject_update,
        "subjects.delete" => subject_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
