use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    delete_guarded, dependent, id, invalid, require_row, required_id, success, success_with, text,
    with_role, Dependent, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::Checks;

const CLASS_DEPENDENTS: [Dependent; 2] = [
    dependent(Table::Students, "class_id", "students"),
    dependent(Table::TeacherSubjects, "class_id", "subject assignments"),
];

fn read_class(conn: &Connection, params: &Value, checks: &mut Checks) -> Result<Fields<'static>, HandlerErr> {
    let class_name = checks.require("Class name", text(params, "class_name"));
    let homeroom = id(params, "homeroom_teacher_id");
    if let Some(teacher_id) = homeroom {
        if !gateway::exists(conn, Table::Teachers, &Filter::by_id(teacher_id))? {
            checks.push("Homeroom teacher not found.");
        }
    }
    Ok(vec![
        ("class_name", class_name.into()),
        ("homeroom_teacher_id", homeroom.into()),
    ])
}

fn class_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let fields = read_class(conn, params, &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    let class_id = gateway::insert(conn, Table::Classes, &fields)?;
    Ok(success_with("Class added.", json!({ "id": class_id })))
}

fn class_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_id(params, "id")?;
    require_row(conn, Table::Classes, class_id, "class")?;
    let mut checks = Checks::new();
    let fields = read_class(conn, params, &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    gateway::update(conn, Table::Classes, &fields, &Filter::by_id(class_id))?;
    Ok(success("Class updated."))
}

fn class_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_id(params, "id")?;
    delete_guarded(conn, Table::Classes, class_id, "class", &CLASS_DEPENDENTS)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "classes.create" => class_create,
        "classes.update" => class_update,
        "classes.delete" => class_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
