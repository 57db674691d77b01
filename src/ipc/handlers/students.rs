use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    delete_guarded, dependent, failure, id, invalid, require_row, required_id, success,
    success_with, text, today, with_role, Dependent, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::{self, Checks};

const STUDENT_DEPENDENTS: [Dependent; 4] = [
    dependent(Table::Attendances, "student_id", "attendance records"),
    dependent(Table::Grades, "student_id", "grades"),
    dependent(Table::StudentParentRelations, "student_id", "parent relations"),
    dependent(Table::ReportCards, "student_id", "report cards"),
];

const NIS_TAKEN: &str = "NIS is already in use.";

fn read_student(
    conn: &Connection,
    params: &Value,
    self_id: Option<i64>,
    checks: &mut Checks,
) -> Result<Fields<'static>, HandlerErr> {
    let nis = checks.require("NIS", text(params, "nis"));
    let full_name = checks.require("Full name", text(params, "full_name"));
    let gender = checks
        .require("Gender", text(params, "gender"))
        .and_then(|g| {
            let parsed = validate::parse_gender(&g);
            if parsed.is_none() {
                checks.push("Gender must be L or P.");
            }
            parsed
        });
    let class_id = id(params, "class_id");
    let birth_date = text(params, "birth_date");

    match class_id {
        None => checks.push("Class is required."),
        Some(class_id) => {
            if !gateway::exists(conn, Table::Classes, &Filter::by_id(class_id))? {
                checks.push("Class not found.");
            }
        }
    }
    if let Some(nis) = &nis {
        let mut taken = Filter::new().eq("nis", nis.clone());
        if let Some(me) = self_id {
            taken = taken.neq("id", me);
        }
        if gateway::exists(conn, Table::Students, &taken)? {
            checks.push(NIS_TAKEN);
        }
    }
    if let Some(problem) = birth_date
        .as_deref()
        .and_then(|b| validate::birth_date_problem(b, today()))
    {
        checks.push(problem);
    }

    Ok(vec![
        ("nis", nis.into()),
        ("full_name", full_name.into()),
        ("gender", gender.map(str::to_string).into()),
        ("birth_date", birth_date.into()),
        ("address", text(params, "address").into()),
        ("class_id", class_id.into()),
    ])
}

fn student_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let fields = read_student(conn, params, None, &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::insert(conn, Table::Students, &fields) {
        Ok(id) => Ok(success_with("Student added.", json!({ "id": id }))),
        Err(e) if e.is_constraint() => Ok(failure(NIS_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn student_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_id(params, "id")?;
    require_row(conn, Table::Students, student_id, "student")?;
    let mut checks = Checks::new();
    let fields = read_student(conn, params, Some(student_id), &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::update(conn, Table::Students, &fields, &Filter::by_id(student_id)) {
        Ok(_) => Ok(success("Student updated.")),
        Err(e) if e.is_constraint() => Ok(failure(NIS_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn student_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_id(params, "id")?;
    delete_guarded(conn, Table::Students, student_id, "student", &STUDENT_DEPENDENTS)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "students.create" => student_create,
        "students.update" => student_update,
        "students.delete" => student_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
