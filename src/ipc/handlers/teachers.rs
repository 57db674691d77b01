use rusqlite::Connection;
use serde_json::{json, Value};

use super::users::{check_login, insert_login};
use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    blockers, dependent, failure, finish_tx, invalid, raw_str, refuse_delete, require_row,
    required_id, success, success_with, text, with_role, Dependent, Handler, HandlerErr, TxErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::{self, Checks};

const TEACHER_DEPENDENTS: [Dependent; 2] = [
    dependent(Table::Classes, "homeroom_teacher_id", "a homeroom class"),
    dependent(Table::TeacherSubjects, "teacher_id", "subject assignments"),
];

const NIP_TAKEN: &str = "NIP is already in use.";

/// Profile fields shared by create and update.
fn read_profile(
    conn: &Connection,
    params: &Value,
    self_id: Option<i64>,
    checks: &mut Checks,
) -> Result<Fields<'static>, HandlerErr> {
    let nip = checks.require("NIP", text(params, "nip"));
    let full_name = checks.require("Full name", text(params, "full_name"));
    let email = text(params, "email");

    if let Some(nip) = &nip {
        let mut taken = Filter::new().eq("nip", nip.clone());
        if let Some(me) = self_id {
            taken = taken.neq("id", me);
        }
        if gateway::exists(conn, Table::Teachers, &taken)? {
            checks.push(NIP_TAKEN);
        }
    }
    if email.as_deref().is_some_and(|e| !validate::is_valid_email(e)) {
        checks.push("Email address is not valid.");
    }

    Ok(vec![
        ("nip", nip.into()),
        ("full_name", full_name.into()),
        ("email", email.into()),
        ("phone_number", text(params, "phone_number").into()),
    ])
}

fn teacher_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let mut profile = read_profile(conn, params, None, &mut checks)?;
    let username = check_login(conn, &mut checks, params, None, true)?;
    let (Some(username), Some(password), true) =
        (username, raw_str(params, "password"), checks.is_empty())
    else {
        return Ok(invalid(checks.into_errors()));
    };

    // The guru login and the teacher row land together or not at all.
    finish_tx(gateway::with_tx(conn, |tx| {
        let user_id = insert_login(tx, &username, password, Role::Guru)?;
        profile.push(("user_id", user_id.into()));
        let teacher_id = gateway::insert(tx, Table::Teachers, &profile)
            .map_err(TxErr::on_constraint(NIP_TAKEN))?;
        tracing::info!(teacher_id, user = %username, "teacher created");
        Ok(success_with(
            "Teacher added.",
            json!({ "id": teacher_id, "userId": user_id }),
        ))
    }))
}

fn teacher_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = required_id(params, "id")?;
    require_row(conn, Table::Teachers, teacher_id, "teacher")?;
    let mut checks = Checks::new();
    let profile = read_profile(conn, params, Some(teacher_id), &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::update(conn, Table::Teachers, &profile, &Filter::by_id(teacher_id)) {
        Ok(_) => Ok(success("Teacher updated.")),
        Err(e) if e.is_constraint() => Ok(failure(NIP_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn teacher_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let teacher_id = required_id(params, "id")?;
    let teacher = require_row(conn, Table::Teachers, teacher_id, "teacher")?;
    let blocked = blockers(conn, teacher_id, &TEACHER_DEPENDENTS)?;
    if !blocked.is_empty() {
        return Ok(refuse_delete(Table::Teachers, teacher_id, "teacher", &blocked));
    }

    gateway::with_tx(conn, |tx| {
        gateway::delete(tx, Table::Teachers, &Filter::by_id(teacher_id))?;
        if let Some(user_id) = teacher.i64("user_id") {
            gateway::delete(tx, Table::Users, &Filter::by_id(user_id))?;
        }
        Ok::<_, HandlerErr>(())
    })?;
    tracing::info!(teacher_id, "teacher and login deleted");
    Ok(success("The teacher and their login were deleted."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "teachers.create" => teacher_create,
        "teachers.update" => teacher_update,
        "teachers.delete" => teacher_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
