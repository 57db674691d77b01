use rusqlite::Connection;
use serde_json::{json, Value};

use super::users::{check_login, insert_login};
use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    blockers, dependent, finish_tx, invalid, raw_str, refuse_delete, require_row, required_id,
    success, success_with, text, with_role, Dependent, Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::{self, Checks};

const PARENT_DEPENDENTS: [Dependent; 1] = [dependent(
    Table::StudentParentRelations,
    "parent_id",
    "student relations",
)];

fn read_parent(params: &Value, checks: &mut Checks) -> Fields<'static> {
    let full_name = checks.require("Full name", text(params, "full_name"));
    let email = text(params, "email");
    if email.as_deref().is_some_and(|e| !validate::is_valid_email(e)) {
        checks.push("Email address is not valid.");
    }
    vec![
        ("full_name", full_name.into()),
        ("email", email.into()),
        ("phone_number", text(params, "phone_number").into()),
    ]
}

/// Creates a parent; a login account is created too when `username` is given.
fn parent_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let mut fields = read_parent(params, &mut checks);
    let wants_login = text(params, "username").is_some();
    let username = if wants_login {
        check_login(conn, &mut checks, params, None, true)?
    } else {
        None
    };
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }

    finish_tx(gateway::with_tx(conn, |tx| {
        let mut user_id = None;
        if let (Some(username), Some(password)) = (&username, raw_str(params, "password")) {
            let id = insert_login(tx, username, password, Role::Orangtua)?;
            fields.push(("user_id", id.into()));
            user_id = Some(id);
        }
        let parent_id = gateway::insert(tx, Table::Parents, &fields)?;
        tracing::info!(parent_id, with_login = user_id.is_some(), "parent created");
        Ok(success_with(
            "Parent added.",
            json!({ "id": parent_id, "userId": user_id }),
        ))
    }))
}

fn parent_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = required_id(params, "id")?;
    require_row(conn, Table::Parents, parent_id, "parent")?;
    let mut checks = Checks::new();
    let fields = read_parent(params, &mut checks);
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    gateway::update(conn, Table::Parents, &fields, &Filter::by_id(parent_id))?;
    Ok(success("Parent updated."))
}

fn parent_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let parent_id = required_id(params, "id")?;
    let parent = require_row(conn, Table::Parents, parent_id, "parent")?;
    let blocked = blockers(conn, parent_id, &PARENT_DEPENDENTS)?;
    if !blocked.is_empty() {
        return Ok(refuse_delete(Table::Parents, parent_id, "parent", &blocked));
    }
    gateway::with_tx(conn, |tx| {
        gateway::delete(tx, Table::Parents, &Filter::by_id(parent_id))?;
        if let Some(user_id) = parent.i64("user_id") {
            gateway::delete(tx, Table::Users, &Filter::by_id(user_id))?;
        }
        Ok::<_, HandlerErr>(())
    })?;
    tracing::info!(parent_id, "parent deleted");
    Ok(success("The parent was deleted."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "parents.create" => parent_create,
        "parents.update" => parent_update,
        "parents.delete" => parent_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
