use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Filter, Table};
use crate::ipc::helpers::{
    failure, finish_tx, invalid, raw_str, refuse_delete, require_row, required_id, success,
    success_with, text, with_role, Handler, HandlerErr, TxErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, RequestContext, Role};
use crate::validate::{self, Checks};

pub const USERNAME_TAKEN: &str = "Username is already in use.";

/// Validates a username (and a password when one is given or required).
/// Returns the trimmed username when present.
pub fn check_login(
    conn: &Connection,
    checks: &mut Checks,
    params: &Value,
    self_user_id: Option<i64>,
    password_required: bool,
) -> Result<Option<String>, HandlerErr> {
    let username = checks.require("Username", text(params, "username"));
    if let Some(username) = &username {
        checks.extend(validate::username_problems(username));
        let mut taken = Filter::new().eq("username", username.clone());
        if let Some(me) = self_user_id {
            taken = taken.neq("id", me);
        }
        if gateway::exists(conn, Table::Users, &taken)? {
            checks.push(USERNAME_TAKEN);
        }
    }
    match raw_str(params, "password") {
        Some(password) => {
            if let Some(problem) = validate::password_problem(password) {
                checks.push(problem);
            }
        }
        None if password_required => checks.push("Password is required."),
        None => {}
    }
    Ok(username)
}

/// Inserts a user row with a freshly hashed password.
pub fn insert_login(conn: &Connection, username: &str, password: &str, role: Role) -> Result<i64, TxErr> {
    let hash = session::hash_password(password).map_err(HandlerErr::from)?;
    gateway::insert(
        conn,
        Table::Users,
        &[
            ("username", username.to_string().into()),
            ("password", hash.into()),
            ("role", role.as_str().to_string().into()),
        ],
    )
    .map_err(TxErr::on_constraint(USERNAME_TAKEN))
}

fn user_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let username = check_login(conn, &mut checks, params, None, true)?;
    let role = match checks.require("Role", text(params, "role")) {
        Some(raw) => {
            let role = Role::parse(&raw);
            if role.is_none() {
                checks.push("Role must be admin, guru or orangtua.");
            }
            role
        }
        None => None,
    };
    let (Some(username), Some(password), Some(role), true) =
        (username, raw_str(params, "password"), role, checks.is_empty())
    else {
        return Ok(invalid(checks.into_errors()));
    };
    let full_name = text(params, "full_name").unwrap_or_else(|| username.clone());

    finish_tx(gateway::with_tx(conn, |tx| {
        let user_id = insert_login(tx, &username, password, role)?;
        // An admin login is only valid with an admins row.
        if role == Role::Admin {
            gateway::insert(
                tx,
                Table::Admins,
                &[("user_id", user_id.into()), ("full_name", full_name.into())],
            )?;
        }
        tracing::info!(user = %username, role = role.as_str(), "user created");
        Ok(success_with("User added.", json!({ "id": user_id })))
    }))
}

fn user_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_id(params, "id")?;
    require_row(conn, Table::Users, user_id, "user")?;
    let mut checks = Checks::new();
    let username = check_login(conn, &mut checks, params, Some(user_id), false)?;
    let Some(username) = username.filter(|_| checks.is_empty()) else {
        return Ok(invalid(checks.into_errors()));
    };

    let mut fields = vec![("username", username.into())];
    if let Some(password) = raw_str(params, "password") {
        fields.push(("password", session::hash_password(password)?.into()));
    }
    match gateway::update(conn, Table::Users, &fields, &Filter::by_id(user_id)) {
        Ok(_) => Ok(success("User updated.")),
        Err(e) if e.is_constraint() => Ok(failure(USERNAME_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn user_delete(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_id(params, "id")?;
    require_row(conn, Table::Users, user_id, "user")?;
    if user_id == ctx.user_id() {
        return Ok(failure("You cannot delete your own account."));
    }
    let linked = Filter::new().eq("user_id", user_id);
    let mut blocked = Vec::new();
    if gateway::exists(conn, Table::Teachers, &linked)? {
        blocked.push("a linked teacher profile");
    }
    if gateway::exists(conn, Table::Parents, &linked)? {
        blocked.push("a linked parent profile");
    }
    if !blocked.is_empty() {
        return Ok(refuse_delete(Table::Users, user_id, "user", &blocked));
    }

    gateway::with_tx(conn, |tx| {
        gateway::delete(tx, Table::Admins, &linked)?;
        gateway::delete(tx, Table::Users, &Filter::by_id(user_id))?;
        Ok::<_, HandlerErr>(())
    })?;
    tracing::info!(user_id, "user deleted");
    Ok(success("The user was deleted."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "users.create" => user_create,
        "users.update" => user_update,
        "users.delete" => user_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
