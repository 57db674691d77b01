use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{failure, raw_str, success, success_with, text, with_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, LoginError, RequestContext, Role};

fn handle_login(state: &mut AppState, req: &Request) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (Some(username), Some(password)) = (
        text(&req.params, "username"),
        raw_str(&req.params, "password"),
    ) else {
        return ok(&req.id, failure("Username and password are required."));
    };

    match session::authenticate(conn, &username, password) {
        Ok(principal) => {
            let token = state.sessions.open(principal.clone());
            tracing::info!(user = %principal.username, role = principal.role.as_str(), "login");
            let mut result = json!(principal);
            result["token"] = json!(token);
            ok(&req.id, success_with("Login successful.", result))
        }
        Err(LoginError::Gateway(e)) => HandlerErr::from(e).response(&req.id),
        Err(e) => {
            tracing::warn!(user = %username, reason = %e, "login refused");
            ok(&req.id, failure(e.to_string()))
        }
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> Value {
    let Some(token) = req.params.get("token").and_then(|v| v.as_str()) else {
        return err(&req.id, "unauthorized", "missing session token", None);
    };
    if state.sessions.close(token) {
        ok(&req.id, success("Logged out."))
    } else {
        err(&req.id, "unauthorized", "session expired or invalid", None)
    }
}

fn whoami(_conn: &Connection, ctx: &RequestContext, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!(ctx.principal))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(with_role(
            state,
            req,
            &[Role::Admin, Role::Guru, Role::Orangtua],
            whoami,
        )),
        _ => None,
    }
}
