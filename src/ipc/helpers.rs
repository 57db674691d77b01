//! Plumbing shared by the handler families: error mapping, parameter
//! readers, the session/role gate and the `success`/`message` result shape.

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Filter, GatewayError, Table};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, RequestContext, Role};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<GatewayError> for HandlerErr {
    fn from(e: GatewayError) -> Self {
        tracing::error!(error = %e, "database error");
        Self::new("db_query_failed", e.to_string())
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "internal error");
        Self::new("internal_error", e.to_string())
    }
}

pub type Handler = fn(&Connection, &RequestContext, &Value) -> Result<Value, HandlerErr>;

/// Trimmed, non-empty text. Numbers are accepted and rendered as text.
pub fn text(params: &Value, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Raw string without trimming (passwords).
pub fn raw_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Positive id from a number or numeric string.
pub fn id(params: &Value, key: &str) -> Option<i64> {
    let id = match params.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

pub fn required_id(params: &Value, key: &str) -> Result<i64, HandlerErr> {
    id(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing or invalid {key}")))
}

pub fn id_list(params: &Value, key: &str) -> Result<Vec<i64>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{key} must be a list of ids")));
    };
    items
        .iter()
        .map(|v| match v {
            Value::Number(n) => n.as_i64().filter(|id| *id > 0),
            Value::String(s) => s.trim().parse::<i64>().ok().filter(|id| *id > 0),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| HandlerErr::bad_params(format!("{key} must be a list of ids")))
}

pub fn success(message: impl Into<String>) -> Value {
    json!({ "success": true, "message": message.into() })
}

/// `success` plus the fields of `extra`, which must be an object.
pub fn success_with(message: impl Into<String>, extra: Value) -> Value {
    let mut out = success(message);
    if let (Some(out), Value::Object(extra)) = (out.as_object_mut(), extra) {
        out.extend(extra);
    }
    out
}

pub fn failure(message: impl Into<String>) -> Value {
    let message = message.into();
    json!({ "success": false, "message": message.clone(), "errors": [message] })
}

pub fn invalid(errors: Vec<String>) -> Value {
    json!({ "success": false, "message": errors.join("\n"), "errors": errors })
}

fn unauthorized(message: &str) -> HandlerErr {
    HandlerErr::new("unauthorized", message)
}

/// Resolves `params.token` to the principal it was issued to. A session whose
/// profile row has since been deleted is closed.
pub fn session_context(state: &mut AppState, req: &Request) -> Result<RequestContext, HandlerErr> {
    let Some(token) = req.params.get("token").and_then(|v| v.as_str()) else {
        return Err(unauthorized("missing session token"));
    };
    let Some(principal) = state.sessions.get(token).cloned() else {
        return Err(unauthorized("session expired or invalid"));
    };
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let profile = session::find_profile(conn, principal.role, principal.user_id)?;
    if profile != Some(principal.profile_id) {
        state.sessions.close(token);
        tracing::warn!(user = %principal.username, "session closed: profile no longer exists");
        return Err(unauthorized("account is no longer valid"));
    }
    Ok(RequestContext { principal })
}

/// Runs `handler` for a signed-in principal holding one of `roles`.
pub fn with_role(state: &mut AppState, req: &Request, roles: &[Role], handler: Handler) -> Value {
    let ctx = match session_context(state, req) {
        Ok(ctx) => ctx,
        Err(e) => return e.response(&req.id),
    };
    if !roles.contains(&ctx.role()) {
        tracing::info!(user = %ctx.principal.username, method = %req.method, "forbidden");
        return err(
            &req.id,
            "forbidden",
            format!("role {} may not call {}", ctx.role().as_str(), req.method),
            None,
        );
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    tracing::debug!(user = %ctx.principal.username, method = %req.method, "dispatch");
    match handler(conn, &ctx, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn today() -> chrono::NaiveDate {
    chrono::Local::now().date_naive()
}

/// A table whose rows block deleting the record they reference.
pub struct Dependent {
    pub table: Table,
    pub column: &'static str,
    pub label: &'static str,
}

pub const fn dependent(table: Table, column: &'static str, label: &'static str) -> Dependent {
    Dependent {
        table,
        column,
        label,
    }
}

pub fn blockers(conn: &Connection, id: i64, deps: &[Dependent]) -> Result<Vec<&'static str>, HandlerErr> {
    let mut found = Vec::new();
    for dep in deps {
        if gateway::exists(conn, dep.table, &Filter::new().eq(dep.column, id))? {
            found.push(dep.label);
        }
    }
    Ok(found)
}

pub fn refuse_delete(table: Table, id: i64, noun: &str, blocked: &[&str]) -> Value {
    tracing::info!(table = table.name(), id, blocked = ?blocked, "delete refused");
    failure(format!(
        "Cannot delete this {noun}: it still has {}.",
        blocked.join(", ")
    ))
}

/// Deletes one row unless a dependent row still references it.
pub fn delete_guarded(
    conn: &Connection,
    table: Table,
    id: i64,
    noun: &str,
    deps: &[Dependent],
) -> Result<Value, HandlerErr> {
    if !gateway::exists(conn, table, &Filter::by_id(id))? {
        return Err(HandlerErr::not_found(format!("{noun} not found")));
    }
    let blocked = blockers(conn, id, deps)?;
    if !blocked.is_empty() {
        return Ok(refuse_delete(table, id, noun, &blocked));
    }
    gateway::delete(conn, table, &Filter::by_id(id))?;
    tracing::info!(table = table.name(), id, "deleted");
    Ok(success(format!("The {noun} was deleted.")))
}

/// Fails with `not_found` unless the row exists.
pub fn require_row(conn: &Connection, table: Table, id: i64, noun: &str) -> Result<gateway::Record, HandlerErr> {
    gateway::find_one(conn, table, &Filter::by_id(id))?
        .ok_or_else(|| HandlerErr::not_found(format!("{noun} not found")))
}

/// Error type for multi-step writes run under `gateway::with_tx`. `Refused`
/// rolls the transaction back and surfaces as a `success: false` result.
pub enum TxErr {
    Refused(String),
    Failed(HandlerErr),
}

impl TxErr {
    /// Maps a constraint violation to `Refused(message)`.
    pub fn on_constraint(message: &str) -> impl FnOnce(GatewayError) -> TxErr + '_ {
        move |e| {
            if e.is_constraint() {
                TxErr::Refused(message.to_string())
            } else {
                TxErr::Failed(e.into())
            }
        }
    }
}

impl From<GatewayError> for TxErr {
    fn from(e: GatewayError) -> Self {
        TxErr::Failed(e.into())
    }
}

impl From<HandlerErr> for TxErr {
    fn from(e: HandlerErr) -> Self {
        TxErr::Failed(e)
    }
}

pub fn finish_tx(result: Result<Value, TxErr>) -> Result<Value, HandlerErr> {
    match result {
        Ok(value) => Ok(value),
        Err(TxErr::Refused(message)) => Ok(failure(message)),
        Err(TxErr::Failed(e)) => Err(e),
    }
}
