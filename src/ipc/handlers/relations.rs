use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Fields, Filter, Table};
use crate::ipc::helpers::{
    failure, id, invalid, require_row, required_id, success, success_with, text, with_role,
    Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::{self, Checks};

const PAIR_TAKEN: &str = "This parent is already linked to this student.";

fn read_relation(
    conn: &Connection,
    params: &Value,
    self_id: Option<i64>,
    checks: &mut Checks,
) -> Result<Fields<'static>, HandlerErr> {
    let student_id = id(params, "student_id");
    let parent_id = id(params, "parent_id");
    let relationship = checks
        .require("Relationship type", text(params, "relationship_type"))
        .and_then(|raw| {
            let parsed = validate::parse_relationship(&raw);
            if parsed.is_none() {
                checks.push(format!(
                    "Relationship type must be one of: {}.",
                    validate::RELATIONSHIP_TYPES.join(", ")
                ));
            }
            parsed
        });

    match student_id {
        None => checks.push("Student is required."),
        Some(sid) if !gateway::exists(conn, Table::Students, &Filter::by_id(sid))? => {
            checks.push("Student not found.")
        }
        Some(_) => {}
    }
    match parent_id {
        None => checks.push("Parent is required."),
        Some(pid) if !gateway::exists(conn, Table::Parents, &Filter::by_id(pid))? => {
            checks.push("Parent not found.")
        }
        Some(_) => {}
    }
    if let (Some(sid), Some(pid)) = (student_id, parent_id) {
        let mut pair = Filter::new().eq("student_id", sid).eq("parent_id", pid);
        if let Some(me) = self_id {
            pair = pair.neq("id", me);
        }
        if gateway::exists(conn, Table::StudentParentRelations, &pair)? {
            checks.push(PAIR_TAKEN);
        }
    }

    Ok(vec![
        ("student_id", student_id.into()),
        ("parent_id", parent_id.into()),
        ("relationship_type", relationship.map(str::to_string).into()),
    ])
}

fn relation_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let fields = read_relation(conn, params, None, &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::insert(conn, Table::StudentParentRelations, &fields) {
        Ok(id) => Ok(success_with("Relation added.", json!({ "id": id }))),
        Err(e) if e.is_constraint() => Ok(failure(PAIR_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn relation_update(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let relation_id = required_id(params, "id")?;
    require_row(conn, Table::StudentParentRelations, relation_id, "relation")?;
    let mut checks = Checks::new();
    let fields = read_relation(conn, params, Some(relation_id), &mut checks)?;
    if !checks.is_empty() {
        return Ok(invalid(checks.into_errors()));
    }
    match gateway::update(
        conn,
        Table::StudentParentRelations,
        &fields,
        &Filter::by_id(relation_id),
    ) {
        Ok(_) => Ok(success("Relation updated.")),
        Err(e) if e.is_constraint() => Ok(failure(PAIR_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn relation_delete(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let relation_id = required_id(params, "id")?;
    require_row(conn, Table::StudentParentRelations, relation_id, "relation")?;
    gateway::delete(conn, Table::StudentParentRelations, &Filter::by_id(relation_id))?;
    Ok(success("The relation was deleted."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "relations.create" => relation_create,
        "relations.update" => relation_update,
        "relations.delete" => relation_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Admin], handler))
}
