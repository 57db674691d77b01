//! Read-only record queries with `field,operator,value` filters.

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Value};

use crate::authz::TeacherScope;
use crate::gateway::{self, Filter, Op, Record, Table};
use crate::ipc::helpers::{text, with_role, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};

pub const MAX_QUERY_LIMIT: i64 = 1000;

const TEACHER_TABLES: [Table; 3] = [Table::Students, Table::Attendances, Table::Grades];

fn filter_triples(params: &Value) -> Result<Vec<String>, HandlerErr> {
    match params.get("filter") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| HandlerErr::bad_params("filter must be a list of strings")),
        Some(_) => Err(HandlerErr::bad_params("filter must be a list of strings")),
    }
}

fn apply_triple(table: Table, filter: Filter, raw: &str) -> Result<Filter, HandlerErr> {
    let (field, op, value) = gateway::parse_triple(raw).map_err(HandlerErr::bad_params)?;
    // Grades carry no class_id; filter through the student's class instead.
    if table == Table::Grades && field == "class_id" {
        if op != Op::Eq {
            return Err(HandlerErr::bad_params("class_id on grades only supports eq"));
        }
        return Ok(filter.in_select("student_id", Table::Students, "id", "class_id", value));
    }
    if !table.has_column(&field) || (table == Table::Users && field == "password") {
        return Err(HandlerErr::bad_params(format!(
            "unknown column `{field}` on {}",
            table.name()
        )));
    }
    Ok(filter.cmp(&field, op, SqlValue::Text(value)))
}

/// Restricts teacher reads to students of the classes they teach.
fn teacher_scope(conn: &Connection, ctx: &RequestContext, table: Table, filter: Filter) -> Result<Filter, HandlerErr> {
    if !TEACHER_TABLES.contains(&table) {
        return Err(HandlerErr::new(
            "forbidden",
            format!("teachers may not query {}", table.name()),
        ));
    }
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let classes: Vec<i64> = scope.class_ids().collect();
    if table == Table::Students {
        return Ok(filter.in_list("class_id", classes));
    }
    let students: Vec<i64> = gateway::find_all(conn, Table::Students, &Filter::new().in_list("class_id", classes))?
        .iter()
        .map(Record::id)
        .collect();
    Ok(filter.in_list("student_id", students))
}

fn query(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let table_name = text(params, "table").ok_or_else(|| HandlerErr::bad_params("missing table"))?;
    let table = Table::parse(&table_name)
        .ok_or_else(|| HandlerErr::bad_params(format!("unknown table `{table_name}`")))?;

    let mut filter = Filter::new();
    for raw in filter_triples(params)? {
        filter = apply_triple(table, filter, &raw)?;
    }
    if ctx.role() == Role::Guru {
        filter = teacher_scope(conn, ctx, table, filter)?;
    }

    if let Some(order) = text(params, "order") {
        let (column, direction) = order.split_once(',').unwrap_or((order.as_str(), "asc"));
        let column = column.trim();
        if !table.has_column(column) || (table == Table::Users && column == "password") {
            return Err(HandlerErr::bad_params(format!("cannot order by `{column}`")));
        }
        let descending = match direction.trim().to_ascii_lowercase().as_str() {
            "asc" => false,
            "desc" => true,
            other => return Err(HandlerErr::bad_params(format!("unknown order direction `{other}`"))),
        };
        filter = filter.order_by(column, descending);
    }
    if let Some(limit) = params.get("limit") {
        let Some(limit) = limit.as_i64().filter(|n| *n > 0) else {
            return Err(HandlerErr::bad_params("limit must be a positive integer"));
        };
        filter = filter.limit(limit.min(MAX_QUERY_LIMIT));
    }

    let rows: Vec<Value> = gateway::find_all(conn, table, &filter)?
        .into_iter()
        .map(|mut row| {
            row.remove("password");
            row.into_json()
        })
        .collect();
    tracing::debug!(table = table.name(), rows = rows.len(), "records.query");
    Ok(json!({ "table": table.name(), "count": rows.len(), "rows": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "records.query" => Some(with_role(state, req, &[Role::Admin, Role::Guru], query)),
        _ => None,
    }
}
