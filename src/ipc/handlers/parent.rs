use std::collections::BTreeMap;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::gateway::{self, Filter, Record, Table};
use crate::ipc::helpers::{failure, required_id, with_role, Handler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};

fn subject_names(conn: &Connection) -> Result<BTreeMap<i64, String>, HandlerErr> {
    Ok(gateway::find_all(conn, Table::Subjects, &Filter::new())?
        .into_iter()
        .map(|s| (s.id(), s.str("subject_name").unwrap_or_default().to_string()))
        .collect())
}

fn with_subject_name(mut record: Record, names: &BTreeMap<i64, String>) -> Value {
    let name = record
        .i64("subject_id")
        .and_then(|id| names.get(&id).cloned());
    record.set("subject_name", name);
    record.into_json()
}

fn children(conn: &Connection, ctx: &RequestContext, _params: &Value) -> Result<Value, HandlerErr> {
    let relations = gateway::find_all(
        conn,
        Table::StudentParentRelations,
        &Filter::new().eq("parent_id", ctx.profile_id()),
    )?;
    let mut out = Vec::with_capacity(relations.len());
    for relation in relations {
        let Some(mut student) = gateway::find_one(
            conn,
            Table::Students,
            &Filter::by_id(relation.i64("student_id").unwrap_or(0)),
        )?
        else {
            continue;
        };
        let class_name = gateway::find_one(
            conn,
            Table::Classes,
            &Filter::by_id(student.i64("class_id").unwrap_or(0)),
        )?
        .and_then(|c| c.str("class_name").map(str::to_string));
        student.set("class_name", class_name);
        student.set(
            "relationship_type",
            relation.str("relationship_type").map(str::to_string),
        );
        out.push(student.into_json());
    }
    Ok(json!({ "children": out }))
}

fn child_records(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_id(params, "student_id")?;
    let related = Filter::new()
        .eq("parent_id", ctx.profile_id())
        .eq("student_id", student_id);
    if !gateway::exists(conn, Table::StudentParentRelations, &related)? {
        return Ok(failure("This student is not your child."));
    }

    let names = subject_names(conn)?;
    let by_student = Filter::new().eq("student_id", student_id);
    let attendances = gateway::find_all(
        conn,
        Table::Attendances,
        &by_student.clone().order_by("date", true),
    )?;
    let grades = gateway::find_all(
        conn,
        Table::Grades,
        &by_student.clone().order_by("grade_date", true),
    )?;
    let report_cards = gateway::find_all(
        conn,
        Table::ReportCards,
        &by_student.order_by("academic_year", true),
    )?;

    let mut status_counts: BTreeMap<String, usize> = ["hadir", "sakit", "izin", "alpa"]
        .into_iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for a in &attendances {
        if let Some(status) = a.str("status") {
            *status_counts.entry(status.to_string()).or_default() += 1;
        }
    }
    let scores: Vec<f64> = grades.iter().filter_map(|g| g.f64("score")).collect();
    let average = (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

    Ok(json!({
        "success": true,
        "attendances": attendances.into_iter().map(|a| with_subject_name(a, &names)).collect::<Vec<_>>(),
        "grades": grades.into_iter().map(|g| with_subject_name(g, &names)).collect::<Vec<_>>(),
        "reportCards": report_cards.into_iter().map(Record::into_json).collect::<Vec<_>>(),
        "attendanceSummary": status_counts,
        "averageScore": average,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "parent.children" => children,
        "parent.childRecords" => child_records,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Orangtua], handler))
}
