use rusqlite::Connection;
use serde_json::Value;

use super::attendance::save_batch;
use super::teacher::{delete_many, delete_one, scoped_record};
use crate::authz::TeacherScope;
use crate::bulk::{AssessmentType, BatchKind};
use crate::gateway::{self, Filter, Table};
use crate::ipc::helpers::{failure, required_id, success, text, with_role, Handler, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};

const KEY_TAKEN: &str = "A grade of this type already exists for this student on that date.";

fn grades_save_batch(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    save_batch(conn, ctx, params, BatchKind::Grade)
}

fn grades_edit(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let record_id = required_id(params, "id")?;
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    let grade = match scoped_record(conn, &scope, Table::Grades, record_id)? {
        Ok(grade) => grade,
        Err(reason) => return Ok(failure(reason)),
    };

    let score = match params.get("score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let Some(score) = score.filter(|s| s.is_finite()) else {
        return Ok(failure("Score must be a number."));
    };
    if !(0.0..=100.0).contains(&score) {
        return Ok(failure("Score must be between 0 and 100."));
    }
    let assessment_type = match text(params, "assessment_type") {
        None => grade
            .str("assessment_type")
            .and_then(AssessmentType::parse)
            .unwrap_or(AssessmentType::Tugas),
        Some(raw) => match AssessmentType::parse(&raw) {
            Some(t) => t,
            None => return Ok(failure(format!("Invalid assessment type `{raw}`."))),
        },
    };

    let clash = Filter::new()
        .eq("student_id", grade.i64("student_id").unwrap_or(0))
        .eq("subject_id", grade.i64("subject_id").unwrap_or(0))
        .eq("assessment_type", assessment_type.as_str().to_string())
        .eq("grade_date", grade.str("grade_date").unwrap_or_default().to_string())
        .neq("id", record_id);
    if gateway::exists(conn, Table::Grades, &clash)? {
        return Ok(failure(KEY_TAKEN));
    }
    let updated = gateway::update(
        conn,
        Table::Grades,
        &[
            ("score", score.into()),
            ("assessment_type", assessment_type.as_str().to_string().into()),
        ],
        &Filter::by_id(record_id),
    );
    match updated {
        Ok(_) => Ok(success("Grade updated.")),
        Err(e) if e.is_constraint() => Ok(failure(KEY_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

fn grades_delete(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    delete_one(conn, ctx, Table::Grades, required_id(params, "id")?)
}

fn grades_bulk_delete(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    delete_many(conn, ctx, params, Table::Grades)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: Handler = match req.method.as_str() {
        "grades.saveBatch" => grades_save_batch,
        "grades.edit" => grades_edit,
        "grades.delete" => grades_delete,
        "grades.bulkDelete" => grades_bulk_delete,
        _ => return None,
    };
    Some(with_role(state, req, &[Role::Guru], handler))
}
