use rusqlite::Connection;
use serde_json::{json, Value};

use crate::authz::TeacherScope;
use crate::gateway::{self, Filter, Table};
use crate::ipc::helpers::{
    failure, id, invalid, require_row, required_id, success, success_with, text, with_role,
    Handler, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RequestContext, Role};
use crate::validate::Checks;

const CARD_TAKEN: &str = "A report card for this student, semester and academic year already exists.";

/// `(student_id, semester, academic_year)`; problems go to `checks`.
fn read_card_key(
    conn: &Connection,
    params: &Value,
    checks: &mut Checks,
) -> Result<Option<(i64, String, String)>, HandlerErr> {
    let student_id = id(params, "student_id");
    if student_id.is_none() {
        checks.push("Student is required.");
    }
    let semester = checks.require("Semester", text(params, "semester"));
    let academic_year = checks.require("Academic year", text(params, "academic_year"));
    if let Some(sid) = student_id {
        if !gateway::exists(conn, Table::Students, &Filter::by_id(sid))? {
            checks.push("Student not found.");
        }
    }
    Ok(match (student_id, semester, academic_year) {
        (Some(s), Some(sem), Some(year)) if checks.is_empty() => Some((s, sem, year)),
        _ => None,
    })
}

fn card_filter(student_id: i64, semester: &str, academic_year: &str) -> Filter {
    Filter::new()
        .eq("student_id", student_id)
        .eq("semester", semester.to_string())
        .eq("academic_year", academic_year.to_string())
}

fn card_create(conn: &Connection, _ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let Some((student_id, semester, academic_year)) = read_card_key(conn, params, &mut checks)? else {
        return Ok(invalid(checks.into_errors()));
    };
    let inserted = gateway::insert(
        conn,
        Table::ReportCards,
        &[
            ("student_id", student_id.into()),
            ("semester", semester.into()),
            ("academic_year", academic_year.into()),
            ("homeroom_teacher_notes", text(params, "homeroom_teacher_notes").into()),
        ],
    );
    match inserted {
        Ok(id) => Ok(success_with("Report card added.", json!({ "id": id }))),
        Err(e) if e.is_constraint() => Ok(failure(CARD_TAKEN)),
        Err(e) => Err(e.into()),
    }
}

/// Homeroom notes, written by the homeroom teacher of the student's class.
/// The card is created on first save.
fn card_save_notes(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let mut checks = Checks::new();
    let Some((student_id, semester, academic_year)) = read_card_key(conn, params, &mut checks)? else {
        return Ok(invalid(checks.into_errors()));
    };
    let student = require_row(conn, Table::Students, student_id, "student")?;
    let scope = TeacherScope::load(conn, ctx.profile_id())?;
    if !student.i64("class_id").is_some_and(|c| scope.is_homeroom_of(c)) {
        return Ok(failure("Only the homeroom teacher of this student's class may write these notes."));
    }

    let notes = text(params, "homeroom_teacher_notes");
    let key = card_filter(student_id, &semester, &academic_year);
    let card_id = match gateway::find_one(conn, Table::ReportCards, &key)? {
        Some(card) => {
            gateway::update(
                conn,
                Table::ReportCards,
                &[("homeroom_teacher_notes", notes.into())],
                &Filter::by_id(card.id()),
            )?;
            card.id()
        }
        None => gateway::insert(
            conn,
            Table::ReportCards,
            &[
                ("student_id", student_id.into()),
                ("semester", semester.into()),
                ("academic_year", academic_year.into()),
                ("homeroom_teacher_notes", notes.into()),
            ],
        )?,
    };
    Ok(success_with("Report card notes saved.", json!({ "id": card_id })))
}

/// Parent reply on a report card of one of their own children.
fn card_save_reply(conn: &Connection, ctx: &RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let card_id = required_id(params, "id")?;
    let card = require_row(conn, Table::ReportCards, card_id, "report card")?;
    let related = Filter::new()
        .eq("parent_id", ctx.profile_id())
        .eq("student_id", card.i64("student_id").unwrap_or(0));
    if !gateway::exists(conn, Table::StudentParentRelations, &related)? {
        tracing::info!(parent_id = ctx.profile_id(), card_id, "reply refused: unrelated child");
        return Ok(failure("This report card does not belong to your child."));
    }
    gateway::update(
        conn,
        Table::ReportCards,
        &[("parent_reply_notes", text(params, "parent_reply_notes").into())],
        &Filter::by_id(card_id),
    )?;
    Ok(success("Reply saved."))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let (handler, role) = match req.method.as_str() {
        "reportCards.create" => (card_create as Handler, Role::Admin),
        "reportCards.saveNotes" => (card_save_notes as Handler, Role::Guru),
        "reportCards.saveReply" => (card_save_reply as Handler, Role::Orangtua),
        _ => return None,
    };
    Some(with_role(state, req, &[role], handler))
}
