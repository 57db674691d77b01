use std::collections::BTreeSet;

use rusqlite::Connection;
use serde::Serialize;

use crate::gateway::{self, Filter, GatewayError, Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    pub subject_id: i64,
    pub class_id: i64,
}

/// What one teacher may touch: assigned subjects, the classes reachable
/// through any assignment, and the classes they are homeroom teacher of.
#[derive(Debug, Clone, Default)]
pub struct TeacherScope {
    pub teacher_id: i64,
    pub assignments: Vec<Assignment>,
    class_ids: BTreeSet<i64>,
    subject_ids: BTreeSet<i64>,
    homeroom_class_ids: BTreeSet<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum Denial {
    #[error("You do not have permission for this subject.")]
    Subject,
    #[error("Student not found.")]
    StudentNotFound,
    #[error("Student is not in a class you teach.")]
    StudentOutOfScope,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl TeacherScope {
    pub fn load(conn: &Connection, teacher_id: i64) -> Result<Self, GatewayError> {
        let assignments: Vec<Assignment> = gateway::find_all(
            conn,
            Table::TeacherSubjects,
            &Filter::new().eq("teacher_id", teacher_id),
        )?
        .iter()
        .filter_map(|r| {
            Some(Assignment {
                id: r.id(),
                subject_id: r.i64("subject_id")?,
                class_id: r.i64("class_id")?,
            })
        })
        .collect();

        let homeroom_class_ids = gateway::find_all(
            conn,
            Table::Classes,
            &Filter::new().eq("homeroom_teacher_id", teacher_id),
        )?
        .iter()
        .map(Record::id)
        .collect();

        Ok(Self {
            teacher_id,
            class_ids: assignments.iter().map(|a| a.class_id).collect(),
            subject_ids: assignments.iter().map(|a| a.subject_id).collect(),
            homeroom_class_ids,
            assignments,
        })
    }

    /// True iff the subject is assigned and, when given, the class is
    /// reachable through any assignment.
    pub fn may_act_on(&self, subject_id: i64, class_id: Option<i64>) -> bool {
        self.teaches_subject(subject_id) && class_id.map_or(true, |c| self.reaches_class(c))
    }

    pub fn teaches_subject(&self, subject_id: i64) -> bool {
        self.subject_ids.contains(&subject_id)
    }

    pub fn reaches_class(&self, class_id: i64) -> bool {
        self.class_ids.contains(&class_id)
    }

    pub fn is_homeroom_of(&self, class_id: i64) -> bool {
        self.homeroom_class_ids.contains(&class_id)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.class_ids.iter().copied()
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.subject_ids.iter().copied()
    }

    pub fn homeroom_class_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.homeroom_class_ids.iter().copied()
    }

    pub fn student_in_scope(&self, student: &Record) -> bool {
        student.i64("class_id").is_some_and(|c| self.reaches_class(c))
    }

    /// Loads the student and checks both the subject and the student's class.
    pub fn check_student(&self, conn: &Connection, subject_id: i64, student_id: i64) -> Result<Record, Denial> {
        if !self.teaches_subject(subject_id) {
            return Err(Denial::Subject);
        }
        let student = gateway::find_one(conn, Table::Students, &Filter::by_id(student_id))?
            .ok_or(Denial::StudentNotFound)?;
        if !self.student_in_scope(&student) {
            return Err(Denial::StudentOutOfScope);
        }
        Ok(student)
    }
}

pub fn teacher_may_act_on(
    conn: &Connection,
    teacher_id: i64,
    subject_id: i64,
    class_id: Option<i64>,
) -> Result<bool, GatewayError> {
    Ok(TeacherScope::load(conn, teacher_id)?.may_act_on(subject_id, class_id))
}
