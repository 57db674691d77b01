use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

use crate::session;

pub const DB_FILE_NAME: &str = "siap.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace {}", workspace.display()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open {}", db_path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates missing tables and indexes and migrates older layouts in place.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL UNIQUE,
            nip TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            email TEXT,
            phone_number TEXT,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            full_name TEXT NOT NULL,
            email TEXT,
            phone_number TEXT
        )",
        [],
    )?;
    // Parents created before login accounts existed have no user_id.
    ensure_parents_user_id(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_name TEXT NOT NULL,
            homeroom_teacher_id INTEGER,
            FOREIGN KEY(homeroom_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_name TEXT NOT NULL,
            description TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            teacher_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            class_id INTEGER NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(teacher_id, subject_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_subjects_teacher ON teacher_subjects(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            nis TEXT NOT NULL UNIQUE,
            full_name TEXT NOT NULL,
            gender TEXT NOT NULL,
            birth_date TEXT,
            address TEXT,
            class_id INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_parent_relations(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            parent_id INTEGER NOT NULL,
            relationship_type TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            UNIQUE(student_id, parent_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendances(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'hadir',
            notes TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    ensure_attendances_class_id(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            assessment_type TEXT NOT NULL DEFAULT 'tugas',
            score REAL NOT NULL,
            grade_date TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS report_cards(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            semester TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            homeroom_teacher_notes TEXT,
            parent_reply_notes TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // Natural keys were not enforced by older databases; collapse duplicates
    // onto the newest row before the unique indexes go in.
    dedupe_natural_keys(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendances_natural
         ON attendances(student_id, subject_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_grades_natural
         ON grades(student_id, subject_id, assessment_type, grade_date)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_report_cards_natural
         ON report_cards(student_id, semester, academic_year)",
        [],
    )?;

    Ok(())
}

fn ensure_parents_user_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "parents", "user_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE parents ADD COLUMN user_id INTEGER REFERENCES users(id)",
        [],
    )?;
    Ok(())
}

fn ensure_attendances_class_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendances", "class_id")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE attendances ADD COLUMN class_id INTEGER", [])?;
    conn.execute(
        "UPDATE attendances
         SET class_id = (SELECT s.class_id FROM students s WHERE s.id = attendances.student_id)",
        [],
    )?;
    Ok(())
}

fn dedupe_natural_keys(conn: &Connection) -> anyhow::Result<()> {
    let removed_attendance = conn.execute(
        "DELETE FROM attendances WHERE id NOT IN (
            SELECT MAX(id) FROM attendances GROUP BY student_id, subject_id, date
        )",
        [],
    )?;
    let removed_grades = conn.execute(
        "DELETE FROM grades WHERE id NOT IN (
            SELECT MAX(id) FROM grades
            GROUP BY student_id, subject_id, assessment_type, grade_date
        )",
        [],
    )?;
    let removed_cards = conn.execute(
        "DELETE FROM report_cards WHERE id NOT IN (
            SELECT MAX(id) FROM report_cards GROUP BY student_id, semester, academic_year
        )",
        [],
    )?;
    if removed_attendance + removed_grades + removed_cards > 0 {
        tracing::warn!(
            attendances = removed_attendance,
            grades = removed_grades,
            report_cards = removed_cards,
            "dropped duplicate natural-key rows"
        );
    }
    Ok(())
}

/// Seeds an `admin` account when the workspace has no users yet.
pub fn seed_bootstrap_admin(conn: &Connection, password: &str) -> anyhow::Result<bool> {
    let users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if users > 0 {
        return Ok(false);
    }
    let hash = session::hash_password(password)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO users(username, password, role) VALUES('admin', ?, 'admin')",
        [&hash],
    )?;
    let user_id = tx.last_insert_rowid();
    tx.execute(
        "INSERT INTO admins(user_id, full_name) VALUES(?, 'Administrator')",
        [user_id],
    )?;
    tx.commit()?;
    Ok(true)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first");
        init_schema(&conn).expect("second");
        assert!(table_has_column(&conn, "attendances", "class_id").unwrap());
        assert!(table_has_column(&conn, "parents", "user_id").unwrap());
    }

    #[test]
    fn old_attendance_layout_gets_class_id_backfilled() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE classes(id INTEGER PRIMARY KEY AUTOINCREMENT, class_name TEXT NOT NULL, homeroom_teacher_id INTEGER);
             CREATE TABLE students(id INTEGER PRIMARY KEY AUTOINCREMENT, nis TEXT NOT NULL UNIQUE, full_name TEXT NOT NULL,
                 gender TEXT NOT NULL, birth_date TEXT, address TEXT, class_id INTEGER NOT NULL);
             CREATE TABLE subjects(id INTEGER PRIMARY KEY AUTOINCREMENT, subject_name TEXT NOT NULL, description TEXT);
             CREATE TABLE attendances(id INTEGER PRIMARY KEY AUTOINCREMENT, student_id INTEGER NOT NULL,
                 subject_id INTEGER NOT NULL, date TEXT NOT NULL, status TEXT NOT NULL, notes TEXT);
             INSERT INTO classes(class_name) VALUES('7A');
             INSERT INTO students(nis, full_name, gender, class_id) VALUES('1', 'Ani', 'P', 1);
             INSERT INTO subjects(subject_name) VALUES('Math');
             INSERT INTO attendances(student_id, subject_id, date, status) VALUES(1, 1, '2024-01-05', 'hadir');
             INSERT INTO attendances(student_id, subject_id, date, status) VALUES(1, 1, '2024-01-05', 'sakit');",
        )
        .expect("legacy layout");

        init_schema(&conn).expect("migrate");

        let (count, class_id, status): (i64, i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(class_id), MAX(status) FROM attendances",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(class_id, 1);
        assert_eq!(status, "sakit");
    }

    #[test]
    fn bootstrap_admin_seeds_once() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).unwrap();
        assert!(seed_bootstrap_admin(&conn, "secret1").unwrap());
        assert!(!seed_bootstrap_admin(&conn, "secret1").unwrap());
        let admins: i64 = conn
            .query_row("SELECT COUNT(*) FROM admins", [], |r| r.get(0))
            .unwrap();
        assert_eq!(admins, 1);
    }
}
