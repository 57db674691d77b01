//! Record-level access to the workspace database.
//!
//! Every statement is assembled from a closed set of table and column names
//! and every caller-supplied value is bound positionally.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Map;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown column `{column}` on {table}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("refusing to {0} without a filter")]
    Unfiltered(&'static str),
    #[error("no fields to write")]
    NoFields,
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            GatewayError::Constraint(e.to_string())
        } else {
            GatewayError::Sqlite(e)
        }
    }
}

impl GatewayError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, GatewayError::Constraint(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Users,
    Admins,
    Teachers,
    Parents,
    Classes,
    Subjects,
    TeacherSubjects,
    Students,
    StudentParentRelations,
    Attendances,
    Grades,
    ReportCards,
}

impl Table {
    pub const ALL: [Table; 12] = [
        Table::Users,
        Table::Admins,
        Table::Teachers,
        Table::Parents,
        Table::Classes,
        Table::Subjects,
        Table::TeacherSubjects,
        Table::Students,
        Table::StudentParentRelations,
        Table::Attendances,
        Table::Grades,
        Table::ReportCards,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Admins => "admins",
            Table::Teachers => "teachers",
            Table::Parents => "parents",
            Table::Classes => "classes",
            Table::Subjects => "subjects",
            Table::TeacherSubjects => "teacher_subjects",
            Table::Students => "students",
            Table::StudentParentRelations => "student_parent_relations",
            Table::Attendances => "attendances",
            Table::Grades => "grades",
            Table::ReportCards => "report_cards",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Users => &["id", "username", "password", "role", "created_at"],
            Table::Admins => &["id", "user_id", "full_name"],
            Table::Teachers => &["id", "user_id", "nip", "full_name", "email", "phone_number"],
            Table::Parents => &["id", "user_id", "full_name", "email", "phone_number"],
            Table::Classes => &["id", "class_name", "homeroom_teacher_id"],
            Table::Subjects => &["id", "subject_name", "description"],
            Table::TeacherSubjects => &["id", "teacher_id", "subject_id", "class_id"],
            Table::Students => &[
                "id",
                "nis",
                "full_name",
                "gender",
                "birth_date",
                "address",
                "class_id",
            ],
            Table::StudentParentRelations => {
                &["id", "student_id", "parent_id", "relationship_type"]
            }
            Table::Attendances => &[
                "id",
                "student_id",
                "subject_id",
                "class_id",
                "date",
                "status",
                "notes",
            ],
            Table::Grades => &[
                "id",
                "student_id",
                "subject_id",
                "assessment_type",
                "score",
                "grade_date",
            ],
            Table::ReportCards => &[
                "id",
                "student_id",
                "semester",
                "academic_year",
                "homeroom_teacher_notes",
                "parent_reply_notes",
            ],
        }
    }

    pub fn parse(name: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    fn column(self, column: &str) -> Result<&'static str, GatewayError> {
        self.columns()
            .iter()
            .copied()
            .find(|c| *c == column)
            .ok_or_else(|| GatewayError::UnknownColumn {
                table: self.name(),
                column: column.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

impl Op {
    pub fn parse(raw: &str) -> Option<Op> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(Op::Eq),
            "neq" | "ne" => Some(Op::Neq),
            "lt" => Some(Op::Lt),
            "lte" | "le" => Some(Op::Lte),
            "gt" => Some(Op::Gt),
            "gte" | "ge" => Some(Op::Gte),
            "cs" => Some(Op::Contains),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Neq => "<>",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Contains => "LIKE",
        }
    }
}

#[derive(Debug, Clone)]
enum Cond {
    Compare {
        column: String,
        op: Op,
        value: Value,
    },
    /// `column IN (SELECT select FROM source WHERE key = value)`
    InSelect {
        column: String,
        source: Table,
        select: &'static str,
        key: &'static str,
        value: Value,
    },
    InList {
        column: String,
        values: Vec<Value>,
    },
}

/// Conjunction of conditions plus optional ordering and limit.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conds: Vec<Cond>,
    order: Option<(String, bool)>,
    limit: Option<i64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: i64) -> Self {
        Self::new().eq("id", id)
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.cmp(column, Op::Eq, value)
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.cmp(column, Op::Neq, value)
    }

    pub fn cmp(mut self, column: &str, op: Op, value: impl Into<Value>) -> Self {
        self.conds.push(Cond::Compare {
            column: column.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn in_select(
        mut self,
        column: &str,
        source: Table,
        select: &'static str,
        key: &'static str,
        value: impl Into<Value>,
    ) -> Self {
        self.conds.push(Cond::InSelect {
            column: column.to_string(),
            source,
            select,
            key,
            value: value.into(),
        });
        self
    }

    /// `column IN (values…)`; an empty list matches nothing.
    pub fn in_list(mut self, column: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        self.conds.push(Cond::InList {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some((column.to_string(), descending));
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conds.is_empty()
    }

    fn where_sql(&self, table: Table, binds: &mut Vec<Value>) -> Result<String, GatewayError> {
        if self.conds.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(self.conds.len());
        for cond in &self.conds {
            match cond {
                Cond::Compare { column, op, value } => {
                    let col = table.column(column)?;
                    match (op, value) {
                        (Op::Eq, Value::Null) => parts.push(format!("{col} IS NULL")),
                        (Op::Neq, Value::Null) => parts.push(format!("{col} IS NOT NULL")),
                        (Op::Contains, v) => {
                            parts.push(format!("{col} LIKE ? ESCAPE '\\'"));
                            binds.push(like_pattern(v));
                        }
                        (op, v) => {
                            parts.push(format!("{col} {} ?", op.sql()));
                            binds.push(v.clone());
                        }
                    }
                }
                Cond::InSelect {
                    column,
                    source,
                    select,
                    key,
                    value,
                } => {
                    let col = table.column(column)?;
                    let select = source.column(select)?;
                    let key = source.column(key)?;
                    parts.push(format!(
                        "{col} IN (SELECT {select} FROM {} WHERE {key} = ?)",
                        source.name()
                    ));
                    binds.push(value.clone());
                }
                Cond::InList { column, values } => {
                    let col = table.column(column)?;
                    if values.is_empty() {
                        parts.push("0 = 1".to_string());
                    } else {
                        parts.push(format!("{col} IN ({})", vec!["?"; values.len()].join(", ")));
                        binds.extend(values.iter().cloned());
                    }
                }
            }
        }
        Ok(format!(" WHERE {}", parts.join(" AND ")))
    }

    fn tail_sql(&self, table: Table, binds: &mut Vec<Value>) -> Result<String, GatewayError> {
        let mut sql = match &self.order {
            Some((column, descending)) => format!(
                " ORDER BY {} {}, id",
                table.column(column)?,
                if *descending { "DESC" } else { "ASC" }
            ),
            None => " ORDER BY id".to_string(),
        };
        if let Some(n) = self.limit {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Integer(n));
        }
        Ok(sql)
    }
}

fn like_pattern(v: &Value) -> Value {
    let raw = match v {
        Value::Text(s) => s.clone(),
        Value::Integer(n) => n.to_string(),
        Value::Real(f) => f.to_string(),
        _ => String::new(),
    };
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Value::Text(format!("%{escaped}%"))
}

/// One row, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record(Map<String, serde_json::Value>);

impl Record {
    pub fn id(&self) -> i64 {
        self.i64("id").unwrap_or(0)
    }

    pub fn i64(&self, column: &str) -> Option<i64> {
        self.0.get(column).and_then(|v| v.as_i64())
    }

    pub fn f64(&self, column: &str) -> Option<f64> {
        self.0.get(column).and_then(|v| v.as_f64())
    }

    pub fn str(&self, column: &str) -> Option<&str> {
        self.0.get(column).and_then(|v| v.as_str())
    }

    pub fn set(&mut self, column: &str, value: impl Into<serde_json::Value>) {
        self.0.insert(column.to_string(), value.into());
    }

    pub fn remove(&mut self, column: &str) {
        self.0.remove(column);
    }

    pub fn into_json(self) -> serde_json::Value {
        serde_json::Value::Object(self.0)
    }
}

fn record_from_row(row: &Row<'_>, names: &[String]) -> rusqlite::Result<Record> {
    let mut map = Map::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        let v = match row.get_ref(i)? {
            ValueRef::Null | ValueRef::Blob(_) => serde_json::Value::Null,
            ValueRef::Integer(n) => n.into(),
            ValueRef::Real(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        };
        map.insert(name.clone(), v);
    }
    Ok(Record(map))
}

pub type Fields<'a> = Vec<(&'a str, Value)>;

pub fn find_all(conn: &Connection, table: Table, filter: &Filter) -> Result<Vec<Record>, GatewayError> {
    let mut binds = Vec::new();
    let mut sql = format!("SELECT * FROM {}", table.name());
    sql.push_str(&filter.where_sql(table, &mut binds)?);
    sql.push_str(&filter.tail_sql(table, &mut binds)?);

    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt
        .query_map(params_from_iter(binds), |row| record_from_row(row, &names))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_one(conn: &Connection, table: Table, filter: &Filter) -> Result<Option<Record>, GatewayError> {
    let filter = filter.clone().limit(1);
    Ok(find_all(conn, table, &filter)?.into_iter().next())
}

pub fn exists(conn: &Connection, table: Table, filter: &Filter) -> Result<bool, GatewayError> {
    let mut binds = Vec::new();
    let sql = format!(
        "SELECT 1 FROM {}{} LIMIT 1",
        table.name(),
        filter.where_sql(table, &mut binds)?
    );
    let hit: Option<i64> = conn
        .query_row(&sql, params_from_iter(binds), |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub fn count(conn: &Connection, table: Table, filter: &Filter) -> Result<i64, GatewayError> {
    let mut binds = Vec::new();
    let sql = format!(
        "SELECT COUNT(*) FROM {}{}",
        table.name(),
        filter.where_sql(table, &mut binds)?
    );
    Ok(conn.query_row(&sql, params_from_iter(binds), |r| r.get(0))?)
}

/// Inserts one row and returns its rowid.
pub fn insert(conn: &Connection, table: Table, fields: &[(&str, Value)]) -> Result<i64, GatewayError> {
    if fields.is_empty() {
        return Err(GatewayError::NoFields);
    }
    let cols = fields
        .iter()
        .map(|(c, _)| table.column(c))
        .collect::<Result<Vec<_>, _>>()?;
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        table.name(),
        cols.join(", "),
        vec!["?"; cols.len()].join(", ")
    );
    conn.execute(&sql, params_from_iter(fields.iter().map(|(_, v)| v)))?;
    Ok(conn.last_insert_rowid())
}

pub fn update(
    conn: &Connection,
    table: Table,
    fields: &[(&str, Value)],
    filter: &Filter,
) -> Result<usize, GatewayError> {
    if fields.is_empty() {
        return Err(GatewayError::NoFields);
    }
    if filter.is_empty() {
        return Err(GatewayError::Unfiltered("update"));
    }
    let sets = fields
        .iter()
        .map(|(c, _)| table.column(c).map(|c| format!("{c} = ?")))
        .collect::<Result<Vec<_>, _>>()?;
    let mut binds: Vec<Value> = fields.iter().map(|(_, v)| v.clone()).collect();
    let sql = format!(
        "UPDATE {} SET {}{}",
        table.name(),
        sets.join(", "),
        filter.where_sql(table, &mut binds)?
    );
    Ok(conn.execute(&sql, params_from_iter(binds))?)
}

pub fn delete(conn: &Connection, table: Table, filter: &Filter) -> Result<usize, GatewayError> {
    if filter.is_empty() {
        return Err(GatewayError::Unfiltered("delete"));
    }
    let mut binds = Vec::new();
    let sql = format!(
        "DELETE FROM {}{}",
        table.name(),
        filter.where_sql(table, &mut binds)?
    );
    Ok(conn.execute(&sql, params_from_iter(binds))?)
}

/// Runs `f` inside a transaction; any error rolls everything back.
pub fn with_tx<T, E>(conn: &Connection, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
where
    E: From<GatewayError>,
{
    let tx = conn.unchecked_transaction().map_err(GatewayError::from)?;
    let out = f(&tx)?;
    tx.commit().map_err(GatewayError::from)?;
    Ok(out)
}

/// Splits a `field,operator,value` filter triple. The value may contain commas.
pub fn parse_triple(raw: &str) -> Result<(String, Op, String), String> {
    let mut parts = raw.splitn(3, ',');
    let field = parts.next().unwrap_or("").trim();
    let op = parts.next().unwrap_or("");
    let Some(value) = parts.next() else {
        return Err(format!("filter must be field,operator,value: {raw}"));
    };
    if field.is_empty() {
        return Err(format!("filter is missing a field: {raw}"));
    }
    let op = Op::parse(op).ok_or_else(|| format!("unknown filter operator: {}", op.trim()))?;
    Ok((field.to_string(), op, value.trim().to_string()))
}
