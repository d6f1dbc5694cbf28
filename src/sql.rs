use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

const ENTRIES_TABLE: &str = "schedule_entries";
const CONFLICTS_TABLE: &str = "conflicts";

const ENTRY_COLUMNS: [&str; 10] = [
    "course_ref",
    "instructor_ref",
    "room",
    "building",
    "day_of_week",
    "start_time",
    "end_time",
    "effective_from",
    "effective_to",
    "notes",
];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// One row maps to `create`, several to `create_many`.
    InsertEntries {
        entries: Vec<NewEntry>,
        returning: bool,
    },
    UpdateEntry {
        id: Ulid,
        patch: EntryPatch,
    },
    DeactivateEntry {
        id: Ulid,
    },
    DeleteEntry {
        id: Ulid,
    },
    SelectEntries {
        filter: EntryFilter,
        active_only: bool,
    },
    SelectConflicts {
        candidate: NewEntry,
        exclude_id: Option<Ulid>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryFilter {
    All,
    Id(Ulid),
    Course(String),
    Instructor(String),
    Room { room: String, building: Option<String> },
    Day(DayOfWeek),
    Date(NaiveDate),
}

/// Column name to value expression, from a VALUES row, a SET list or a WHERE conjunction.
type Fields<'a> = HashMap<String, &'a Expr>;

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != ENTRIES_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    if insert.columns.is_empty() {
        return Err(SqlError::Parse("INSERT needs an explicit column list".into()));
    }
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();
    for col in &columns {
        if !ENTRY_COLUMNS.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(col.clone()));
        }
    }

    let rows = extract_all_insert_rows(insert)?;
    let mut entries = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity(ENTRIES_TABLE, columns.len(), row.len()));
        }
        let fields: Fields = columns.iter().cloned().zip(row.iter()).collect();
        let entry = new_entry(&fields).map_err(|e| match e {
            SqlError::Parse(msg) if rows.len() > 1 => SqlError::Parse(format!("row {i}: {msg}")),
            other => other,
        })?;
        entries.push(entry);
    }

    Ok(Command::InsertEntries {
        entries,
        returning: insert.returning.is_some(),
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != ENTRIES_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(selection)?;

    let mut fields = Fields::new();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        fields.insert(col, &assignment.value);
    }

    if let Some(active) = fields.remove("is_active") {
        if parse_bool(active)? {
            return Err(SqlError::Unsupported(
                "an inactive entry cannot be reactivated; insert a new one".into(),
            ));
        }
        if !fields.is_empty() {
            return Err(SqlError::Unsupported(
                "is_active = false cannot be combined with other columns".into(),
            ));
        }
        return Ok(Command::DeactivateEntry { id });
    }
    if fields.contains_key("id") {
        return Err(SqlError::Unsupported("id cannot be changed".into()));
    }

    Ok(Command::UpdateEntry {
        id,
        patch: entry_patch(&fields)?,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != ENTRIES_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteEntry { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut fields = Fields::new();
    if let Some(selection) = &select.selection {
        collect_equalities(selection, &mut fields)?;
    }

    match table.as_str() {
        ENTRIES_TABLE => {
            let active_only = match fields.remove("active_only") {
                Some(expr) => parse_bool(expr)?,
                None => true,
            };
            Ok(Command::SelectEntries {
                filter: entry_filter(&fields)?,
                active_only,
            })
        }
        CONFLICTS_TABLE => {
            let exclude_id = fields.remove("exclude_id").map(parse_ulid_expr).transpose()?;
            if let Some(col) = fields.keys().find(|c| !ENTRY_COLUMNS.contains(&c.as_str())) {
                return Err(SqlError::UnknownColumn(col.clone()));
            }
            Ok(Command::SelectConflicts {
                candidate: new_entry(&fields)?,
                exclude_id,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = 1 AND (b = 2 AND c = 3)` into a column map.
fn collect_equalities<'a>(expr: &'a Expr, out: &mut Fields<'a>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_equalities(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_equalities(left, out)?;
                collect_equalities(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                if out.insert(col.clone(), &**right).is_some() {
                    return Err(SqlError::Parse(format!("{col} filtered twice")));
                }
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

fn entry_filter(fields: &Fields) -> Result<EntryFilter, SqlError> {
    let mut names: Vec<&str> = fields.keys().map(String::as_str).collect();
    names.sort_unstable();
    let field = |name: &str| fields[name];

    match names.as_slice() {
        [] => Ok(EntryFilter::All),
        ["id"] => Ok(EntryFilter::Id(parse_ulid_expr(field("id"))?)),
        ["course_ref"] => Ok(EntryFilter::Course(parse_text(field("course_ref"))?)),
        ["instructor_ref"] => Ok(EntryFilter::Instructor(parse_text(field("instructor_ref"))?)),
        ["room"] => Ok(EntryFilter::Room {
            room: parse_text(field("room"))?,
            building: None,
        }),
        ["building", "room"] => Ok(EntryFilter::Room {
            room: parse_text(field("room"))?,
            building: Some(parse_text(field("building"))?),
        }),
        ["day_of_week"] => Ok(EntryFilter::Day(parse_day(field("day_of_week"))?)),
        ["on_date"] => Ok(EntryFilter::Date(parse_date(field("on_date"))?)),
        _ => Err(SqlError::Unsupported(format!(
            "filter combination: {}",
            names.join(", ")
        ))),
    }
}

fn new_entry(fields: &Fields) -> Result<NewEntry, SqlError> {
    let required = |col: &'static str| fields.get(col).copied().ok_or(SqlError::MissingColumn(col));
    let optional = |col: &str| fields.get(col).copied();

    Ok(NewEntry {
        course_ref: parse_text(required("course_ref")?)?,
        instructor_ref: optional("instructor_ref").map(parse_text_or_null).transpose()?.flatten(),
        room: optional("room").map(parse_text_or_null).transpose()?.flatten(),
        building: optional("building").map(parse_text_or_null).transpose()?.flatten(),
        day_of_week: parse_day(required("day_of_week")?)?,
        start_time: parse_time(required("start_time")?)?,
        end_time: parse_time(required("end_time")?)?,
        effective_from: parse_date(required("effective_from")?)?,
        effective_to: optional("effective_to").map(parse_date_or_null).transpose()?.flatten(),
        notes: optional("notes")
            .map(parse_text_or_null)
            .transpose()?
            .flatten()
            .unwrap_or_default(),
    })
}

fn entry_patch(fields: &Fields) -> Result<EntryPatch, SqlError> {
    let mut patch = EntryPatch::default();
    for (col, expr) in fields {
        match col.as_str() {
            "course_ref" => patch.course_ref = Some(parse_text(expr)?),
            "instructor_ref" => patch.instructor_ref = Some(parse_text_or_null(expr)?),
            "room" => patch.room = Some(parse_text_or_null(expr)?),
            "building" => patch.building = Some(parse_text_or_null(expr)?),
            "day_of_week" => patch.day_of_week = Some(parse_day(expr)?),
            "start_time" => patch.start_time = Some(parse_time(expr)?),
            "end_time" => patch.end_time = Some(parse_time(expr)?),
            "effective_from" => patch.effective_from = Some(parse_date(expr)?),
            "effective_to" => patch.effective_to = Some(parse_date_or_null(expr)?),
            "notes" => patch.notes = Some(parse_text_or_null(expr)?.unwrap_or_default()),
            other => return Err(SqlError::UnknownColumn(other.to_string())),
        }
    }
    Ok(patch)
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(&values.rows)
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_text(expr).map(Some),
    }
}

fn parse_day(expr: &Expr) -> Result<DayOfWeek, SqlError> {
    parse_text(expr)?.parse().map_err(SqlError::Validation)
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_text(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M"))
        .map_err(|e| SqlError::Parse(format!("bad time {s:?}: {e}")))
}

/// `YYYY-MM-DD`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

fn parse_date_or_null(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_date(expr).map(Some),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    /// A literal that parsed but is not a valid value, e.g. an unknown day name.
    Validation(ValidationError),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::Validation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn parse_insert_full_row() {
        let sql = "INSERT INTO schedule_entries (course_ref, instructor_ref, room, building, day_of_week, \
                   start_time, end_time, effective_from, effective_to, notes) \
                   VALUES ('CS101', 'EMP-7', 'A-101', 'Main', 'Monday', '09:00', '10:30', '2024-01-01', NULL, 'lab')";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertEntries { entries, returning } => {
                assert!(!returning);
                assert_eq!(
                    entries,
                    vec![NewEntry {
                        course_ref: "CS101".into(),
                        instructor_ref: Some("EMP-7".into()),
                        room: Some("A-101".into()),
                        building: Some("Main".into()),
                        day_of_week: DayOfWeek::Monday,
                        start_time: t(9, 0),
                        end_time: t(10, 30),
                        effective_from: d(2024, 1, 1),
                        effective_to: None,
                        notes: "lab".into(),
                    }]
                );
            }
            _ => panic!("expected InsertEntries, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_minimal_with_returning() {
        let sql = "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
                   VALUES ('CS101', 'tue', '13:15:00', '14:00', '2024-09-02') RETURNING *";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertEntries { entries, returning } => {
                assert!(returning);
                let e = &entries[0];
                assert_eq!(e.day_of_week, DayOfWeek::Tuesday);
                assert_eq!(e.start_time, t(13, 15));
                assert_eq!(e.instructor_ref, None);
                assert_eq!(e.notes, "");
            }
            _ => panic!("expected InsertEntries, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_multi_row_insert() {
        let sql = "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
                   VALUES ('CS101', 'mon', '09:00', '10:00', '2024-01-01'), \
                          ('CS101', 'wed', '09:00', '10:00', '2024-01-01'), \
                          ('CS101', 'fri', '09:00', '10:00', '2024-01-01')";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::InsertEntries { entries, .. } => {
                let days: Vec<_> = entries.iter().map(|e| e.day_of_week).collect();
                assert_eq!(days, vec![DayOfWeek::Monday, DayOfWeek::Wednesday, DayOfWeek::Friday]);
            }
            _ => panic!("expected InsertEntries, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_errors() {
        let no_columns = "INSERT INTO schedule_entries VALUES ('CS101')";
        assert!(matches!(parse_sql(no_columns), Err(SqlError::Parse(_))));

        let missing = "INSERT INTO schedule_entries (course_ref, day_of_week) VALUES ('CS101', 'mon')";
        assert!(matches!(parse_sql(missing), Err(SqlError::MissingColumn("start_time"))));

        let unknown_col = "INSERT INTO schedule_entries (course_ref, colour) VALUES ('CS101', 'red')";
        assert!(matches!(parse_sql(unknown_col), Err(SqlError::UnknownColumn(c)) if c == "colour"));

        let bad_day = "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
                       VALUES ('CS101', 'funday', '09:00', '10:00', '2024-01-01')";
        assert!(matches!(
            parse_sql(bad_day),
            Err(SqlError::Validation(ValidationError::UnknownDay(_)))
        ));

        let bad_time = "INSERT INTO schedule_entries (course_ref, day_of_week, start_time, end_time, effective_from) \
                        VALUES ('CS101', 'mon', '9am', '10:00', '2024-01-01')";
        assert!(matches!(parse_sql(bad_time), Err(SqlError::Parse(_))));

        let arity = "INSERT INTO schedule_entries (course_ref, room) VALUES ('CS101')";
        assert!(matches!(parse_sql(arity), Err(SqlError::WrongArity(_, 2, 1))));

        let table = "INSERT INTO bookings (course_ref) VALUES ('CS101')";
        assert!(matches!(parse_sql(table), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_update_patch() {
        let sql = format!(
            "UPDATE schedule_entries SET start_time = '10:00', room = NULL, effective_to = '2024-06-30' WHERE id = '{ID}'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateEntry { id, patch } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(
                    patch,
                    EntryPatch {
                        start_time: Some(t(10, 0)),
                        room: Some(None),
                        effective_to: Some(Some(d(2024, 6, 30))),
                        ..Default::default()
                    }
                );
            }
            _ => panic!("expected UpdateEntry, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_deactivate() {
        let sql = format!("UPDATE schedule_entries SET is_active = false WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeactivateEntry { .. }));

        let reactivate = format!("UPDATE schedule_entries SET is_active = true WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&reactivate), Err(SqlError::Unsupported(_))));

        let mixed = format!("UPDATE schedule_entries SET is_active = false, notes = 'x' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&mixed), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = "UPDATE schedule_entries SET notes = 'x' WHERE room = 'A-101'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_entry() {
        let sql = format!("DELETE FROM schedule_entries WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteEntry { id } => assert_eq!(id.to_string(), ID),
            cmd => panic!("expected DeleteEntry, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_filters() {
        let cases = [
            ("SELECT * FROM schedule_entries", EntryFilter::All, true),
            (
                "SELECT * FROM schedule_entries WHERE course_ref = 'CS101' AND active_only = false",
                EntryFilter::Course("CS101".into()),
                false,
            ),
            (
                "SELECT * FROM schedule_entries WHERE instructor_ref = 'EMP-7'",
                EntryFilter::Instructor("EMP-7".into()),
                true,
            ),
            (
                "SELECT * FROM schedule_entries WHERE room = 'A-101' AND building = 'Main'",
                EntryFilter::Room {
                    room: "A-101".into(),
                    building: Some("Main".into()),
                },
                true,
            ),
            (
                "SELECT * FROM schedule_entries WHERE room = 'A-101'",
                EntryFilter::Room {
                    room: "A-101".into(),
                    building: None,
                },
                true,
            ),
            (
                "SELECT * FROM schedule_entries WHERE day_of_week = 'wed'",
                EntryFilter::Day(DayOfWeek::Wednesday),
                true,
            ),
            (
                "SELECT * FROM schedule_entries WHERE on_date = '2024-03-04'",
                EntryFilter::Date(d(2024, 3, 4)),
                true,
            ),
        ];
        for (sql, expected_filter, expected_active) in cases {
            match parse_sql(sql).unwrap() {
                Command::SelectEntries { filter, active_only } => {
                    assert_eq!(filter, expected_filter, "{sql}");
                    assert_eq!(active_only, expected_active, "{sql}");
                }
                cmd => panic!("expected SelectEntries, got {cmd:?}"),
            }
        }
    }

    #[test]
    fn parse_select_by_id() {
        let sql = format!("SELECT * FROM schedule_entries WHERE id = '{ID}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::SelectEntries { filter: EntryFilter::Id(_), .. }
        ));
    }

    #[test]
    fn parse_select_rejects_unsupported_filters() {
        let combo = "SELECT * FROM schedule_entries WHERE room = 'A-101' AND day_of_week = 'mon'";
        assert!(matches!(parse_sql(combo), Err(SqlError::Unsupported(_))));

        let range = "SELECT * FROM schedule_entries WHERE start_time >= '09:00'";
        assert!(matches!(parse_sql(range), Err(SqlError::Unsupported(_))));

        let twice = "SELECT * FROM schedule_entries WHERE room = 'A' AND room = 'B'";
        assert!(matches!(parse_sql(twice), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_conflicts() {
        let sql = format!(
            "SELECT * FROM conflicts WHERE course_ref = 'CS101' AND room = 'A-101' AND day_of_week = 'mon' \
             AND start_time = '10:00' AND end_time = '11:00' AND effective_from = '2024-01-01' AND exclude_id = '{ID}'"
        );
        match parse_sql(&sql).unwrap() {
            Command::SelectConflicts { candidate, exclude_id } => {
                assert_eq!(candidate.room.as_deref(), Some("A-101"));
                assert_eq!(candidate.end_time, t(11, 0));
                assert_eq!(exclude_id.map(|id| id.to_string()).as_deref(), Some(ID));
            }
            cmd => panic!("expected SelectConflicts, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
