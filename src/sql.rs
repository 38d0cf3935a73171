use std::collections::HashMap;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    ProvisionRoom {
        id: Ulid,
        room_number: String,
        room_type: RoomType,
        floor: i32,
        rate: Decimal,
    },
    ListRooms,
    AvailableRooms {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    SetRoomStatus {
        room_id: Ulid,
        status: RoomStatus,
    },
    ListReservations,
    CreateReservation {
        request: NewReservation,
    },
    CheckIn {
        id: Ulid,
    },
    CheckOut {
        id: Ulid,
    },
    SearchGuests {
        query: String,
    },
    SearchDirectory {
        query: String,
    },
    Stats {
        as_of: Option<NaiveDate>,
    },
}

/// Row layout a statement answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Rooms,
    Reservations,
    Guests,
    Directory,
    Stats,
    /// Command tag only.
    Tag,
}

impl Command {
    pub fn shape(&self) -> Shape {
        match self {
            Command::ListRooms | Command::AvailableRooms { .. } => Shape::Rooms,
            Command::ListReservations
            | Command::CreateReservation { .. }
            | Command::CheckIn { .. }
            | Command::CheckOut { .. } => Shape::Reservations,
            Command::SearchGuests { .. } => Shape::Guests,
            Command::SearchDirectory { .. } => Shape::Directory,
            Command::Stats { .. } => Shape::Stats,
            Command::ProvisionRoom { .. } | Command::SetRoomStatus { .. } => Shape::Tag,
        }
    }
}

const ROOM_COLUMNS: &[&str] = &["id", "room_number", "room_type", "floor", "rate"];
const ROOM_STATUS_COLUMNS: &[&str] = &["room_id", "status"];
const RESERVATION_COLUMNS: &[&str] = &[
    "room_id",
    "check_in",
    "check_out",
    "total_amount",
    "guest_name",
    "guest_email",
    "guest_phone",
    "guest_id_number",
];
const TRANSITION_COLUMNS: &[&str] = &["reservation_id"];

fn parse_statement(sql: &str) -> Result<Statement, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts =
        Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts.swap_remove(0))
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    match parse_statement(sql)? {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape from the statement's target table alone, so statements with
/// unbound `$n` parameters can be described.
pub fn shape_of(sql: &str) -> Shape {
    let (is_select, table) = match parse_statement(sql) {
        Ok(Statement::Insert(insert)) => (false, insert_table_name(&insert)),
        Ok(Statement::Query(query)) => (true, select_table_name(&query)),
        _ => return Shape::Tag,
    };
    match (is_select, table.as_deref()) {
        (true, Ok("rooms" | "available_rooms")) => Shape::Rooms,
        (_, Ok("reservations")) | (false, Ok("check_ins" | "check_outs")) => Shape::Reservations,
        (true, Ok("guests")) => Shape::Guests,
        (true, Ok("directory")) => Shape::Directory,
        (true, Ok("stats")) => Shape::Stats,
        _ => Shape::Tag,
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row {
    table: &'static str,
    values: HashMap<String, Expr>,
}

impl Row {
    /// Columns come from the INSERT's column list, or positionally from `layout`.
    fn new(table: &'static str, insert: &ast::Insert, layout: &[&str]) -> Result<Self, SqlError> {
        let values = extract_insert_values(insert)?;
        let names: Vec<String> = if insert.columns.is_empty() {
            if values.len() > layout.len() {
                return Err(SqlError::WrongArity(table, layout.len(), values.len()));
            }
            layout.iter().map(|c| c.to_string()).collect()
        } else {
            if insert.columns.len() != values.len() {
                return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
            }
            insert.columns.iter().map(insert_column_name).collect()
        };
        Ok(Self {
            table,
            values: names.into_iter().zip(values).collect(),
        })
    }

    fn optional(&self, column: &'static str) -> Option<&Expr> {
        self.values.get(column).filter(|e| !is_null(e))
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.optional(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "rooms" => {
            let row = Row::new("rooms", insert, ROOM_COLUMNS)?;
            Ok(Command::ProvisionRoom {
                id: parse_ulid_expr(row.required("id")?)?,
                room_number: parse_string_expr(row.required("room_number")?)?,
                room_type: parse_enum_expr(row.required("room_type")?)?,
                floor: parse_i32_expr(row.required("floor")?)?,
                rate: parse_decimal_expr(row.required("rate")?)?,
            })
        }
        "room_status" => {
            let row = Row::new("room_status", insert, ROOM_STATUS_COLUMNS)?;
            Ok(Command::SetRoomStatus {
                room_id: parse_ulid_expr(row.required("room_id")?)?,
                status: parse_enum_expr(row.required("status")?)?,
            })
        }
        "reservations" => {
            let row = Row::new("reservations", insert, RESERVATION_COLUMNS)?;
            let guest = GuestInfo {
                full_name: row
                    .optional("guest_name")
                    .map(parse_string_expr)
                    .transpose()?
                    .unwrap_or_default(),
                email: row
                    .optional("guest_email")
                    .map(parse_string_expr)
                    .transpose()?
                    .unwrap_or_default(),
                phone: row.optional("guest_phone").map(parse_string_expr).transpose()?,
                id_number: row
                    .optional("guest_id_number")
                    .map(parse_string_expr)
                    .transpose()?,
            };
            Ok(Command::CreateReservation {
                request: NewReservation {
                    room_id: parse_ulid_expr(row.required("room_id")?)?,
                    check_in: parse_date_expr(row.required("check_in")?)?,
                    check_out: parse_date_expr(row.required("check_out")?)?,
                    guest,
                    total_amount: parse_decimal_expr(row.required("total_amount")?)?,
                },
            })
        }
        "check_ins" => {
            let row = Row::new("check_ins", insert, TRANSITION_COLUMNS)?;
            Ok(Command::CheckIn {
                id: parse_ulid_expr(row.required("reservation_id")?)?,
            })
        }
        "check_outs" => {
            let row = Row::new("check_outs", insert, TRANSITION_COLUMNS)?;
            Ok(Command::CheckOut {
                id: parse_ulid_expr(row.required("reservation_id")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let table = select_table_name(query)?;
    let mut filters = HashMap::new();
    if let SetExpr::Select(select) = query.body.as_ref()
        && let Some(selection) = &select.selection
    {
        collect_eq_filters(selection, &mut filters);
    }
    let filter = |col: &'static str| filters.get(col).copied();

    match table.as_str() {
        "rooms" => Ok(Command::ListRooms),
        "available_rooms" => Ok(Command::AvailableRooms {
            check_in: parse_date_expr(filter("check_in").ok_or(SqlError::MissingFilter("check_in"))?)?,
            check_out: parse_date_expr(filter("check_out").ok_or(SqlError::MissingFilter("check_out"))?)?,
        }),
        "reservations" => Ok(Command::ListReservations),
        "guests" => Ok(Command::SearchGuests {
            query: filter("q").map(parse_string_expr).transpose()?.unwrap_or_default(),
        }),
        "directory" => Ok(Command::SearchDirectory {
            query: filter("q").map(parse_string_expr).transpose()?.unwrap_or_default(),
        }),
        "stats" => Ok(Command::Stats {
            as_of: filter("as_of").map(parse_date_expr).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` comparisons joined by AND. Anything else is ignored.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut HashMap<String, &'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                out.insert(col, right);
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
    }
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

fn select_table_name(query: &ast::Query) -> Result<String, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    match &from.relation {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// Bare, lowercased column name from an INSERT column list entry.
fn insert_column_name(column: &impl std::fmt::Display) -> String {
    let text = column.to_string();
    let last = text.rsplit('.').next().unwrap_or(&text);
    last.trim_matches('"').to_lowercase()
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Text of a literal: quoted strings and bare numbers.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected literal, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    literal_text(expr)
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(s.trim()).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i32_expr(expr: &Expr) -> Result<i32, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i32_expr(expr)?);
    }
    let s = literal_text(expr)?;
    s.trim()
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}")))
}

fn parse_decimal_expr(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal_expr(expr)?);
    }
    let s = literal_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = literal_text(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s} (want YYYY-MM-DD): {e}")))
}

fn parse_enum_expr<T: FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    literal_text(expr)?.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, col) => write!(f, "{t}: missing value for {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
