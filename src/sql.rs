use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::Token;
use ulid::Ulid;

use crate::model::*;

const ROOM_COLUMNS: &[&str] = &[
    "id",
    "number",
    "room_type",
    "capacity",
    "price",
    "status",
    "description",
];
const GUEST_COLUMNS: &[&str] = &["id", "full_name", "email", "phone_number"];
const BOOKING_COLUMNS: &[&str] = &[
    "id",
    "room_id",
    "guest_id",
    "check_in",
    "check_out",
    "notes",
    "total_price",
];
const SERVICE_COLUMNS: &[&str] = &["id", "name", "description", "price", "is_active"];

/// Server-maintained booking columns. Assignments to them are dropped.
const BOOKING_IGNORED_COLUMNS: &[&str] = &["total_price", "created_at", "updated_at"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        room: NewRoom,
        returning: bool,
    },
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
        returning: bool,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        id: Option<Ulid>,
        status: Option<RoomStatus>,
    },
    SelectAvailableRooms {
        start: NaiveDate,
        end: NaiveDate,
        status: Option<RoomStatus>,
    },
    SelectAvailability {
        room_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    },
    InsertGuest {
        guest: NewGuest,
        returning: bool,
    },
    UpdateGuest {
        id: Ulid,
        patch: GuestPatch,
        returning: bool,
    },
    DeleteGuest {
        id: Ulid,
    },
    SelectGuests {
        id: Option<Ulid>,
    },
    InsertBooking {
        booking: NewBooking,
        returning: bool,
    },
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
        returning: bool,
    },
    /// `UPDATE bookings SET status = ...`: a lifecycle transition, not a patch.
    SetBookingStatus {
        id: Ulid,
        status: BookingStatus,
        returning: bool,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        id: Option<Ulid>,
        room_id: Option<Ulid>,
        guest_id: Option<Ulid>,
    },
    InsertService {
        service: NewService,
        returning: bool,
    },
    UpdateService {
        id: Ulid,
        patch: ServicePatch,
        returning: bool,
    },
    DeleteService {
        id: Ulid,
    },
    SelectServices {
        id: Option<Ulid>,
        is_active: Option<bool>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.chars().all(|c| c == ';' || c.is_whitespace()) {
        return Err(SqlError::Empty);
    }
    if trimmed
        .split_whitespace()
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("UPDATE"))
    {
        return parse_update(trimmed);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row {
    table: &'static str,
    values: Vec<(&'static str, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.values
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, e)| e)
    }

    fn required(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column)
            .ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let returning = insert.returning.is_some();

    match table.as_str() {
        "rooms" => {
            let row = insert_row(insert, "rooms", ROOM_COLUMNS)?;
            let room = NewRoom {
                id: parse_ulid_expr(row.required("id")?)?,
                number: parse_text(row.required("number")?)?,
                room_type: parse_text(row.required("room_type")?)?,
                capacity: row.get("capacity").map(parse_u32).transpose()?.unwrap_or(1),
                price: parse_decimal(row.required("price")?)?,
                status: row
                    .get("status")
                    .map(parse_room_status)
                    .transpose()?
                    .unwrap_or_default(),
                description: optional(&row, "description", parse_text_or_null)?
                    .unwrap_or_default(),
            };
            Ok(Command::InsertRoom { room, returning })
        }
        "guests" => {
            let row = insert_row(insert, "guests", GUEST_COLUMNS)?;
            let guest = NewGuest {
                id: parse_ulid_expr(row.required("id")?)?,
                full_name: parse_text(row.required("full_name")?)?,
                email: parse_text(row.required("email")?)?,
                phone_number: optional(&row, "phone_number", parse_text_or_null)?,
            };
            Ok(Command::InsertGuest { guest, returning })
        }
        "bookings" => {
            let row = insert_row(insert, "bookings", BOOKING_COLUMNS)?;
            let booking = NewBooking {
                id: parse_ulid_expr(row.required("id")?)?,
                room_id: parse_ulid_expr(row.required("room_id")?)?,
                guest_id: parse_ulid_expr(row.required("guest_id")?)?,
                check_in: parse_date(row.required("check_in")?)?,
                check_out: parse_date(row.required("check_out")?)?,
                notes: optional(&row, "notes", parse_text_or_null)?,
                total_price: optional(&row, "total_price", parse_decimal_or_null)?,
            };
            Ok(Command::InsertBooking { booking, returning })
        }
        "services" => {
            let row = insert_row(insert, "services", SERVICE_COLUMNS)?;
            let service = NewService {
                id: parse_ulid_expr(row.required("id")?)?,
                name: parse_text(row.required("name")?)?,
                description: optional(&row, "description", parse_text_or_null)?
                    .unwrap_or_default(),
                price: optional(&row, "price", parse_decimal_or_null)?.unwrap_or(Decimal::ZERO),
                is_active: row.get("is_active").map(parse_bool).transpose()?.unwrap_or(true),
            };
            Ok(Command::InsertService { service, returning })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// An absent column and an explicit NULL both read as `None`.
fn optional<T>(
    row: &Row,
    column: &str,
    parse: fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match row.get(column) {
        Some(expr) => parse(expr),
        None => Ok(None),
    }
}

/// Pair the VALUES of a single-row INSERT with their columns: the explicit
/// column list if there is one, otherwise `columns` in order.
fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    columns: &[&'static str],
) -> Result<Row, SqlError> {
    let values = extract_insert_values(insert)?;

    let names: Vec<&'static str> = if insert.columns.is_empty() {
        if values.len() > columns.len() {
            return Err(SqlError::WrongArity(table, columns.len(), values.len()));
        }
        columns[..values.len()].to_vec()
    } else {
        if insert.columns.len() != values.len() {
            return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
        }
        let mut names = Vec::with_capacity(insert.columns.len());
        for ident in &insert.columns {
            let name = ident.value.to_lowercase();
            let known = columns
                .iter()
                .copied()
                .find(|c| *c == name)
                .ok_or_else(|| SqlError::UnknownColumn(table, name.clone()))?;
            if names.contains(&known) {
                return Err(SqlError::Parse(format!("column {known} given twice")));
            }
            names.push(known);
        }
        names
    };

    Ok(Row {
        table,
        values: names.into_iter().zip(values).collect(),
    })
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE <table> SET col = expr, ... [WHERE ...] [RETURNING ...]`, read
/// straight off the token stream.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;

    if !parser.parse_keyword(Keyword::UPDATE) {
        return Err(SqlError::Parse("expected UPDATE".into()));
    }
    let name = parser.parse_object_name(false).map_err(parse_err)?;
    let table = object_name_last(&name).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    if !parser.parse_keyword(Keyword::SET) {
        return Err(SqlError::Parse("expected SET".into()));
    }
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_err)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_err)?)
    } else {
        None
    };
    let returning = parser.parse_keyword(Keyword::RETURNING);
    if returning {
        parser
            .parse_comma_separated(Parser::parse_select_item)
            .map_err(parse_err)?;
    }
    parser.consume_token(&Token::SemiColon);
    let next = parser.peek_token().token;
    if next != Token::EOF {
        return Err(SqlError::Parse(format!("unexpected {next} after UPDATE")));
    }

    let mut sets: Vec<(String, Expr)> = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        }
        .ok_or_else(|| SqlError::Unsupported(format!("assignment target {:?}", assignment.target)))?;
        if column == "id" {
            return Err(SqlError::Unsupported("id cannot be changed".into()));
        }
        if sets.iter().any(|(c, _)| *c == column) {
            return Err(SqlError::Parse(format!("column {column} assigned twice")));
        }
        sets.push((column, assignment.value));
    }
    let id = extract_where_id(&selection)?;

    match table.as_str() {
        "rooms" => {
            let mut patch = RoomPatch::default();
            for (column, value) in &sets {
                match column.as_str() {
                    "number" => patch.number = Some(parse_text(value)?),
                    "room_type" => patch.room_type = Some(parse_text(value)?),
                    "capacity" => patch.capacity = Some(parse_u32(value)?),
                    "price" => patch.price = Some(parse_decimal(value)?),
                    "status" => patch.status = Some(parse_room_status(value)?),
                    "description" => {
                        patch.description = Some(parse_text_or_null(value)?.unwrap_or_default())
                    }
                    _ => return Err(SqlError::UnknownColumn("rooms", column.clone())),
                }
            }
            Ok(Command::UpdateRoom { id, patch, returning })
        }
        "guests" => {
            let mut patch = GuestPatch::default();
            for (column, value) in &sets {
                match column.as_str() {
                    "full_name" => patch.full_name = Some(parse_text(value)?),
                    "email" => patch.email = Some(parse_text(value)?),
                    "phone_number" => patch.phone_number = Some(parse_text_or_null(value)?),
                    _ => return Err(SqlError::UnknownColumn("guests", column.clone())),
                }
            }
            Ok(Command::UpdateGuest { id, patch, returning })
        }
        "bookings" => parse_booking_update(id, &sets, returning),
        "services" => {
            let mut patch = ServicePatch::default();
            for (column, value) in &sets {
                match column.as_str() {
                    "name" => patch.name = Some(parse_text(value)?),
                    "description" => {
                        patch.description = Some(parse_text_or_null(value)?.unwrap_or_default())
                    }
                    "price" => patch.price = Some(parse_decimal(value)?),
                    "is_active" => patch.is_active = Some(parse_bool(value)?),
                    _ => return Err(SqlError::UnknownColumn("services", column.clone())),
                }
            }
            Ok(Command::UpdateService { id, patch, returning })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_booking_update(
    id: Ulid,
    sets: &[(String, Expr)],
    returning: bool,
) -> Result<Command, SqlError> {
    let sets: Vec<&(String, Expr)> = sets
        .iter()
        .filter(|(c, _)| !BOOKING_IGNORED_COLUMNS.contains(&c.as_str()))
        .collect();

    if let Some((_, value)) = sets.iter().find(|(c, _)| c == "status") {
        if sets.len() > 1 {
            return Err(SqlError::Unsupported(
                "status cannot be set together with other booking columns".into(),
            ));
        }
        let status = parse_booking_status(value)?;
        return Ok(Command::SetBookingStatus { id, status, returning });
    }

    let mut patch = BookingPatch::default();
    for (column, value) in sets {
        match column.as_str() {
            "room_id" => patch.room_id = Some(parse_ulid_expr(value)?),
            "guest_id" => patch.guest_id = Some(parse_ulid_expr(value)?),
            "check_in" => patch.check_in = Some(parse_date(value)?),
            "check_out" => patch.check_out = Some(parse_date(value)?),
            "notes" => patch.notes = Some(parse_text_or_null(value)?.unwrap_or_default()),
            _ => return Err(SqlError::UnknownColumn("bookings", column.clone())),
        }
    }
    Ok(Command::UpdateBooking { id, patch, returning })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "guests" => Ok(Command::DeleteGuest { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        "services" => Ok(Command::DeleteService { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    GtEq,
    LtEq,
}

/// One `column <op> value` term of an AND-only WHERE clause.
struct Filter<'e> {
    column: String,
    op: Op,
    value: &'e Expr,
}

struct Filters<'e> {
    terms: Vec<Filter<'e>>,
}

impl<'e> Filters<'e> {
    fn new(
        table: &'static str,
        selection: Option<&'e Expr>,
        allowed: &[(&str, Op)],
    ) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_filters(expr, &mut terms)?;
        }
        for term in &terms {
            if !allowed
                .iter()
                .any(|(c, op)| *c == term.column && *op == term.op)
            {
                return Err(SqlError::Unsupported(format!(
                    "filter on {table}.{} ({:?})",
                    term.column, term.op
                )));
            }
        }
        Ok(Self { terms })
    }

    fn find(&self, column: &str, op: Op) -> Option<&'e Expr> {
        self.terms
            .iter()
            .find(|t| t.column == column && t.op == op)
            .map(|t| t.value)
    }

    fn id(&self, column: &str) -> Result<Option<Ulid>, SqlError> {
        self.find(column, Op::Eq).map(parse_ulid_expr).transpose()
    }

    fn required(&self, column: &'static str, op: Op) -> Result<&'e Expr, SqlError> {
        self.find(column, op).ok_or(SqlError::MissingFilter(column))
    }
}

fn collect_filters<'e>(expr: &'e Expr, out: &mut Vec<Filter<'e>>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp { left, op, right } => {
            let op = match op {
                ast::BinaryOperator::Eq => Op::Eq,
                ast::BinaryOperator::GtEq => Op::GtEq,
                ast::BinaryOperator::LtEq => Op::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push(Filter {
                column,
                op,
                value: right,
            });
            Ok(())
        }
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
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
    let selection = select.selection.as_ref();

    match table.as_str() {
        "rooms" => {
            let f = Filters::new("rooms", selection, &[("id", Op::Eq), ("status", Op::Eq)])?;
            Ok(Command::SelectRooms {
                id: f.id("id")?,
                status: f.find("status", Op::Eq).map(parse_room_status).transpose()?,
            })
        }
        "available_rooms" => {
            let f = Filters::new(
                "available_rooms",
                selection,
                &[("start", Op::GtEq), ("end", Op::LtEq), ("status", Op::Eq)],
            )?;
            Ok(Command::SelectAvailableRooms {
                start: parse_date(f.required("start", Op::GtEq)?)?,
                end: parse_date(f.required("end", Op::LtEq)?)?,
                status: f.find("status", Op::Eq).map(parse_room_status).transpose()?,
            })
        }
        "availability" => {
            let f = Filters::new(
                "availability",
                selection,
                &[("room_id", Op::Eq), ("start", Op::GtEq), ("end", Op::LtEq)],
            )?;
            Ok(Command::SelectAvailability {
                room_id: f.id("room_id")?.ok_or(SqlError::MissingFilter("room_id"))?,
                start: parse_date(f.required("start", Op::GtEq)?)?,
                end: parse_date(f.required("end", Op::LtEq)?)?,
            })
        }
        "guests" => {
            let f = Filters::new("guests", selection, &[("id", Op::Eq)])?;
            Ok(Command::SelectGuests { id: f.id("id")? })
        }
        "bookings" => {
            let f = Filters::new(
                "bookings",
                selection,
                &[("id", Op::Eq), ("room_id", Op::Eq), ("guest_id", Op::Eq)],
            )?;
            Ok(Command::SelectBookings {
                id: f.id("id")?,
                room_id: f.id("room_id")?,
                guest_id: f.id("guest_id")?,
            })
        }
        "services" => {
            let f = Filters::new("services", selection, &[("id", Op::Eq), ("is_active", Op::Eq)])?;
            Ok(Command::SelectServices {
                id: f.id("id")?,
                is_active: f.find("is_active", Op::Eq).map(parse_bool).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ulid::from_string(s)
            .map_err(|e| SqlError::InvalidValue(format!("bad ULID {s:?}: {e}"))),
        Some(value) => Err(SqlError::InvalidValue(format!(
            "expected ULID string, got {value}"
        ))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// A string literal. Bare numbers are accepted too (`number = 101`).
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(value) => Err(SqlError::InvalidValue(format!(
            "expected string, got {value}"
        ))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(Some)
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::InvalidValue(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::InvalidValue(format!(
                "expected number, got {value}"
            ))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => Decimal::from_str(s.trim())
                .map_err(|e| SqlError::InvalidValue(format!("bad decimal {s:?}: {e}"))),
            _ => Err(SqlError::InvalidValue(format!(
                "expected decimal, got {value}"
            ))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_decimal(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_decimal_or_null(expr: &Expr) -> Result<Option<Decimal>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_decimal(expr).map(Some)
}

/// `'YYYY-MM-DD'`.
fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map_err(|e| SqlError::InvalidValue(format!("bad date {s:?}: {e}"))),
        Some(value) => Err(SqlError::InvalidValue(format!(
            "expected 'YYYY-MM-DD', got {value}"
        ))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::InvalidValue(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::InvalidValue(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_room_status(expr: &Expr) -> Result<RoomStatus, SqlError> {
    let s = parse_text(expr)?;
    RoomStatus::parse(&s).ok_or_else(|| SqlError::InvalidValue(format!("unknown room status: {s}")))
}

fn parse_booking_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    let s = parse_text(expr)?;
    BookingStatus::parse(&s)
        .ok_or_else(|| SqlError::InvalidValue(format!("unknown booking status: {s}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    MissingColumn(&'static str, &'static str),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a literal that does not fit its column.
    InvalidValue(String),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column: {t}.{c}"),
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
