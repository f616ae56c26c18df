use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::parser::{Parser, ParserError};
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::*;

pub const HOURS_TABLE: &str = "operating_hours";
pub const PAGE_TABLE: &str = "operating_hours_page";
pub const COUNT_TABLE: &str = "operating_hours_count";

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// Range listing; unset bounds are filled in by the caller.
    SelectHours {
        start: Option<Ms>,
        end: Option<Ms>,
    },
    GetHours {
        id: Ulid,
    },
    InsertHours {
        start: Ms,
        end: Ms,
        returning: bool,
    },
    UpdateHours {
        id: Ulid,
        start: Ms,
        end: Ms,
        returning: bool,
    },
    DeleteHours {
        id: Ulid,
    },
    SelectPage {
        start_date: Ms,
        page: usize,
        page_size: usize,
        future: bool,
    },
    SelectCount {
        start_date: Ms,
        future: bool,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(parse_err)?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { .. } => parse_update(sql),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != HOURS_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;
    if values.len() != 2 {
        return Err(SqlError::WrongArity(HOURS_TABLE, 2, values.len()));
    }

    let (mut start, mut end) = (None, None);
    if insert.columns.is_empty() {
        start = Some(parse_i64_expr(&values[0])?);
        end = Some(parse_i64_expr(&values[1])?);
    } else {
        for (column, value) in insert.columns.iter().zip(&values) {
            match column.value.to_lowercase().as_str() {
                "start" => start = Some(parse_i64_expr(value)?),
                "end" => end = Some(parse_i64_expr(value)?),
                other => return Err(SqlError::UnknownColumn(other.to_string())),
            }
        }
    }

    Ok(Command::InsertHours {
        start: start.ok_or(SqlError::MissingValue("start"))?,
        end: end.ok_or(SqlError::MissingValue("end"))?,
        returning: insert.returning.is_some(),
    })
}

/// `UPDATE <table> SET col = v, ... WHERE id = '<ulid>' [RETURNING ...]`,
/// read clause by clause with the parser.
fn parse_update(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut parser = Parser::new(&dialect).try_with_sql(sql).map_err(parse_err)?;
    parser.expect_keyword(Keyword::UPDATE).map_err(parse_err)?;
    let table = parser.parse_object_name(false).map_err(parse_err)?;
    let table = object_name_last(&table).ok_or_else(|| SqlError::Parse("empty table name".into()))?;
    if table != HOURS_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    parser.expect_keyword(Keyword::SET).map_err(parse_err)?;
    let assignments = parser
        .parse_comma_separated(Parser::parse_assignment)
        .map_err(parse_err)?;
    let selection = if parser.parse_keyword(Keyword::WHERE) {
        Some(parser.parse_expr().map_err(parse_err)?)
    } else {
        None
    };
    let returning = parser.parse_keyword(Keyword::RETURNING);

    let id = extract_where_id(&selection)?;
    let (mut start, mut end) = (None, None);
    for assignment in &assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match column.as_str() {
            "start" => start = Some(parse_i64_expr(&assignment.value)?),
            "end" => end = Some(parse_i64_expr(&assignment.value)?),
            _ => return Err(SqlError::UnknownColumn(column)),
        }
    }

    Ok(Command::UpdateHours {
        id,
        start: start.ok_or(SqlError::MissingValue("start"))?,
        end: end.ok_or(SqlError::MissingValue("end"))?,
        returning,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    if table != HOURS_TABLE {
        return Err(SqlError::UnknownTable(table));
    }
    Ok(Command::DeleteHours {
        id: extract_where_id(&delete.selection)?,
    })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        HOURS_TABLE => select_hours(&filters),
        PAGE_TABLE => select_page(&filters),
        COUNT_TABLE => select_count(&filters),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn select_hours(filters: &[Filter<'_>]) -> Result<Command, SqlError> {
    let (mut id, mut start, mut end) = (None, None, None);
    for f in filters {
        match (f.column.as_str(), f.op) {
            ("id", BinaryOperator::Eq) => id = Some(parse_ulid_expr(f.value)?),
            // Intersection with [start, end]: the window ends at or after
            // `start` and begins at or before `end`.
            ("end", BinaryOperator::GtEq) => start = Some(parse_i64_expr(f.value)?),
            ("start", BinaryOperator::LtEq) => end = Some(parse_i64_expr(f.value)?),
            _ => return Err(f.unsupported()),
        }
    }
    match id {
        Some(id) => Ok(Command::GetHours { id }),
        None => Ok(Command::SelectHours { start, end }),
    }
}

fn select_page(filters: &[Filter<'_>]) -> Result<Command, SqlError> {
    let (mut start_date, mut page, mut page_size, mut future) = (None, None, None, None);
    for f in filters {
        match (f.column.as_str(), f.op) {
            ("start_date", BinaryOperator::Eq) => start_date = Some(parse_i64_expr(f.value)?),
            ("page", BinaryOperator::Eq) => page = Some(parse_usize_expr(f.value)?),
            ("page_size", BinaryOperator::Eq) => page_size = Some(parse_usize_expr(f.value)?),
            ("future", BinaryOperator::Eq) => future = Some(parse_bool_expr(f.value)?),
            _ => return Err(f.unsupported()),
        }
    }
    Ok(Command::SelectPage {
        start_date: start_date.ok_or(SqlError::MissingFilter("start_date"))?,
        page: page.ok_or(SqlError::MissingFilter("page"))?,
        page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        future: future.unwrap_or(true),
    })
}

fn select_count(filters: &[Filter<'_>]) -> Result<Command, SqlError> {
    let (mut start_date, mut future) = (None, None);
    for f in filters {
        match (f.column.as_str(), f.op) {
            ("start_date", BinaryOperator::Eq) => start_date = Some(parse_i64_expr(f.value)?),
            ("future", BinaryOperator::Eq) => future = Some(parse_bool_expr(f.value)?),
            _ => return Err(f.unsupported()),
        }
    }
    Ok(Command::SelectCount {
        start_date: start_date.ok_or(SqlError::MissingFilter("start_date"))?,
        future: future.ok_or(SqlError::MissingFilter("future"))?,
    })
}

// ── WHERE clause ──────────────────────────────────────────────

/// One `column <op> value` term of an AND-only WHERE clause.
struct Filter<'a> {
    column: String,
    op: &'a BinaryOperator,
    value: &'a Expr,
}

impl Filter<'_> {
    fn unsupported(&self) -> SqlError {
        SqlError::Unsupported(format!("filter {} {}", self.column, self.op))
    }
}

fn collect_filters<'a>(expr: &'a Expr, out: &mut Vec<Filter<'a>>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    let mut filters = Vec::new();
    collect_filters(sel, &mut filters)?;
    match filters.as_slice() {
        [f] if f.column == "id" && *f.op == BinaryOperator::Eq => parse_ulid_expr(f.value),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn parse_err(e: ParserError) -> SqlError {
    SqlError::Parse(e.to_string())
}

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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
            [row] => Ok(row.clone()),
            [] => Err(SqlError::Parse("empty VALUES".into())),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
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
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_i64_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad i64 {s}: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_usize_expr(expr: &Expr) -> Result<usize, SqlError> {
    let v = parse_i64_expr(expr)?;
    usize::try_from(v).map_err(|_| SqlError::Parse(format!("{v} must not be negative")))
}

fn parse_bool_expr(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
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
    MissingFilter(&'static str),
    MissingValue(&'static str),
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
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::MissingValue(col) => write!(f, "missing value: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_select_hours_window() {
        let sql = r#"SELECT * FROM operating_hours WHERE "end" >= 1000 AND start <= 2000"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectHours { start: Some(1000), end: Some(2000) }
        );
        let sql = r#"SELECT * FROM operating_hours WHERE start <= 2000 AND "end" >= 1000"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectHours { start: Some(1000), end: Some(2000) }
        );
    }

    #[test]
    fn parse_select_hours_defaults() {
        assert_eq!(
            parse_sql("SELECT * FROM operating_hours").unwrap(),
            Command::SelectHours { start: None, end: None }
        );
        assert_eq!(
            parse_sql(r#"SELECT * FROM operating_hours WHERE "end" >= 5"#).unwrap(),
            Command::SelectHours { start: Some(5), end: None }
        );
    }

    #[test]
    fn parse_get_hours() {
        let sql = format!("SELECT * FROM operating_hours WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::GetHours { id } => assert_eq!(id.to_string(), ID),
            other => panic!("expected GetHours, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_unsupported_filter() {
        let sql = "SELECT * FROM operating_hours WHERE start < 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
        // containment bounds would promise something the listing does not do
        let sql = r#"SELECT * FROM operating_hours WHERE start >= 1000 AND "end" <= 2000"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_insert_with_columns() {
        let sql = r#"INSERT INTO operating_hours ("end", start) VALUES (2000, 1000)"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertHours { start: 1000, end: 2000, returning: false }
        );
    }

    #[test]
    fn parse_insert_positional_returning() {
        let sql = "INSERT INTO operating_hours VALUES (1000, 2000) RETURNING *";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertHours { start: 1000, end: 2000, returning: true }
        );
    }

    #[test]
    fn parse_insert_quoted_numbers() {
        let sql = r#"INSERT INTO operating_hours (start, "end") VALUES ('1000', '2000')"#;
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertHours { start: 1000, end: 2000, returning: false }
        );
    }

    #[test]
    fn parse_insert_wrong_arity() {
        let sql = "INSERT INTO operating_hours (start) VALUES (1000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::WrongArity(_, 2, 1))));
    }

    #[test]
    fn parse_insert_unknown_column() {
        let sql = "INSERT INTO operating_hours (start, label) VALUES (1000, 'x')";
        assert!(matches!(parse_sql(sql), Err(SqlError::UnknownColumn(c)) if c == "label"));
    }

    #[test]
    fn parse_update() {
        let sql = format!(r#"UPDATE operating_hours SET start = 10, "end" = 20 WHERE id = '{ID}'"#);
        match parse_sql(&sql).unwrap() {
            Command::UpdateHours { id, start, end, returning } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!((start, end), (10, 20));
                assert!(!returning);
            }
            other => panic!("expected UpdateHours, got {other:?}"),
        }
    }

    #[test]
    fn parse_update_returning() {
        let sql = format!(r#"UPDATE operating_hours SET "end" = 20, start = 10 WHERE id = '{ID}' RETURNING *"#);
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::UpdateHours { start: 10, end: 20, returning: true, .. }
        ));
    }

    #[test]
    fn parse_update_requires_both_bounds() {
        let sql = format!("UPDATE operating_hours SET start = 10 WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingValue("end"))));
    }

    #[test]
    fn parse_update_requires_id() {
        let sql = r#"UPDATE operating_hours SET start = 10, "end" = 20"#;
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete() {
        let sql = format!("DELETE FROM operating_hours WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::DeleteHours { id } => assert_eq!(id.to_string(), ID),
            other => panic!("expected DeleteHours, got {other:?}"),
        }
    }

    #[test]
    fn parse_delete_bad_ulid() {
        let sql = "DELETE FROM operating_hours WHERE id = 'nope'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_page_defaults() {
        let sql = "SELECT * FROM operating_hours_page WHERE start_date = 1000 AND page = 0";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectPage { start_date: 1000, page: 0, page_size: 10, future: true }
        );
    }

    #[test]
    fn parse_page_full() {
        let sql = "SELECT * FROM operating_hours_page WHERE start_date = 1000 AND page = 2 AND page_size = 5 AND future = false";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectPage { start_date: 1000, page: 2, page_size: 5, future: false }
        );
    }

    #[test]
    fn parse_page_quoted_params() {
        let sql = "SELECT * FROM operating_hours_page WHERE start_date = '1000' AND page = '1' AND future = 'f'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectPage { start_date: 1000, page: 1, page_size: 10, future: false }
        );
    }

    #[test]
    fn parse_page_negative_rejected() {
        let sql = "SELECT * FROM operating_hours_page WHERE start_date = 1000 AND page = -1";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_page_requires_page() {
        let sql = "SELECT * FROM operating_hours_page WHERE start_date = 1000";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("page"))));
    }

    #[test]
    fn parse_count() {
        let sql = "SELECT * FROM operating_hours_count WHERE start_date = -5 AND future = true";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectCount { start_date: -5, future: true }
        );
    }

    #[test]
    fn parse_count_requires_future() {
        let sql = "SELECT * FROM operating_hours_count WHERE start_date = 0";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("future"))));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings"),
            Err(SqlError::UnknownTable(t)) if t == "bookings"
        ));
        assert!(matches!(
            parse_sql("INSERT INTO rules VALUES (1, 2)"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
