use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::{Credentials, OpsHoursAuthSource};
use crate::engine::{self, Engine, EngineError};
use crate::limits::DEFAULT_LIST_WINDOW_MS;
use crate::model::*;
use crate::observability::{self, command_label};
use crate::permission::Subject;
use crate::sql::{self, Command, SqlError};

pub struct OpsHoursHandler {
    engine: Arc<Engine>,
    query_parser: Arc<OpsHoursQueryParser>,
}

impl OpsHoursHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(OpsHoursQueryParser),
        }
    }

    /// The login user name is the subject of every mutation on this connection.
    fn subject<C: ClientInfo>(client: &C) -> Subject {
        Subject::new(client.metadata().get("user").cloned().unwrap_or_default())
    }

    async fn run(&self, subject: &Subject, cmd: Command, format: &Format) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(subject, cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(
        &self,
        subject: &Subject,
        cmd: Command,
        format: &Format,
    ) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::SelectHours { start, end } => {
                let start = start.unwrap_or_else(engine::now_ms);
                let end = end.unwrap_or_else(|| engine::now_ms() + DEFAULT_LIST_WINDOW_MS);
                let hours = if start <= end {
                    engine.schedule(&TimeRange::new(start, end)).await
                } else {
                    Vec::new()
                };
                hours_response(&hours, format)
            }
            Command::GetHours { id } => {
                let hours = engine.get(id).await.map_err(engine_err)?;
                hours_response(&[hours], format)
            }
            Command::InsertHours {
                start,
                end,
                returning,
            } => {
                let hours = engine
                    .create(subject, TimeRange::new(start, end))
                    .await
                    .map_err(engine_err)?;
                if returning {
                    hours_response(&[hours], format)
                } else {
                    Ok(Response::Execution(Tag::new("INSERT").with_oid(0).with_rows(1)))
                }
            }
            Command::UpdateHours {
                id,
                start,
                end,
                returning,
            } => {
                let hours = engine
                    .update(subject, OperatingHours::new(id, TimeRange::new(start, end)))
                    .await
                    .map_err(engine_err)?;
                if returning {
                    hours_response(&[hours], format)
                } else {
                    Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
                }
            }
            Command::DeleteHours { id } => {
                engine.delete(subject, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectPage {
                start_date,
                page,
                page_size,
                future,
            } => {
                let hours = engine
                    .paginated_schedule(start_date, page, page_size, future)
                    .await;
                hours_response(&hours, format)
            }
            Command::SelectCount { start_date, future } => {
                let count = engine.count(start_date, future).await;
                let schema = Arc::new(count_schema(format));
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&(count as i64))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn hours_response(hours: &[OperatingHours], format: &Format) -> PgWireResult<Response> {
    let schema = Arc::new(hours_schema(format));
    let rows: Vec<PgWireResult<_>> = hours
        .iter()
        .map(|h| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&h.id.to_string())?;
            encoder.encode_field(&h.start)?;
            encoder.encode_field(&h.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn hours_schema(format: &Format) -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, format.format_for(0)),
        FieldInfo::new("start".into(), None, None, Type::INT8, format.format_for(1)),
        FieldInfo::new("end".into(), None, None, Type::INT8, format.format_for(2)),
    ]
}

fn count_schema(format: &Format) -> Vec<FieldInfo> {
    vec![FieldInfo::new(
        "count".into(),
        None,
        None,
        Type::INT8,
        format.format_for(0),
    )]
}

/// Row shape of a statement, judged from its text so it also works before
/// `$n` parameters are bound.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.contains(&sql::COUNT_TABLE.to_uppercase()) {
        count_schema(format)
    } else if upper.trim_start().starts_with("SELECT") || upper.contains("RETURNING") {
        hours_schema(format)
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for OpsHoursHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let subject = Self::subject(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let response = self.run(&subject, cmd, &Format::UnifiedText).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct OpsHoursQueryParser;

#[async_trait]
impl QueryParser for OpsHoursQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for OpsHoursHandler {
    type Statement = String;
    type QueryParser = OpsHoursQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let subject = Self::subject(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(&subject, cmd, &portal.result_column_format).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Replace `$1`, `$2`, ... with bound values as quoted literals, highest
/// index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    substitute(&portal.statement.statement, &params)
}

fn substitute(sql: &str, params: &[Option<String>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(text) => format!("'{}'", text.replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct OpsHoursFactory {
    handler: Arc<OpsHoursHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<OpsHoursAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl OpsHoursFactory {
    pub fn new(engine: Arc<Engine>, credentials: Credentials) -> Self {
        let auth_source = OpsHoursAuthSource::new(credentials);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(OpsHoursHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for OpsHoursFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    credentials: Credentials,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = OpsHoursFactory::new(engine, credentials);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound(_) => "P0002",
        EngineError::Forbidden(_) => "42501",
        EngineError::Overlap(_) => "23P01",
        EngineError::InvalidRange(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionDenied;
    use ulid::Ulid;

    #[test]
    fn count_params_finds_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM operating_hours"), 0);
        assert_eq!(
            count_params(r#"UPDATE operating_hours SET start = $2, "end" = $3 WHERE id = $1"#),
            3
        );
        assert_eq!(count_params("SELECT $10, $2"), 10);
    }

    #[test]
    fn substitute_quotes_and_orders_placeholders() {
        let params: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        assert_eq!(substitute("$1 $10", &params), "'1' '10'");
        assert_eq!(substitute("$1", &[Some("o'clock".into())]), "'o''clock'");
        assert_eq!(substitute("$1", &[None]), "NULL");
    }

    #[test]
    fn substituted_params_parse() {
        let sql = substitute(
            "SELECT * FROM operating_hours_page WHERE start_date = $1 AND page = $2 AND future = $3",
            &[Some("1000".into()), Some("0".into()), Some("false".into())],
        );
        assert_eq!(
            sql::parse_sql(&sql).unwrap(),
            Command::SelectPage { start_date: 1000, page: 0, page_size: 10, future: false }
        );
    }

    #[test]
    fn result_schema_by_statement() {
        let text = Format::UnifiedText;
        assert_eq!(result_schema("SELECT * FROM operating_hours", &text).len(), 3);
        assert_eq!(
            result_schema("SELECT * FROM operating_hours_count WHERE start_date = $1", &text).len(),
            1
        );
        assert_eq!(
            result_schema("INSERT INTO operating_hours VALUES ($1, $2) RETURNING *", &text).len(),
            3
        );
        assert!(result_schema("DELETE FROM operating_hours WHERE id = $1", &text).is_empty());
    }

    #[test]
    fn engine_errors_map_to_sqlstates() {
        let range = TimeRange::new(0, 1);
        let denied = PermissionDenied {
            subject: "bob".into(),
            action: "a".into(),
            resource: "r".into(),
        };
        let cases = [
            (EngineError::NotFound(Ulid::nil()), "P0002"),
            (EngineError::Forbidden(denied), "42501"),
            (EngineError::Overlap(range), "23P01"),
            (EngineError::InvalidRange(range), "22023"),
            (EngineError::LimitExceeded("x"), "54000"),
            (EngineError::WalError("disk".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code, "{err}");
        }
    }
}
