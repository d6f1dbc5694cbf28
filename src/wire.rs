use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::WeekslotAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, EntryFilter, SqlError};
use crate::tenant::TenantManager;

pub struct WeekslotHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<WeekslotQueryParser>,
}

impl WeekslotHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(WeekslotQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// Parse, run and record metrics for one statement.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }
}

async fn execute_command(engine: &Engine, cmd: Command) -> PgWireResult<Response> {
    debug!("executing {cmd:?}");
    match cmd {
        Command::InsertEntries { mut entries, returning } => {
            let created = if entries.len() == 1 {
                let new = entries.remove(0);
                vec![engine.create(new).await.map_err(engine_err)?]
            } else {
                engine.create_many(entries).await.map_err(engine_err)?
            };
            if returning {
                entry_rows(created)
            } else {
                Ok(Response::Execution(Tag::new("INSERT").with_rows(created.len())))
            }
        }
        Command::UpdateEntry { id, patch } => {
            engine.update(id, patch).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::DeactivateEntry { id } => {
            let changed = engine.deactivate(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(usize::from(changed))))
        }
        Command::DeleteEntry { id } => {
            engine.delete(id).await.map_err(engine_err)?;
            Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
        }
        Command::SelectEntries { filter, active_only } => {
            let entries = match filter {
                EntryFilter::All => engine.list(active_only),
                EntryFilter::Id(id) => engine
                    .get(&id)
                    .filter(|e| !active_only || e.is_active)
                    .into_iter()
                    .collect(),
                EntryFilter::Course(course) => engine.by_course(&course, active_only),
                EntryFilter::Instructor(instructor) => engine.by_instructor(&instructor, active_only),
                EntryFilter::Room { room, building } => {
                    engine.by_room(&room, building.as_deref(), active_only)
                }
                EntryFilter::Day(day) => engine.by_day(day, active_only),
                EntryFilter::Date(date) => engine.on_date(date),
            };
            entry_rows(entries)
        }
        Command::SelectConflicts { candidate, exclude_id } => {
            let found = engine
                .find_conflicts(candidate, exclude_id)
                .map_err(engine_err)?;
            entry_rows(found)
        }
    }
}

fn entry_schema() -> Vec<FieldInfo> {
    let text = |name: &str| FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text);
    vec![
        text("id"),
        text("course_ref"),
        text("instructor_ref"),
        text("room"),
        text("building"),
        text("day_of_week"),
        text("start_time"),
        text("end_time"),
        text("effective_from"),
        text("effective_to"),
        FieldInfo::new("is_active".into(), None, None, Type::BOOL, FieldFormat::Text),
        text("notes"),
    ]
}

fn entry_rows(entries: Vec<ScheduleEntry>) -> PgWireResult<Response> {
    let schema = Arc::new(entry_schema());
    let rows: Vec<PgWireResult<_>> = entries
        .into_iter()
        .map(|e| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&e.id.to_string())?;
            encoder.encode_field(&e.course_ref)?;
            encoder.encode_field(&e.instructor_ref)?;
            encoder.encode_field(&e.room)?;
            encoder.encode_field(&e.building)?;
            encoder.encode_field(&e.day_of_week.to_string())?;
            encoder.encode_field(&e.time.start.format("%H:%M:%S").to_string())?;
            encoder.encode_field(&e.time.end.format("%H:%M:%S").to_string())?;
            encoder.encode_field(&e.window.from.to_string())?;
            encoder.encode_field(&e.window.to.map(|d| d.to_string()))?;
            encoder.encode_field(&e.is_active)?;
            encoder.encode_field(&e.notes)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Statements that answer with entry rows.
fn returns_entries(sql: &str) -> bool {
    let upper = sql.to_uppercase();
    upper.trim_start().starts_with("SELECT") || upper.contains("RETURNING")
}

#[async_trait]
impl SimpleQueryHandler for WeekslotHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        Ok(vec![self.run(&engine, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct WeekslotQueryParser;

#[async_trait]
impl QueryParser for WeekslotQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
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
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(if returns_entries(stmt) { entry_schema() } else { vec![] })
    }
}

#[async_trait]
impl ExtendedQueryHandler for WeekslotHandler {
    type Statement = String;
    type QueryParser = WeekslotQueryParser;

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
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&engine, &sql).await
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
        let fields = if returns_entries(&target.statement) { entry_schema() } else { vec![] };
        Ok(DescribeStatementResponse::new(param_types, fields))
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
        let fields = if returns_entries(&target.statement.statement) {
            entry_schema()
        } else {
            vec![]
        };
        Ok(DescribePortalResponse::new(fields))
    }
}

/// Walk `$N` placeholders, calling `f` with each index and the text it spans.
fn scan_params(sql: &str, mut f: impl FnMut(Option<usize>, &str)) {
    let bytes = sql.as_bytes();
    let mut i = 0;
    let mut plain = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let digits = i + 1;
        let mut j = digits;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if let Ok(n) = sql[digits..j].parse::<usize>() {
            f(None, &sql[plain..i]);
            f(Some(n), &sql[i..j]);
            plain = j;
        }
        i = j.max(i + 1);
    }
    f(None, &sql[plain..]);
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    scan_params(sql, |n, _| max = max.max(n.unwrap_or(0)));
    max
}

/// Inline bound text-format parameters as quoted literals.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut out = String::with_capacity(sql.len());
    scan_params(sql, |n, text| match n {
        None => out.push_str(text),
        Some(n) => match n.checked_sub(1).and_then(|i| params.get(i)) {
            Some(Some(bytes)) => {
                let value = String::from_utf8_lossy(bytes);
                out.push('\'');
                out.push_str(&value.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(text),
        },
    });
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct WeekslotFactory {
    handler: Arc<WeekslotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<WeekslotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl WeekslotFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = WeekslotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(WeekslotHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for WeekslotFactory {
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
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = WeekslotFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate_for_engine(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Conflict { .. } => "23P01",
        EngineError::NotFound(_)
        | EngineError::CourseNotFound(_)
        | EngineError::InstructorNotFound(_) => "P0002",
        EngineError::Inactive(_) | EngineError::LimitExceeded(_) | EngineError::WalError(_) => {
            "P0001"
        }
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate_for_engine(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::Validation(_) => "22023",
        _ => "42601",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}
