use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, ErrorKind};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Shape};

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every login.
#[derive(Debug)]
pub struct RoomLedgerAuthSource {
    password: String,
}

impl RoomLedgerAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoomLedgerAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Handler ──────────────────────────────────────────────────────

pub struct RoomLedgerHandler {
    engine: Arc<Engine>,
    query_parser: Arc<RoomLedgerQueryParser>,
}

impl RoomLedgerHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(RoomLedgerQueryParser),
        }
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "parse", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::ProvisionRoom {
                id,
                room_number,
                room_type,
                floor,
                rate,
            } => {
                engine
                    .provision_room(id, &room_number, room_type, floor, rate)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetRoomStatus { room_id, status } => {
                engine
                    .set_room_status(room_id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::ListRooms => room_rows(engine.list_rooms().await),
            Command::AvailableRooms {
                check_in,
                check_out,
            } => room_rows(
                engine
                    .available_rooms(check_in, check_out)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::ListReservations => reservation_rows(engine.list_reservations().await),
            Command::CreateReservation { request } => {
                let reservation = engine
                    .create_reservation(request)
                    .await
                    .map_err(engine_err)?;
                self.reservation_row(reservation.id).await
            }
            Command::CheckIn { id } => {
                engine.check_in(id).await.map_err(engine_err)?;
                self.reservation_row(id).await
            }
            Command::CheckOut { id } => {
                engine.check_out(id).await.map_err(engine_err)?;
                self.reservation_row(id).await
            }
            Command::SearchGuests { query } => {
                guest_rows(engine.search_guests(&query).map_err(engine_err)?)
            }
            Command::SearchDirectory { query } => directory_rows(
                engine
                    .search_directory(&query)
                    .await
                    .map_err(engine_err)?,
            ),
            Command::Stats { as_of } => {
                let as_of = as_of.unwrap_or_else(|| chrono::Local::now().date_naive());
                stats_rows(&engine.compute_stats(as_of).await)
            }
        }
    }

    async fn reservation_row(&self, id: ulid::Ulid) -> PgWireResult<Response> {
        let info = self.engine.get_reservation(id).await.map_err(engine_err)?;
        reservation_rows(vec![info])
    }
}

// ── Row schemas ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("floor", Type::INT4),
        field("rate", Type::VARCHAR),
        field("status", Type::VARCHAR),
        field("current_guest", Type::VARCHAR),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("confirmation_number", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("room_number", Type::VARCHAR),
        field("guest_name", Type::VARCHAR),
        field("guest_email", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("nights", Type::INT8),
        field("total_amount", Type::VARCHAR),
        field("status", Type::VARCHAR),
    ]
}

fn guest_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("full_name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("id_number", Type::VARCHAR),
    ]
}

fn directory_schema() -> Vec<FieldInfo> {
    vec![
        field("kind", Type::VARCHAR),
        field("confirmation_number", Type::VARCHAR),
        field("guest_name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("check_in", Type::VARCHAR),
        field("check_out", Type::VARCHAR),
        field("status", Type::VARCHAR),
    ]
}

fn stats_schema() -> Vec<FieldInfo> {
    [
        "total_rooms",
        "vacant_rooms",
        "occupied_rooms",
        "maintenance_rooms",
        "cleaning_rooms",
        "reserved_rooms",
        "confirmed_reservations",
        "checked_in_reservations",
        "truly_available_rooms",
    ]
    .into_iter()
    .map(|name| field(name, Type::INT8))
    .chain([
        field("occupancy_rate", Type::VARCHAR),
        field("today_arrivals", Type::INT8),
        field("today_departures", Type::INT8),
        field("revenue_today", Type::VARCHAR),
    ])
    .collect()
}

fn schema_for(shape: Shape) -> Vec<FieldInfo> {
    match shape {
        Shape::Rooms => room_schema(),
        Shape::Reservations => reservation_schema(),
        Shape::Guests => guest_schema(),
        Shape::Directory => directory_schema(),
        Shape::Stats => stats_schema(),
        Shape::Tag => vec![],
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn rows_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn room_rows(rooms: Vec<RoomInfo>) -> PgWireResult<Response> {
    rows_response(room_schema(), rooms, |enc, room| {
        enc.encode_field(&room.id.to_string())?;
        enc.encode_field(&room.room_number)?;
        enc.encode_field(&room.room_type.as_str())?;
        enc.encode_field(&room.floor)?;
        enc.encode_field(&room.rate.to_string())?;
        enc.encode_field(&room.status.as_str())?;
        enc.encode_field(&room.current_guest)?;
        Ok(())
    })
}

fn reservation_rows(reservations: Vec<ReservationInfo>) -> PgWireResult<Response> {
    rows_response(reservation_schema(), reservations, |enc, r| {
        enc.encode_field(&r.id.to_string())?;
        enc.encode_field(&r.confirmation_number)?;
        enc.encode_field(&r.room_id.to_string())?;
        enc.encode_field(&r.room_number)?;
        enc.encode_field(&r.guest_name)?;
        enc.encode_field(&r.guest_email)?;
        enc.encode_field(&r.check_in.to_string())?;
        enc.encode_field(&r.check_out.to_string())?;
        enc.encode_field(&r.nights)?;
        enc.encode_field(&r.total_amount.to_string())?;
        enc.encode_field(&r.status.as_str())?;
        Ok(())
    })
}

fn guest_rows(guests: Vec<Guest>) -> PgWireResult<Response> {
    rows_response(guest_schema(), guests, |enc, g| {
        enc.encode_field(&g.id.to_string())?;
        enc.encode_field(&g.full_name)?;
        enc.encode_field(&g.email)?;
        enc.encode_field(&g.phone)?;
        enc.encode_field(&g.id_number)?;
        Ok(())
    })
}

fn directory_rows(hits: Vec<DirectoryHit>) -> PgWireResult<Response> {
    rows_response(directory_schema(), hits, |enc, hit| {
        enc.encode_field(&hit.kind())?;
        match hit {
            DirectoryHit::Reservation {
                confirmation_number,
                guest_name,
                email,
                check_in,
                check_out,
                status,
            } => {
                enc.encode_field(&Some(confirmation_number))?;
                enc.encode_field(&guest_name)?;
                enc.encode_field(&email)?;
                enc.encode_field(&None::<String>)?;
                enc.encode_field(&Some(check_in.to_string()))?;
                enc.encode_field(&Some(check_out.to_string()))?;
                enc.encode_field(&Some(status.as_str()))?;
            }
            DirectoryHit::Guest {
                guest_name,
                email,
                phone,
                last_reservation,
                last_stay,
                status,
            } => {
                enc.encode_field(&last_reservation)?;
                enc.encode_field(&guest_name)?;
                enc.encode_field(&email)?;
                enc.encode_field(&phone)?;
                enc.encode_field(&last_stay.map(|d| d.to_string()))?;
                enc.encode_field(&None::<String>)?;
                enc.encode_field(&status.map(|s| s.as_str()))?;
            }
        }
        Ok(())
    })
}

fn stats_rows(stats: &Stats) -> PgWireResult<Response> {
    rows_response(stats_schema(), [stats], |enc, s| {
        for n in [
            s.total_rooms,
            s.vacant_rooms,
            s.occupied_rooms,
            s.maintenance_rooms,
            s.cleaning_rooms,
            s.reserved_rooms,
            s.confirmed_reservations,
            s.checked_in_reservations,
            s.truly_available_rooms,
        ] {
            enc.encode_field(&count(n))?;
        }
        enc.encode_field(&s.occupancy_rate.to_string())?;
        enc.encode_field(&count(s.today_arrivals))?;
        enc.encode_field(&count(s.today_departures))?;
        enc.encode_field(&s.revenue_today.to_string())?;
        Ok(())
    })
}

#[async_trait]
impl SimpleQueryHandler for RoomLedgerHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomLedgerQueryParser;

#[async_trait]
impl QueryParser for RoomLedgerQueryParser {
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
        Ok(schema_for(sql::shape_of(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomLedgerHandler {
    type Statement = String;
    type QueryParser = RoomLedgerQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(&sql).await
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
            schema_for(sql::shape_of(&target.statement)),
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
        Ok(DescribePortalResponse::new(schema_for(sql::shape_of(
            &target.statement.statement,
        ))))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. The template is scanned
/// once: `$N` inside a quoted literal is left alone and substituted values are
/// never rescanned.
fn substitute_params(sql: &str, params: &[Option<impl AsRef<[u8]>>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((start, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let mut end = start + 1;
        while let Some((i, d)) = chars.next_if(|(_, d)| d.is_ascii_digit()) {
            end = i + d.len_utf8();
        }
        let param = sql[start + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| params.get(n));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&sql[start..end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomLedgerFactory {
    handler: Arc<RoomLedgerHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomLedgerAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomLedgerFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        Self {
            handler: Arc::new(RoomLedgerHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                RoomLedgerAuthSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomLedgerFactory {
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
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = RoomLedgerFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::LimitExceeded(_) => "54000",
        EngineError::RoomUnavailable { .. } => "23P01",
        _ => match e.kind() {
            ErrorKind::NotFound => "P0002",
            ErrorKind::InvalidInput => "22023",
            ErrorKind::RoomUnavailable => "23P01",
            ErrorKind::InvalidTransition => "55000",
            ErrorKind::Conflict => "40001",
            ErrorKind::StorageFailure => "58030",
        },
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
