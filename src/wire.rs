use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::HotelAuthSource;
use crate::engine::{BookingFilter, ConflictReason, Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

pub struct HotelHandler {
    engine: Arc<Engine>,
    query_parser: Arc<HotelQueryParser>,
}

impl HotelHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(HotelQueryParser),
        }
    }

    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = match sql::parse_sql(sql) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error")
                    .increment(1);
                tracing::debug!("rejected statement: {e}");
                return Err(sql_err(e));
            }
        };

        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            // ── Rooms ──
            Command::InsertRoom { room, returning } => {
                let room = engine.create_room(room).await.map_err(engine_err)?;
                Ok(written("INSERT", returning, room_schema(), &[room], encode_room))
            }
            Command::UpdateRoom {
                id,
                patch,
                returning,
            } => {
                let room = engine.update_room(id, patch).await.map_err(engine_err)?;
                Ok(written("UPDATE", returning, room_schema(), &[room], encode_room))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { id, status } => {
                let rooms = match id {
                    Some(id) => found(engine.get_room(id).await)?,
                    None => engine.list_rooms(status).await,
                };
                let rooms: Vec<Room> = rooms
                    .into_iter()
                    .filter(|r| status.is_none_or(|s| r.status == s))
                    .collect();
                Ok(rows(room_schema(), &rooms, encode_room))
            }
            Command::SelectAvailableRooms { start, end, status } => {
                let rooms = engine
                    .available_rooms(start, end, status)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(room_schema(), &rooms, encode_room))
            }
            Command::SelectAvailability {
                room_id,
                start,
                end,
            } => {
                let free = engine
                    .room_availability(room_id, start, end)
                    .await
                    .map_err(engine_err)?;
                let free: Vec<(Ulid, DateRange)> = free.into_iter().map(|r| (room_id, r)).collect();
                Ok(rows(availability_schema(), &free, encode_availability))
            }

            // ── Guests ──
            Command::InsertGuest { guest, returning } => {
                let guest = engine.create_guest(guest).await.map_err(engine_err)?;
                Ok(written("INSERT", returning, guest_schema(), &[guest], encode_guest))
            }
            Command::UpdateGuest {
                id,
                patch,
                returning,
            } => {
                let guest = engine.update_guest(id, patch).await.map_err(engine_err)?;
                Ok(written("UPDATE", returning, guest_schema(), &[guest], encode_guest))
            }
            Command::DeleteGuest { id } => {
                engine.delete_guest(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectGuests { id } => {
                let guests = match id {
                    Some(id) => found(engine.get_guest(id))?,
                    None => engine.list_guests(),
                };
                Ok(rows(guest_schema(), &guests, encode_guest))
            }

            // ── Bookings ──
            Command::InsertBooking { booking, returning } => {
                let booking = engine.create_booking(booking).await.map_err(engine_err)?;
                self.booking_written("INSERT", returning, booking.id).await
            }
            Command::UpdateBooking {
                id,
                patch,
                returning,
            } => {
                engine.update_booking(id, patch).await.map_err(engine_err)?;
                self.booking_written("UPDATE", returning, id).await
            }
            Command::SetBookingStatus {
                id,
                status,
                returning,
            } => {
                engine.transition_to(id, status).await.map_err(engine_err)?;
                self.booking_written("UPDATE", returning, id).await
            }
            Command::DeleteBooking { id } => {
                engine.delete_booking(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings {
                id,
                room_id,
                guest_id,
            } => {
                let filter = BookingFilter { room_id, guest_id };
                let details: Vec<BookingDetail> = match id {
                    Some(id) => found(engine.get_booking(id).await)?
                        .into_iter()
                        .filter(|d| {
                            filter.room_id.is_none_or(|r| d.booking.room_id == r)
                                && filter.guest_id.is_none_or(|g| d.booking.guest_id == g)
                        })
                        .collect(),
                    None => engine.list_bookings(filter).await,
                };
                Ok(rows(booking_schema(), &details, encode_booking))
            }

            // ── Services ──
            Command::InsertService { service, returning } => {
                let service = engine.create_service(service).await.map_err(engine_err)?;
                Ok(written("INSERT", returning, service_schema(), &[service], encode_service))
            }
            Command::UpdateService {
                id,
                patch,
                returning,
            } => {
                let service = engine.update_service(id, patch).await.map_err(engine_err)?;
                Ok(written("UPDATE", returning, service_schema(), &[service], encode_service))
            }
            Command::DeleteService { id } => {
                engine.delete_service(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectServices { id, is_active } => {
                let services: Vec<Service> = match id {
                    Some(id) => found(engine.get_service(id))?
                        .into_iter()
                        .filter(|s| is_active.is_none_or(|a| s.is_active == a))
                        .collect(),
                    None => engine.list_services(is_active),
                };
                Ok(rows(service_schema(), &services, encode_service))
            }
        }
    }

    /// Bookings are returned with their room and guest attached.
    async fn booking_written(&self, verb: &str, returning: bool, id: Ulid) -> PgWireResult<Response> {
        if !returning {
            return Ok(Response::Execution(Tag::new(verb).with_rows(1)));
        }
        let detail = self.engine.get_booking(id).await.map_err(engine_err)?;
        Ok(rows(booking_schema(), &[detail], encode_booking))
    }
}

/// A lookup by id reads as zero or one rows.
fn found<T>(result: Result<T, EngineError>) -> PgWireResult<Vec<T>> {
    match result {
        Ok(v) => Ok(vec![v]),
        Err(EngineError::NotFound { .. }) => Ok(Vec::new()),
        Err(e) => Err(engine_err(e)),
    }
}

// ── Result sets ──────────────────────────────────────────────────

type Encode<T> = fn(&mut DataRowEncoder, &T) -> PgWireResult<()>;

fn rows<T>(schema: Vec<FieldInfo>, items: &[T], encode: Encode<T>) -> Response {
    let schema = Arc::new(schema);
    let data: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

fn written<T>(
    verb: &str,
    returning: bool,
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: Encode<T>,
) -> Response {
    if returning {
        rows(schema, items, encode)
    } else {
        Response::Execution(Tag::new(verb).with_rows(items.len()))
    }
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("price", Type::NUMERIC),
        field("status", Type::VARCHAR),
        field("description", Type::VARCHAR),
    ]
}

fn encode_room(encoder: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.room_type)?;
    encoder.encode_field(&i64::from(room.capacity))?;
    encoder.encode_field(&room.price.to_string())?;
    encoder.encode_field(&room.status.as_str().to_string())?;
    encoder.encode_field(&room.description)?;
    Ok(())
}

fn guest_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("full_name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone_number", Type::VARCHAR),
    ]
}

fn encode_guest(encoder: &mut DataRowEncoder, guest: &Guest) -> PgWireResult<()> {
    encoder.encode_field(&guest.id.to_string())?;
    encoder.encode_field(&guest.full_name)?;
    encoder.encode_field(&guest.email)?;
    encoder.encode_field(&guest.phone_number)?;
    Ok(())
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("guest_id", Type::VARCHAR),
        field("check_in", Type::DATE),
        field("check_out", Type::DATE),
        field("status", Type::VARCHAR),
        field("total_price", Type::NUMERIC),
        field("notes", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
        field("room_detail", Type::JSON),
        field("guest_detail", Type::JSON),
    ]
}

fn encode_booking(encoder: &mut DataRowEncoder, detail: &BookingDetail) -> PgWireResult<()> {
    let b = &detail.booking;
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&b.guest_id.to_string())?;
    encoder.encode_field(&b.check_in.to_string())?;
    encoder.encode_field(&b.check_out.to_string())?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&b.total_price.to_string())?;
    encoder.encode_field(&b.notes)?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&b.updated_at)?;
    encoder.encode_field(&room_json(&detail.room))?;
    encoder.encode_field(&guest_json(&detail.guest))?;
    Ok(())
}

fn room_json(room: &Room) -> String {
    serde_json::json!({
        "id": room.id.to_string(),
        "number": room.number,
        "room_type": room.room_type,
        "capacity": room.capacity,
        "price": room.price.to_string(),
        "status": room.status.as_str(),
        "description": room.description,
    })
    .to_string()
}

fn guest_json(guest: &Guest) -> String {
    serde_json::json!({
        "id": guest.id.to_string(),
        "full_name": guest.full_name,
        "email": guest.email,
        "phone_number": guest.phone_number,
    })
    .to_string()
}

fn service_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("price", Type::NUMERIC),
        field("is_active", Type::BOOL),
    ]
}

fn encode_service(encoder: &mut DataRowEncoder, service: &Service) -> PgWireResult<()> {
    encoder.encode_field(&service.id.to_string())?;
    encoder.encode_field(&service.name)?;
    encoder.encode_field(&service.description)?;
    encoder.encode_field(&service.price.to_string())?;
    encoder.encode_field(&service.is_active)?;
    Ok(())
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("start", Type::DATE),
        field("end", Type::DATE),
    ]
}

fn encode_availability(
    encoder: &mut DataRowEncoder,
    (room_id, range): &(Ulid, DateRange),
) -> PgWireResult<()> {
    encoder.encode_field(&room_id.to_string())?;
    encoder.encode_field(&range.start.to_string())?;
    encoder.encode_field(&range.end.to_string())?;
    Ok(())
}

/// Row shape of a statement, judged from its words alone: placeholders
/// are still unbound when a client asks for it.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .collect();
    let returns_rows = words.first() == Some(&"select") || words.contains(&"returning");
    if !returns_rows {
        return Vec::new();
    }
    let table = words
        .windows(2)
        .find(|w| matches!(w[0], "from" | "into" | "update"))
        .map(|w| w[1]);
    match table {
        Some("rooms" | "available_rooms") => room_schema(),
        Some("availability") => availability_schema(),
        Some("guests") => guest_schema(),
        Some("bookings") => booking_schema(),
        Some("services") => service_schema(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl SimpleQueryHandler for HotelHandler {
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
pub struct HotelQueryParser;

#[async_trait]
impl QueryParser for HotelQueryParser {
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
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for HotelHandler {
    type Statement = String;
    type QueryParser = HotelQueryParser;

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
            result_schema(&target.statement),
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
        )))
    }
}

/// Byte ranges of `$N` placeholders outside quoted literals and identifiers,
/// with their index.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote is an escaped quote and keeps the literal open.
            Some(q) if b == q => {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start..end].parse::<usize>() {
                    found.push((i, end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Inline bound text-format parameters as quoted literals in one pass, so
/// text from a bound value is never scanned for placeholders itself.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct HotelFactory {
    handler: Arc<HotelHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<HotelAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl HotelFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = HotelAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(HotelHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(HotelFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn engine_sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Duplicate { .. } => "23505",
        EngineError::NotFound { .. } => "02000",
        EngineError::Conflict {
            reason: ConflictReason::Overlap { .. },
            ..
        } => "23P01",
        EngineError::Conflict {
            reason: ConflictReason::Contention,
            ..
        }
        | EngineError::StorageConflict(_) => "40001",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(engine_sqlstate(&e), e.to_string())
}

fn sql_sqlstate(e: &SqlError) -> &'static str {
    match e {
        SqlError::InvalidValue(_) => "22023",
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        _ => "42601",
    }
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error(sql_sqlstate(&e), e.to_string())
}
