//! JSON-over-HTTP/1.1 front-end for the room registry and booking ledger.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, error, info};
use ulid::Ulid;

use crate::clock::{format_timestamp, now_ms, parse_date, parse_timestamp};
use crate::engine::{Engine, EngineError};
use crate::limits::MAX_BODY_BYTES;
use crate::model::{BookingInfo, RoomInfo, Span};
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};

pub type HttpResponse = Response<Full<Bytes>>;

/// Serve one client connection until it closes.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), hyper::Error> {
    let service = service_fn(move |req| {
        let engine = engine.clone();
        async move { Ok::<_, Infallible>(handle(&engine, req).await) }
    });
    http1::Builder::new()
        .serve_connection(TokioIo::new(socket), service)
        .await
}

/// Route, execute and record metrics for one request.
pub async fn handle<B>(engine: &Engine, req: Request<B>) -> HttpResponse
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let route = route_label(&path);

    let mut response = match dispatch(engine, req).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    };
    allow_any_origin(&mut response);

    let status = response.status();
    metrics::counter!(REQUESTS_TOTAL, "route" => route, "status" => status.as_u16().to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "route" => route)
        .record(started.elapsed().as_secs_f64());
    debug!("{method} {path} -> {}", status.as_u16());
    response
}

async fn dispatch<B>(engine: &Engine, req: Request<B>) -> Result<HttpResponse, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    if req.method() == Method::OPTIONS {
        return Ok(preflight());
    }

    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let method = req.method().clone();

    match (method, segments.as_slice()) {
        (Method::GET, []) => Ok(text(StatusCode::OK, "StudySpot backend is live")),

        (Method::GET, ["rooms"]) => list_rooms(engine).await,
        // `/add-room` and `/book-room` are the paths older web clients post to.
        (Method::POST, ["rooms"] | ["add-room"]) => create_room(engine, read_json(req).await?).await,
        (Method::GET, ["rooms", id]) => get_room(engine, path_id(id)?).await,
        (Method::DELETE, ["rooms", id]) => delete_room(engine, path_id(id)?).await,
        (Method::GET, ["rooms", id, "availability"]) => {
            let query: AvailabilityQuery = read_query(req.uri().query())?;
            room_availability(engine, path_id(id)?, &query).await
        }

        (Method::GET, ["bookings"]) => {
            let query: BookingsQuery = read_query(req.uri().query())?;
            list_bookings(engine, &query).await
        }
        (Method::POST, ["bookings"] | ["book-room"]) => {
            create_booking(engine, read_json(req).await?).await
        }
        (Method::DELETE, ["bookings", id]) => cancel_booking(engine, path_id(id)?).await,

        (
            _,
            [] | ["rooms"] | ["rooms", _] | ["rooms", _, "availability"] | ["bookings"]
            | ["bookings", _] | ["add-room"] | ["book-room"],
        ) => {
            Err(ApiError::MethodNotAllowed)
        }
        _ => Err(ApiError::NoRoute),
    }
}

fn route_label(path: &str) -> &'static str {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match segments.as_slice() {
        [] => "health",
        ["rooms"] | ["add-room"] => "rooms",
        ["rooms", _] => "room",
        ["rooms", _, "availability"] => "room_availability",
        ["bookings"] | ["book-room"] => "bookings",
        ["bookings", _] => "booking",
        _ => "unknown",
    }
}

// ── Handlers ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateRoomRequest {
    name: String,
}

#[derive(Serialize)]
struct CreatedRoom {
    id: Ulid,
}

#[derive(Serialize)]
struct RoomView {
    id: Ulid,
    name: String,
    is_booked: bool,
}

impl From<RoomInfo> for RoomView {
    fn from(room: RoomInfo) -> Self {
        Self {
            id: room.id,
            name: room.name,
            is_booked: room.is_booked,
        }
    }
}

#[derive(Deserialize)]
struct CreateBookingRequest {
    room_id: String,
    user_name: String,
    start_time: String,
    end_time: String,
}

#[derive(Serialize)]
struct CreatedBooking {
    success: bool,
    booking_id: Ulid,
}

#[derive(Serialize)]
struct BookingView {
    id: Ulid,
    room_id: Ulid,
    room_name: String,
    user_name: String,
    start_time: String,
    end_time: String,
    created_at: String,
}

impl From<BookingInfo> for BookingView {
    fn from(b: BookingInfo) -> Self {
        Self {
            id: b.id,
            room_id: b.room_id,
            room_name: b.room_name,
            user_name: b.user_name,
            start_time: format_timestamp(b.start),
            end_time: format_timestamp(b.end),
            created_at: format_timestamp(b.created_at),
        }
    }
}

#[derive(Serialize)]
struct SlotView {
    start_time: String,
    end_time: String,
}

impl From<Span> for SlotView {
    fn from(span: Span) -> Self {
        Self {
            start_time: format_timestamp(span.start),
            end_time: format_timestamp(span.end),
        }
    }
}

#[derive(Serialize)]
struct Success {
    success: bool,
}

#[derive(Deserialize)]
struct BookingsQuery {
    room_id: Option<String>,
}

#[derive(Deserialize)]
struct AvailabilityQuery {
    date: String,
}

async fn list_rooms(engine: &Engine) -> Result<HttpResponse, ApiError> {
    let rooms: Vec<RoomView> = engine.list_rooms().await.into_iter().map(Into::into).collect();
    Ok(json(StatusCode::OK, &rooms))
}

async fn create_room(engine: &Engine, body: CreateRoomRequest) -> Result<HttpResponse, ApiError> {
    let id = engine.create_room(&body.name).await?;
    Ok(json(StatusCode::OK, &CreatedRoom { id }))
}

async fn get_room(engine: &Engine, id: Ulid) -> Result<HttpResponse, ApiError> {
    let room = engine.get_room_info(id, now_ms()).await?;
    Ok(json(StatusCode::OK, &RoomView::from(room)))
}

async fn delete_room(engine: &Engine, id: Ulid) -> Result<HttpResponse, ApiError> {
    engine.delete_room(id).await?;
    Ok(json(StatusCode::OK, &Success { success: true }))
}

async fn room_availability(
    engine: &Engine,
    id: Ulid,
    query: &AvailabilityQuery,
) -> Result<HttpResponse, ApiError> {
    let date = parse_date(&query.date)
        .ok_or_else(|| ApiError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", query.date)))?;
    let free: Vec<SlotView> = engine
        .room_availability(id, date)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(json(StatusCode::OK, &free))
}

async fn list_bookings(engine: &Engine, query: &BookingsQuery) -> Result<HttpResponse, ApiError> {
    let room_id = match &query.room_id {
        Some(raw) => Some(
            raw.parse::<Ulid>()
                .map_err(|_| ApiError::BadRequest(format!("invalid room_id {raw:?}")))?,
        ),
        None => None,
    };
    let bookings: Vec<BookingView> = engine
        .list_bookings(room_id)
        .await
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(json(StatusCode::OK, &bookings))
}

async fn create_booking(
    engine: &Engine,
    body: CreateBookingRequest,
) -> Result<HttpResponse, ApiError> {
    let room_id = body
        .room_id
        .trim()
        .parse::<Ulid>()
        .map_err(|_| ApiError::BadRequest(format!("invalid room_id {:?}", body.room_id)))?;
    let start = timestamp_field("start_time", &body.start_time)?;
    let end = timestamp_field("end_time", &body.end_time)?;

    let booking = engine.create_booking(room_id, &body.user_name, start, end).await?;
    Ok(json(
        StatusCode::OK,
        &CreatedBooking {
            success: true,
            booking_id: booking.id,
        },
    ))
}

async fn cancel_booking(engine: &Engine, id: Ulid) -> Result<HttpResponse, ApiError> {
    engine.cancel_booking(id).await?;
    Ok(json(StatusCode::OK, &Success { success: true }))
}

// ── Decoding ─────────────────────────────────────────────────────

async fn read_json<B, T>(req: Request<B>) -> Result<T, ApiError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    T: DeserializeOwned,
{
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::BadRequest(format!("failed to read request body: {e}"))
            }
        })?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}

fn read_query<T: DeserializeOwned>(query: Option<&str>) -> Result<T, ApiError> {
    serde_urlencoded::from_str(query.unwrap_or(""))
        .map_err(|e| ApiError::BadRequest(format!("invalid query string: {e}")))
}

/// A path id that isn't a ULID can't name anything we store.
fn path_id(raw: &str) -> Result<Ulid, ApiError> {
    raw.parse().map_err(|_| ApiError::NoRoute)
}

fn timestamp_field(field: &str, raw: &str) -> Result<i64, ApiError> {
    parse_timestamp(raw).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "invalid {field} {raw:?}, expected ISO-8601 such as 2024-01-10T09:00"
        ))
    })
}

// ── Responses ────────────────────────────────────────────────────

#[derive(Debug)]
enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    NoRoute,
    MethodNotAllowed,
    PayloadTooLarge,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(EngineError::NotFound(..)) | ApiError::NoRoute => StatusCode::NOT_FOUND,
            ApiError::Engine(EngineError::WalError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Engine(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    fn into_response(self) -> HttpResponse {
        let status = self.status();
        let message = match self {
            ApiError::Engine(e) if e.is_internal() => {
                error!("request failed: {e}");
                "internal error".to_string()
            }
            ApiError::Engine(e) => e.to_string(),
            ApiError::BadRequest(msg) => msg,
            ApiError::NoRoute => "not found".to_string(),
            ApiError::MethodNotAllowed => "method not allowed".to_string(),
            ApiError::PayloadTooLarge => format!("request body exceeds {MAX_BODY_BYTES} bytes"),
        };
        json(status, &ErrorBody { error: message })
    }
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => with_body(status, "application/json", body.into()),
        Err(e) => {
            error!("failed to encode response: {e}");
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from_static(br#"{"error":"internal error"}"#),
            )
        }
    }
}

fn text(status: StatusCode, body: &'static str) -> HttpResponse {
    with_body(status, "text/plain; charset=utf-8", Bytes::from_static(body.as_bytes()))
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn preflight() -> HttpResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type"),
    );
    response
}

/// The web client is served from another origin.
fn allow_any_origin(response: &mut HttpResponse) {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
}

/// Log a served connection's failure without tearing down the accept loop.
pub fn log_connection_error(peer: std::net::SocketAddr, e: &hyper::Error) {
    if e.is_incomplete_message() {
        info!("connection from {peer} closed mid-request");
    } else {
        error!("connection error from {peer}: {e}");
    }
}
