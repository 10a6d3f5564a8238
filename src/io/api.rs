//! HTTP/JSON API over the doorway
//!
//! Every JSON reply carries `"status": "success" | "error"`. Routing is a
//! plain function of (method, path, query, body) so it can be exercised
//! without a socket; `serve` wraps it in the hyper accept loop.

use crate::domain::record::{is_valid_read_date, read_date_now, RecordFilter};
use crate::domain::types::{Direction, SensorLocation, Subsystem};
use crate::io::prometheus::{format_prometheus_metrics, DoorwayGauges};
use crate::services::doorway::{ConfigureError, Doorway};
use crate::services::ledger::LedgerError;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const SERVICE_NAME: &str = "RFID Asset Tracking API";

const TEST_PREFIX: &str = "/api/test/";
const RECORDS_PREFIX: &str = "/api/records/";

/// Routed reply, converted to an HTTP response at the edge
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Json(StatusCode, Value),
    Text(StatusCode, String),
}

impl Reply {
    fn ok(body: Value) -> Self {
        Reply::Json(StatusCode::OK, body)
    }

    fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Reply::Json(status, json!({ "status": "error", "message": message.into() }))
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::error(StatusCode::BAD_REQUEST, message)
    }

    fn not_found() -> Self {
        Self::error(StatusCode::NOT_FOUND, "Not Found")
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Reply::Json(status, _) | Reply::Text(status, _) => *status,
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match self {
            Reply::Json(_, body) => Some(body),
            Reply::Text(..) => None,
        }
    }
}

/// Percent-decode a path segment; invalid UTF-8 leaves it as is
fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Query strings additionally encode spaces as `+`
fn decode_query_component(raw: &str) -> String {
    decode_segment(&raw.replace('+', " "))
}

/// Decode `a=1&b=2`; later keys overwrite earlier ones
fn parse_query(query: Option<&str>) -> FxHashMap<String, String> {
    let mut params = FxHashMap::default();
    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_query_component(key), decode_query_component(value));
    }
    params
}

/// Empty body reads as JSON null
fn parse_body(body: &[u8]) -> Result<Value, Reply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| Reply::bad_request(format!("Invalid JSON body: {e}")))
}

fn str_field<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

/// Route one request
pub async fn route(
    doorway: &Doorway,
    method: &Method,
    path: &str,
    query: Option<&str>,
    body: &[u8],
) -> Reply {
    let path = match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    let params = parse_query(query);

    match (method, path) {
        (&Method::GET, "/") => index(doorway),
        (&Method::GET, "/api/health") => {
            Reply::ok(json!({ "status": "healthy", "timestamp": read_date_now() }))
        }
        (&Method::GET, "/api/status") => status(doorway),
        (&Method::GET, "/api/records") => get_records(doorway, &params),
        (&Method::POST, "/api/records") => add_record(doorway, body),
        (&Method::DELETE, "/api/records") => clear_records(doorway, &params),
        (&Method::GET, "/api/statistics") => {
            Reply::ok(json!({ "status": "success", "data": doorway.ledger().statistics() }))
        }
        (&Method::GET, "/api/config/sensor-range") => {
            let (min, max) = doorway.sensor_range_bounds();
            Reply::ok(json!({
                "status": "success",
                "min": min,
                "max": max,
                "current": doorway.sensor_range(),
            }))
        }
        (&Method::POST, "/api/config/sensor-range") => set_sensor_range(doorway, body).await,
        (&Method::GET, "/api/config/rfid-range") | (&Method::GET, "/api/config/rfid-power") => {
            let (min, max) = doorway.rfid_power_bounds();
            Reply::ok(json!({
                "status": "success",
                "min": min,
                "max": max,
                "current": doorway.rfid_power(),
            }))
        }
        (&Method::POST, "/api/config/rfid-power") => set_rfid_power(doorway, body).await,
        (&Method::GET, "/metrics") => metrics_text(doorway),
        (_, p) if p.starts_with(TEST_PREFIX) => {
            test_route(doorway, method, &p[TEST_PREFIX.len()..], body).await
        }
        (&Method::GET, p) if p.starts_with(RECORDS_PREFIX) => {
            tag_records(doorway, &decode_segment(&p[RECORDS_PREFIX.len()..]))
        }
        _ => Reply::not_found(),
    }
}

fn index(doorway: &Doorway) -> Reply {
    let mode = if doorway.is_mock() { "MOCK (Testing)" } else { "PRODUCTION (Hardware)" };
    let mut body = json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "git_hash": env!("GIT_HASH"),
        "status": "running",
        "mode": mode,
    });

    if doorway.is_mock() {
        body["test_endpoints"] = json!({
            "simulate_movement": "/api/test/simulate-movement",
            "trigger_sensor": "/api/test/trigger-sensor",
            "trigger_rfid": "/api/test/trigger-rfid",
            "sample_tags": "/api/test/sample-tags",
            "scenarios": "/api/test/scenarios",
        });
    }
    Reply::ok(body)
}

fn status(doorway: &Doorway) -> Reply {
    Reply::ok(json!({
        "status": "success",
        "data": doorway.ledger().status(),
        "config": {
            "rfid_power": doorway.rfid_power(),
            "sensor_range": doorway.sensor_range(),
        },
    }))
}

fn record_filter(params: &FxHashMap<String, String>) -> Result<RecordFilter, Reply> {
    let param = |key: &str| params.get(key).map(String::as_str).filter(|v| !v.is_empty());
    let mut filter = RecordFilter::new();

    if let Some(direction) = param("direction") {
        let direction: Direction =
            direction.parse().map_err(|_| Reply::bad_request("Direction must be IN or OUT"))?;
        filter = filter.with_direction(direction);
    }
    if let Some(limit) = param("limit") {
        let limit: usize = limit
            .parse()
            .map_err(|_| Reply::bad_request("limit must be a non-negative integer"))?;
        filter = filter.with_limit(limit);
    }
    if let Some(start) = param("start_date") {
        if !is_valid_read_date(start) {
            return Err(Reply::bad_request("start_date must be YYYY-MM-DD-HH-MM-SS-mmm"));
        }
        filter = filter.with_start(start);
    }
    if let Some(end) = param("end_date") {
        if !is_valid_read_date(end) {
            return Err(Reply::bad_request("end_date must be YYYY-MM-DD-HH-MM-SS-mmm"));
        }
        filter = filter.with_end(end);
    }
    if let Some(tag) = param("rfid_tag") {
        filter = filter.with_tag(tag);
    }
    Ok(filter)
}

fn get_records(doorway: &Doorway, params: &FxHashMap<String, String>) -> Reply {
    let filter = match record_filter(params) {
        Ok(filter) => filter,
        Err(reply) => return reply,
    };
    let records = doorway.ledger().query(&filter);
    Reply::ok(json!({ "status": "success", "count": records.len(), "data": records }))
}

fn tag_records(doorway: &Doorway, tag: &str) -> Reply {
    let records = doorway.ledger().tag_records(tag);
    Reply::ok(json!({
        "status": "success",
        "tag_id": tag,
        "count": records.len(),
        "data": records,
    }))
}

fn add_record(doorway: &Doorway, body: &[u8]) -> Reply {
    let body = match parse_body(body) {
        Ok(body) => body,
        Err(reply) => return reply,
    };
    let (Some(tag), Some(direction)) = (str_field(&body, "rfid_tag"), str_field(&body, "direction"))
    else {
        return Reply::bad_request("Missing required fields: rfid_tag, direction");
    };

    match doorway.ledger().append_manual(tag, direction) {
        Ok(record) => Reply::ok(json!({
            "status": "success",
            "message": "Record added successfully",
            "data": record,
        })),
        Err(LedgerError::InvalidDirection(_)) => Reply::bad_request("Direction must be IN or OUT"),
        Err(e) => Reply::bad_request(e.to_string()),
    }
}

fn clear_records(doorway: &Doorway, params: &FxHashMap<String, String>) -> Reply {
    if params.get("confirm").map(String::as_str) != Some("true") {
        return Reply::bad_request("Add ?confirm=true to clear all records");
    }
    doorway.ledger().clear_all();
    Reply::ok(json!({ "status": "success", "message": "All records cleared" }))
}

/// Pull an unsigned setting out of a JSON body
fn setting_field(body: &[u8], key: &str, unit: &str) -> Result<u32, Reply> {
    let body = parse_body(body)?;
    let value = body
        .get(key)
        .ok_or_else(|| Reply::bad_request(format!("Missing required field: {key} ({unit})")))?;
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| Reply::bad_request(format!("{key} must be a whole number of {unit}")))
}

fn configure_error(err: ConfigureError, unit: &str) -> Reply {
    match err {
        ConfigureError::OutOfRange { min, max, .. } => {
            Reply::bad_request(format!("Value must be between {min}-{max} {unit}"))
        }
        e @ ConfigureError::Device { .. } => {
            Reply::error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

async fn set_sensor_range(doorway: &Doorway, body: &[u8]) -> Reply {
    let meters = match setting_field(body, "range", "meters") {
        Ok(meters) => meters,
        Err(reply) => return reply,
    };
    match doorway.configure_sensor_range(meters).await {
        Ok(meters) => Reply::ok(json!({
            "status": "success",
            "message": format!("Sensor range set to {meters} meters"),
            "range": meters,
        })),
        Err(e) => configure_error(e, "meters"),
    }
}

async fn set_rfid_power(doorway: &Doorway, body: &[u8]) -> Reply {
    let dbm = match setting_field(body, "power", "dBm") {
        Ok(dbm) => dbm,
        Err(reply) => return reply,
    };
    match doorway.configure_rfid_power(dbm).await {
        Ok(dbm) => Reply::ok(json!({
            "status": "success",
            "message": format!("RFID power set to {dbm} dBm"),
            "power": dbm,
        })),
        Err(e) => configure_error(e, "dBm"),
    }
}

fn metrics_text(doorway: &Doorway) -> Reply {
    let stats = doorway.ledger().statistics();
    let gauges = DoorwayGauges {
        ledger_records: stats.total_records,
        current_balance: stats.current_balance,
        connections: [
            Subsystem::RfidReader,
            Subsystem::SensorInside,
            Subsystem::SensorOutside,
        ]
        .map(|s| (s, doorway.connection_state(s))),
    };
    let body = format_prometheus_metrics(&doorway.metrics().snapshot(), &gauges);
    Reply::Text(StatusCode::OK, body)
}

async fn test_route(doorway: &Doorway, method: &Method, name: &str, body: &[u8]) -> Reply {
    let Some(sim) = doorway.simulator() else {
        return Reply::error(
            StatusCode::FORBIDDEN,
            "Test endpoints are only available in mock mode",
        );
    };

    match (method, name) {
        (&Method::GET, "sample-tags") => {
            Reply::ok(json!({ "status": "success", "tags": sim.sample_tags() }))
        }
        (&Method::GET, "scenarios") => Reply::ok(json!({
            "status": "success",
            "scenarios": [
                {
                    "name": "Asset Moving IN",
                    "description": "Simulate an asset being brought into the room",
                    "endpoint": "/api/test/simulate-movement",
                    "method": "POST",
                    "body": { "direction": "IN" },
                },
                {
                    "name": "Asset Moving OUT",
                    "description": "Simulate an asset being taken out of the room",
                    "endpoint": "/api/test/simulate-movement",
                    "method": "POST",
                    "body": { "direction": "OUT" },
                },
                {
                    "name": "Custom Tag IN",
                    "description": "Simulate a specific asset moving in",
                    "endpoint": "/api/test/simulate-movement",
                    "method": "POST",
                    "body": { "direction": "IN", "tag_id": sim.sample_tags()[2] },
                },
                {
                    "name": "Multiple Movements",
                    "description": "Call simulate-movement multiple times with different tags",
                    "note": "Execute multiple requests sequentially",
                },
            ],
        })),
        (&Method::POST, _) => {
            let body = match parse_body(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            let tag_id = str_field(&body, "tag_id");

            match name {
                "trigger-sensor" => {
                    let sensor = str_field(&body, "sensor").unwrap_or("inside");
                    let Ok(location) = sensor.parse::<SensorLocation>() else {
                        return Reply::bad_request("Sensor must be \"inside\" or \"outside\"");
                    };
                    sim.trigger_sensor(location);
                    Reply::ok(json!({
                        "status": "success",
                        "message": format!("Triggered {location} sensor"),
                        "sensor": location,
                    }))
                }
                "trigger-rfid" => {
                    let tag = sim.trigger_tag(tag_id);
                    Reply::ok(json!({
                        "status": "success",
                        "message": "Triggered RFID tag read",
                        "tag_id": tag,
                    }))
                }
                "simulate-movement" => {
                    let direction = str_field(&body, "direction").unwrap_or("IN");
                    let Ok(direction) = direction.parse::<Direction>() else {
                        return Reply::bad_request("Direction must be IN or OUT");
                    };
                    let tag = sim.simulate_movement(direction, tag_id).await;
                    Reply::ok(json!({
                        "status": "success",
                        "message": format!("Simulated movement {direction}"),
                        "tag_id": tag,
                        "direction": direction,
                    }))
                }
                _ => Reply::not_found(),
            }
        }
        _ => Reply::not_found(),
    }
}

fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let (status, content_type, body) = match reply {
        Reply::Json(status, value) => (status, "application/json", value.to_string()),
        Reply::Text(status, text) => {
            (status, "text/plain; version=0.0.4; charset=utf-8", text)
        }
    };
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    doorway: Arc<Doorway>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();

    // CORS preflight
    if parts.method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::new()))
            .expect("static response should not fail"));
    }

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "api_body_read_failed");
            return Ok(into_response(Reply::bad_request("Failed to read request body")));
        }
    };

    let reply = route(&doorway, &parts.method, parts.uri.path(), parts.uri.query(), &body).await;
    debug!(
        method = %parts.method,
        path = %parts.uri.path(),
        status = %reply.status().as_u16(),
        "api_request"
    );
    Ok(into_response(reply))
}

/// Bind and serve until shutdown
pub async fn start_api_server(
    addr: SocketAddr,
    doorway: Arc<Doorway>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener =
        TcpListener::bind(addr).await.with_context(|| format!("Failed to bind API on {addr}"))?;
    serve(listener, doorway, shutdown).await
}

/// Accept loop on an already bound listener
pub async fn serve(
    listener: TcpListener,
    doorway: Arc<Doorway>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("API listener has no local address")?;
    info!(addr = %addr, mock = %doorway.is_mock(), "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let doorway = doorway.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let doorway = doorway.clone();
                                async move { handle_request(req, doorway).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
