//! HTTP and WebSocket surface
//!
//! Handlers are thin: they validate input, build a [`Command`], send it
//! through the context and shape the JSON reply. Errors render through
//! [`ApiError`].

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use qlink_core::{Command, Level, Switch, BUTTONS_PER_STATION};
use serde::Deserialize;
use serde_json::{json, Number, Value};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::error::{ApiError, ApiResult};
use crate::hub::Subscription;

pub const SERVICE_NAME: &str = "qlink-bridge";

/// Probe timeout when the caller does not give one
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on a caller-supplied probe timeout
const MAX_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Route table published by `/manifest`: (method, path, description)
pub const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("GET", "/about", "Service name, version and command timeout"),
    ("GET", "/healthz", "Liveness check"),
    ("GET", "/manifest", "This endpoint list"),
    ("GET", "/config", "Controller address, default fade and room definitions"),
    ("GET", "/send/{cmd}", "Send a raw command and return the response line"),
    ("POST", "/device/{id}/set", "Set a load level or switch it on/off"),
    ("GET", "/load/{id}/status", "Query a load level"),
    ("POST", "/button/{station}/{button}", "Simulate a button press"),
    ("GET", "/api/leds/{station}", "Query one station's LEDs"),
    ("GET", "/api/leds", "All known LED states"),
    ("GET", "/monitor/status", "Event monitor state and counters"),
    ("GET", "/settings", "Current settings"),
    ("POST", "/settings", "Update and persist settings"),
    ("GET", "/probe", "TCP connect check against host/port"),
    ("GET", "/events", "WebSocket event stream"),
];

type Ctx = State<Arc<BridgeContext>>;

/// Build the router with tracing, CORS and panic handling
pub fn router(ctx: Arc<BridgeContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    Router::new()
        .route("/about", get(about))
        .route("/healthz", get(healthz))
        .route("/manifest", get(manifest))
        .route("/config", get(config))
        .route("/send/:cmd", get(send_raw))
        .route("/device/:id/set", post(set_device))
        .route("/load/:id/status", get(load_status))
        .route("/button/:station/:button", post(press_button))
        .route("/api/leds/:station", get(station_leds))
        .route("/api/leds", get(all_leds))
        .route("/monitor/status", get(monitor_status))
        .route("/settings", get(get_settings).post(update_settings))
        .route("/probe", get(probe))
        .route("/events", get(events))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// Serve until `shutdown` resolves
pub async fn serve(
    ctx: Arc<BridgeContext>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> crate::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(detail).into_response()
}

async fn not_found() -> ApiError {
    ApiError::NotFound("no such endpoint".into())
}

fn bad_path(rejection: PathRejection) -> ApiError {
    ApiError::Validation(rejection.body_text())
}

// ============================================================================
// Service info
// ============================================================================

async fn about(State(ctx): Ctx) -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "timeout": ctx.settings().timeout.as_secs_f64(),
    }))
}

async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn manifest() -> Json<Value> {
    let endpoints: Vec<Value> = ENDPOINTS
        .iter()
        .map(|(method, path, description)| {
            json!({ "method": method, "path": path, "description": description })
        })
        .collect();

    Json(json!({
        "name": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": endpoints,
    }))
}

async fn config(State(ctx): Ctx) -> Json<Value> {
    let settings = ctx.settings();
    let rooms = match ctx.loads().await {
        Ok(loads) => loads.rooms(),
        Err(e) => {
            warn!("Could not load rooms: {}", e);
            Vec::new()
        }
    };

    Json(json!({
        "ip": settings.vantage_ip,
        "port": settings.vantage_port,
        "fade": settings.fade,
        "rooms": rooms,
    }))
}

// ============================================================================
// Controller commands
// ============================================================================

async fn send_raw(
    State(ctx): Ctx,
    path: Result<Path<String>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(cmd) = path.map_err(bad_path)?;
    let response = ctx.send_raw(&cmd).await?;
    Ok(Json(json!({ "command": cmd, "response": response })))
}

/// `fade` in a set request: `true` for the configured default, or seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FadeArg {
    Default(bool),
    Seconds(f64),
}

#[derive(Debug, Default, Deserialize)]
pub struct SetDeviceBody {
    pub level: Option<Number>,
    pub switch: Option<String>,
    pub fade: Option<FadeArg>,
}

impl SetDeviceBody {
    /// Build the `VLO` command; fails without touching the controller
    pub fn command(&self, load: u32, default_fade: &str) -> ApiResult<Command> {
        let level = match (&self.switch, &self.level) {
            (Some(switch), _) => switch
                .parse::<Switch>()
                .map_err(|_| ApiError::Validation("switch must be on/off".into()))?
                .level(),
            (None, Some(level)) => clamp_level(level),
            (None, None) => return Err(ApiError::Validation("provide switch or level".into())),
        };

        let fade = match self.fade {
            None | Some(FadeArg::Default(false)) => None,
            Some(FadeArg::Default(true)) => Some(default_fade.to_string()),
            Some(FadeArg::Seconds(secs)) if secs.is_finite() && secs >= 0.0 => Some(secs.to_string()),
            Some(FadeArg::Seconds(_)) => {
                return Err(ApiError::Validation("fade must be a non-negative number".into()))
            }
        };

        Ok(Command::SetLevel { load, level, fade })
    }
}

async fn set_device(
    State(ctx): Ctx,
    path: Result<Path<u32>, PathRejection>,
    body: Result<Json<SetDeviceBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = path.map_err(bad_path)?;
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;

    let command = body.command(id, &ctx.settings().fade)?;
    let resp = ctx.send(&command).await?;
    Ok(Json(json!({ "resp": resp })))
}

/// Out-of-range integers saturate and fractions truncate
fn clamp_level(value: &Number) -> Level {
    match value.as_i64() {
        Some(level) => Level::clamped(level),
        None => Level::clamped_f64(value.as_f64().unwrap_or(f64::MAX)),
    }
}

/// Level from a `VGL@` reply such as `75` or `VGL 251 75`
fn parse_level(resp: &str) -> Option<i64> {
    resp.split_whitespace().last()?.parse().ok()
}

async fn load_status(
    State(ctx): Ctx,
    path: Result<Path<u32>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(id) = path.map_err(bad_path)?;
    let resp = ctx.send(&Command::GetLevel { load: id }).await?;
    let level = parse_level(&resp);
    Ok(Json(json!({ "resp": resp, "level": level })))
}

async fn press_button(
    State(ctx): Ctx,
    path: Result<Path<(u32, u8)>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path((station, button)) = path.map_err(bad_path)?;
    if !(1..=BUTTONS_PER_STATION).contains(&button) {
        return Err(ApiError::Validation(format!(
            "button must be between 1 and {}",
            BUTTONS_PER_STATION
        )));
    }

    let address = ctx.stations().resolve(station);
    let command = Command::PressButton {
        master: address.master,
        station,
        button,
    };
    let resp = ctx.send(&command).await?;

    Ok(Json(json!({
        "resp": resp,
        "master": address.master,
        "station": station,
        "button": button,
    })))
}

// ============================================================================
// LED state
// ============================================================================

async fn station_leds(
    State(ctx): Ctx,
    path: Result<Path<u32>, PathRejection>,
) -> ApiResult<Json<Value>> {
    let Path(station) = path.map_err(bad_path)?;
    let query = ctx.query_leds(station).await?;

    Ok(Json(json!({
        "station": station,
        "station_id": format!("V{}", station),
        "master": query.address.master,
        "physical": query.address.physical,
        "mapping": query.address.mapping,
        "raw": query.raw,
        "on_leds": query.report.on_leds,
        "blink_leds": query.report.blink_leds,
        "button_states": query.report.button_states(),
        "leds": query.report.brightness(),
    })))
}

async fn all_leds(State(ctx): Ctx) -> Json<Value> {
    let stations = ctx.store().snapshot();
    Json(json!({
        "count": stations.len(),
        "stations": stations,
    }))
}

// ============================================================================
// Monitor and settings
// ============================================================================

async fn monitor_status(State(ctx): Ctx) -> Json<Value> {
    let settings = ctx.settings();
    let snapshot = ctx.status().snapshot();
    let clients = ctx.hub().subscriber_count().await;

    Json(json!({
        "mode": settings.monitor_mode,
        "state": snapshot.state,
        "event_listener_connected": snapshot.connected,
        "monitoring_enabled": snapshot.monitoring,
        "events_seen": snapshot.events_seen,
        "polls_completed": snapshot.polls_completed,
        "poll_errors": snapshot.poll_errors,
        "websocket_clients": clients,
        "vantage_ip": settings.vantage_ip,
        "vantage_port": settings.vantage_port,
    }))
}

async fn get_settings(State(ctx): Ctx) -> Json<Value> {
    Json(ctx.settings().view())
}

async fn update_settings(
    State(ctx): Ctx,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body.map_err(|e| ApiError::Validation(e.body_text()))?;
    let body = body
        .as_object()
        .ok_or_else(|| ApiError::Validation("settings must be a JSON object".into()))?;

    let outcome = ctx.update_settings(body).await;
    info!(updated = ?outcome.report.updated, "Settings updated");

    Ok(Json(json!({
        "status": "ok",
        "updated": outcome.report.updated,
        "restart_required": outcome.report.restart_required,
        "message": outcome.report.message(),
        "persisted": outcome.persisted,
    })))
}

#[derive(Debug, Deserialize)]
pub struct ProbeQuery {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Seconds
    pub timeout: Option<f64>,
}

async fn probe(
    State(ctx): Ctx,
    query: Result<Query<ProbeQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    let settings = ctx.settings();

    let host = query.host.unwrap_or(settings.vantage_ip);
    let port = query.port.unwrap_or(settings.vantage_port);
    let timeout = match query.timeout {
        None => DEFAULT_PROBE_TIMEOUT,
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            Duration::from_secs_f64(secs).min(MAX_PROBE_TIMEOUT)
        }
        Some(_) => return Err(ApiError::Validation("timeout must be positive".into())),
    };

    let target = format!("{}:{}", host, port);
    let result = qlink_transport::probe(&target, timeout).await;
    debug!(target = %target, ok = result.is_ok(), "probe");

    Ok(Json(match result {
        Ok(elapsed) => json!({
            "host": host,
            "port": port,
            "reachable": true,
            "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
        }),
        Err(e) => json!({
            "host": host,
            "port": port,
            "reachable": false,
            "error": e.kind(),
            "detail": e.to_string(),
        }),
    }))
}

// ============================================================================
// WebSocket events
// ============================================================================

async fn events(State(ctx): Ctx, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Initial message sent to every new subscriber
pub fn status_message(ctx: &BridgeContext) -> Value {
    let snapshot = ctx.status().snapshot();
    json!({
        "type": "status",
        "connected": snapshot.connected,
        "monitoring": snapshot.monitoring,
        "monitor": snapshot,
        "leds": ctx.store().snapshot(),
        "timestamp": Utc::now(),
    })
}

async fn handle_socket(socket: WebSocket, ctx: Arc<BridgeContext>) {
    let Some(Subscription { id, mut rx }) = ctx.hub().subscribe().await else {
        warn!("Broadcast hub unavailable; closing WebSocket");
        return;
    };

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let status = status_message(&ctx).to_string();
    if ws_sender.send(Message::Text(status)).await.is_err() {
        ctx.hub().unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_sender.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    ctx.hub().unsubscribe(id);
    debug!("WebSocket {} closed", id);
}
