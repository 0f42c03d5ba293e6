/**
 * API REST BYOP - Serveur HTTP du kernel
 *
 * RÔLE :
 * Expose le registre des devices, les diagnostics et la télémétrie pixel
 * aux outils humains (dashboard, scripts, visualiseur).
 *
 * FONCTIONNEMENT :
 * - Serveur Axum, réponses JSON
 * - /devices : CRUD + poll + corrections
 * - /api/pixelData : dernière frame, /api/pixelDataFeed : websocket
 *
 * SÉCURITÉ :
 * - Header x-api-key exigé sur les routes POST/PUT si BYOP_API_KEY est défini
 * - Les lectures restent ouvertes
 */

use crate::device::{Device, DeviceHealth, FixId, Sighting};
use crate::diagnostics::{Diagnostics, DiagnosticsError};
use crate::health::{HealthTracker, KernelHealth};
use crate::listener::{TelemetryFeed, TelemetryFrame};
use crate::registry::RegistryError;
use crate::state::SharedRegistry;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub diagnostics: Diagnostics,
    pub telemetry: TelemetryFeed,
    pub health: HealthTracker,
    pub api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Diagnostics(#[from] DiagnosticsError),
    #[error("unknown fix {0:?}")]
    UnknownFix(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(RegistryError::Parse(_)) | ApiError::UnknownFix(_) => StatusCode::BAD_REQUEST,
            ApiError::Registry(RegistryError::DuplicateHost(_)) => StatusCode::CONFLICT,
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Diagnostics(e) => match e {
                DiagnosticsError::NotFound(_) => StatusCode::NOT_FOUND,
                DiagnosticsError::NoHost(_) | DiagnosticsError::Config { .. } => StatusCode::CONFLICT,
                DiagnosticsError::Unreachable { .. } | DiagnosticsError::Rejected(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!("api error {status}: {self}");
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn require_api_key(State(app): State<AppState>, req: Request, next: Next) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };
    if !matches!(*req.method(), Method::POST | Method::PUT) {
        return Ok(next.run(req).await);
    }

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!("rejected {} {}: bad or missing x-api-key", req.method(), req.uri().path());
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/system/health", get(get_system_health))
        .route("/devices", get(list_devices).post(register_device))
        .route("/devices/unregistered", get(list_unregistered))
        .route("/devices/{id}", get(get_device).put(update_device))
        .route("/devices/{id}/poll", post(poll_device))
        .route("/devices/{id}/fix/{fix_id}", post(apply_fix))
        .route("/api/pixelData", get(get_pixel_data))
        .route("/api/pixelDataFeed", get(pixel_data_feed))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_api_key))
        .with_state(app_state)
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    x: f64,
    y: f64,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    pixels: Value,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    x: f64,
    y: f64,
    #[serde(default)]
    pixels: Value,
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<KernelHealth> {
    Json(app.health.get_health(&app.registry))
}

// GET /devices
async fn list_devices(State(app): State<AppState>) -> Json<Vec<Device>> {
    Json(app.registry.lock().registered_devices().to_vec())
}

// POST /devices
async fn register_device(
    State(app): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = app.registry.lock().register_device(body.x, body.y, body.host, &body.pixels)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

// GET /devices/unregistered
async fn list_unregistered(State(app): State<AppState>) -> Json<BTreeMap<String, Sighting>> {
    Json(app.registry.lock().unregistered_devices().clone())
}

// GET /devices/{id}
async fn get_device(State(app): State<AppState>, Path(id): Path<u32>) -> Result<Json<Device>, ApiError> {
    let registry = app.registry.lock();
    let device = registry.device(id).ok_or(RegistryError::NotFound(id))?;
    Ok(Json(device.clone()))
}

// PUT /devices/{id}
async fn update_device(
    State(app): State<AppState>,
    Path(id): Path<u32>,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Device>, ApiError> {
    let mut registry = app.registry.lock();
    registry.update_device(id, body.x, body.y, &body.pixels)?;
    let device = registry.device(id).ok_or(RegistryError::NotFound(id))?;
    Ok(Json(device.clone()))
}

// POST /devices/{id}/poll
async fn poll_device(State(app): State<AppState>, Path(id): Path<u32>) -> Result<Json<DeviceHealth>, ApiError> {
    Ok(Json(app.diagnostics.poll_device(id).await?))
}

// POST /devices/{id}/fix/{fix_id}
async fn apply_fix(
    State(app): State<AppState>,
    Path((id, fix_id)): Path<(u32, String)>,
) -> Result<Json<DeviceHealth>, ApiError> {
    let fix = FixId::parse(&fix_id).ok_or(ApiError::UnknownFix(fix_id))?;
    app.diagnostics.apply_fix(id, fix).await?;
    let registry = app.registry.lock();
    let device = registry.device(id).ok_or(RegistryError::NotFound(id))?;
    Ok(Json(device.health.clone()))
}

// GET /api/pixelData
async fn get_pixel_data(State(app): State<AppState>) -> Json<TelemetryFrame> {
    Json(TelemetryFrame::clone(&app.telemetry.snapshot()))
}

// GET /api/pixelDataFeed
async fn pixel_data_feed(State(app): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream_frames(socket, app.telemetry))
}

/// Envoie la frame courante puis chaque nouvelle frame. Un client trop lent
/// saute des frames plutôt que de freiner le tick.
async fn stream_frames(mut socket: WebSocket, feed: TelemetryFeed) {
    let mut frames = feed.subscribe();
    let mut next = Ok(feed.snapshot());
    loop {
        let frame = match next {
            Ok(frame) => frame,
            Err(RecvError::Lagged(skipped)) => {
                debug!("pixel feed client lagging, skipped {skipped} frames");
                next = frames.recv().await;
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let text = match serde_json::to_string(&*frame) {
            Ok(text) => text,
            Err(e) => {
                warn!("pixel feed: {e}");
                break;
            }
        };
        if socket.send(Message::Text(text.into())).await.is_err() {
            break;
        }
        next = frames.recv().await;
    }
}
