//! JSON API served over TCP or a UNIX socket.
//!
//! | Method | Path             | Success                    | Errors                  |
//! |--------|------------------|----------------------------|-------------------------|
//! | GET    | `/devices`       | 200, list ordered by id    |                         |
//! | GET    | `/devices/{key}` | 200, one device            | 404 unknown id or name  |
//! | GET    | `/status`        | 200, status report         |                         |
//! | POST   | `/scan`          | 202, scan scheduled        | 409 scan running        |
//! | POST   | `/reload`        | 200, device count          | 422 invalid credentials |
//!
//! Errors are `{"error": "<message>"}`.  Messages never include a local key.
//!
//! # Handlers never scan (for beginners)
//!
//! `POST /scan` only nudges the background scheduler and returns at once.
//! Every `GET` reads the latest snapshots and returns, so a slow network
//! never makes the API slow.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use tuya_core::{ConfigError, DeviceView, ProtocolVersion};

use crate::application::{
    CredentialStore, DeviceDirectory, LookupError, ScanControl, ScanRequestError, StatusReport,
};

/// Everything a handler can reach.
#[derive(Clone)]
pub struct ApiState {
    pub directory: Arc<DeviceDirectory>,
    pub credentials: Arc<CredentialStore>,
    pub control: Arc<ScanControl>,
    /// Include `local_key` in device responses.
    pub expose_local_keys: bool,
}

/// Builds the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/{key}", get(get_device))
        .route("/status", get(status))
        .route("/scan", post(trigger_scan))
        .route("/reload", post(reload))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────────

/// Wire form of a [`DeviceView`].
#[derive(Debug, Serialize)]
pub struct DeviceDto {
    pub id: String,
    pub name: Option<String>,
    /// `null` when the device is not present.
    pub address: Option<String>,
    pub version: Option<ProtocolVersion>,
    pub configured: bool,
    pub present: bool,
    pub fresh: bool,
    pub stale: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub product_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_key: Option<String>,
}

impl DeviceDto {
    pub fn from_view(view: DeviceView, expose_local_keys: bool) -> Self {
        let present = view.is_present();
        Self {
            id: view.id.to_string(),
            name: view.name,
            address: view.address.map(|a| a.to_string()),
            version: view.version,
            configured: view.configured,
            present,
            fresh: view.fresh,
            stale: view.stale,
            last_seen: view.last_seen,
            product_key: view.product_key,
            local_key: if expose_local_keys {
                view.local_key.map(|k| k.expose().to_string())
            } else {
                None
            },
        }
    }
}

/// Wire form of a [`StatusReport`].
#[derive(Debug, Serialize)]
pub struct StatusDto {
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_scan_error: Option<String>,
    pub last_scan_duration_ms: Option<u64>,
    pub scanning: bool,
    pub scans_completed: u64,
    pub scans_failed: u64,
    pub present_count: usize,
    pub configured_count: usize,
    pub device_count: usize,
    pub credentials_loaded_at: DateTime<Utc>,
    pub last_reload_error: Option<String>,
}

impl From<StatusReport> for StatusDto {
    fn from(report: StatusReport) -> Self {
        Self {
            last_scan_at: report.last_scan_at,
            last_scan_error: report.last_scan_error,
            last_scan_duration_ms: report.last_scan_duration.map(|d| d.as_millis() as u64),
            scanning: report.scanning,
            scans_completed: report.scans_completed,
            scans_failed: report.scans_failed,
            present_count: report.present_count,
            configured_count: report.configured_count,
            device_count: report.device_count,
            credentials_loaded_at: report.credentials_loaded_at,
            last_reload_error: report.last_reload_error,
        }
    }
}

#[derive(Debug, Serialize)]
struct ScanAccepted {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ReloadResult {
    devices: usize,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Request-level failures.  None of them affect other requests.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    NotFound(#[from] LookupError),

    #[error(transparent)]
    ScanBusy(#[from] ScanRequestError),

    #[error(transparent)]
    InvalidCredentials(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ScanBusy(_) => StatusCode::CONFLICT,
            ApiError::InvalidCredentials(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

async fn list_devices(State(state): State<ApiState>) -> Json<Vec<DeviceDto>> {
    let devices = state
        .directory
        .list_devices()
        .into_iter()
        .map(|view| DeviceDto::from_view(view, state.expose_local_keys))
        .collect();
    Json(devices)
}

async fn get_device(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<DeviceDto>, ApiError> {
    let view = state.directory.get_device(&key)?;
    Ok(Json(DeviceDto::from_view(view, state.expose_local_keys)))
}

async fn status(State(state): State<ApiState>) -> Json<StatusDto> {
    Json(state.directory.status().into())
}

async fn trigger_scan(
    State(state): State<ApiState>,
) -> Result<(StatusCode, Json<ScanAccepted>), ApiError> {
    state.control.request_scan()?;
    debug!("manual scan scheduled");
    Ok((
        StatusCode::ACCEPTED,
        Json(ScanAccepted {
            status: "scheduled",
        }),
    ))
}

async fn reload(State(state): State<ApiState>) -> Result<Json<ReloadResult>, ApiError> {
    let credentials = Arc::clone(&state.credentials);
    let devices = tokio::task::spawn_blocking(move || credentials.reload())
        .await
        .map_err(|e| {
            error!(error = %e, "reload task failed");
            ApiError::Internal("reload task failed".to_string())
        })??;
    info!(devices, "credentials reloaded via API");
    Ok(Json(ReloadResult { devices }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
