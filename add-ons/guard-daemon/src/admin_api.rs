//! Loopback HTTP API for the external admin dashboard.
//!
//! Every mutating route carries the admin password, either in the JSON body or (for
//! raw document uploads) in the `x-admin-password` header, and goes through the same
//! lockout-aware gate as the on-screen password box. Read-only admin routes take the
//! header too. `/access` is the launcher's pre-flight check against the settings lock.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use guard_core::{AdminSurface, AuthError, GuardError};
use guard_sentinel::{Access, OverlayStatus, SettingsLock};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub const PASSWORD_HEADER: &str = "x-admin-password";
const DEFAULT_INCIDENT_LIMIT: usize = 50;

type ApiResult = Result<Json<Value>, (StatusCode, String)>;

#[derive(Clone)]
pub struct ApiState {
    admin: Arc<AdminSurface>,
    overlay: watch::Receiver<OverlayStatus>,
    settings: Option<Arc<SettingsLock>>,
}

impl ApiState {
    pub fn new(admin: Arc<AdminSurface>, overlay: watch::Receiver<OverlayStatus>) -> Self {
        Self {
            admin,
            overlay,
            settings: None,
        }
    }

    pub fn with_settings_lock(mut self, settings: Option<Arc<SettingsLock>>) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Debug, Deserialize)]
struct PasswordRequest {
    password: String,
}

#[derive(Debug, Deserialize)]
struct WhitenRequest {
    password: String,
    machine_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MaintenanceRequest {
    password: String,
    enabled: bool,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    current: String,
    new_password: String,
}

#[derive(Debug, Deserialize)]
struct IncidentQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AccessQuery {
    target: String,
}

fn denied() -> (StatusCode, String) {
    (StatusCode::UNAUTHORIZED, "authentication failed".to_string())
}

fn auth_failure(err: AuthError) -> (StatusCode, String) {
    match err {
        AuthError::LockedOut { .. } => (StatusCode::TOO_MANY_REQUESTS, err.to_string()),
        other => (StatusCode::UNAUTHORIZED, other.to_string()),
    }
}

fn guard_failure(err: GuardError) -> (StatusCode, String) {
    match err {
        GuardError::Auth(err) => auth_failure(err),
        GuardError::UnknownMachine(_) => (StatusCode::NOT_FOUND, err.to_string()),
        GuardError::Config(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

fn header_password(headers: &HeaderMap) -> Result<&str, (StatusCode, String)> {
    headers
        .get(PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, format!("missing {} header", PASSWORD_HEADER)))
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/live", get(live))
        .route("/access", get(access))
        .route("/admin/authenticate", post(authenticate))
        .route("/admin/override", post(override_lockdown))
        .route("/admin/whiten", post(whiten))
        .route("/admin/maintenance", post(maintenance))
        .route("/admin/password", post(change_password))
        .route("/admin/wordlist", put(reload_wordlist))
        .route("/admin/sanctions", put(reload_sanctions))
        .route("/admin/state/:machine", get(violation_state))
        .route("/admin/incidents", get(incidents))
        .with_state(state)
}

/// Serve on `bind` until cancelled. Refuses anything but a loopback address.
pub async fn serve(bind: String, state: ApiState, cancel: CancellationToken) {
    let addr: SocketAddr = match bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, bind = %bind, "[ADMIN] invalid admin_bind; API disabled");
            return;
        }
    };
    if !addr.ip().is_loopback() {
        tracing::error!(bind = %bind, "[ADMIN] admin API only binds to loopback; API disabled");
        return;
    }

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, bind = %bind, "[ADMIN] could not bind admin API");
            return;
        }
    };
    tracing::info!(bind = %addr, "[ADMIN] admin API listening");

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await });
    if let Err(e) = server.await {
        tracing::error!(error = %e, "[ADMIN] admin API stopped");
    }
}

/// GET /health – liveness plus enforcement state.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    let overlay = state.overlay.borrow().clone();
    Json(json!({
        "status": "ok",
        "machine_id": state.admin.machine_id(),
        "maintenance": state.admin.maintenance_active(),
        "overlay": overlay,
    }))
}

/// GET /live – transcripts inside the display window.
async fn live(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({ "transcripts": state.admin.live_transcript() }))
}

/// GET /access?target=… – 403 while the settings lock holds `target` closed.
async fn access(State(state): State<ApiState>, Query(query): Query<AccessQuery>) -> ApiResult {
    if let Some(lock) = &state.settings {
        lock.ensure_allowed(&query.target)
            .map_err(|e| (StatusCode::FORBIDDEN, e.to_string()))?;
    }
    Ok(Json(json!({ "target": query.target, "access": Access::Allowed })))
}

async fn authenticate(State(state): State<ApiState>, Json(body): Json<PasswordRequest>) -> ApiResult {
    state
        .admin
        .try_authenticate(&body.password)
        .map_err(auth_failure)?;
    Ok(Json(json!({ "authenticated": true })))
}

async fn override_lockdown(State(state): State<ApiState>, Json(body): Json<PasswordRequest>) -> ApiResult {
    let was_locked = state
        .admin
        .try_override_lockdown(&body.password)
        .await
        .map_err(guard_failure)?;
    Ok(Json(json!({ "unlocked": true, "was_locked": was_locked })))
}

async fn whiten(State(state): State<ApiState>, Json(body): Json<WhitenRequest>) -> ApiResult {
    let machine = body
        .machine_id
        .unwrap_or_else(|| state.admin.machine_id().to_string());
    let previous = state
        .admin
        .try_whiten_violations(&machine, &body.password)
        .await
        .map_err(guard_failure)?;
    Ok(Json(json!({ "whitened": machine, "previous": previous })))
}

async fn maintenance(State(state): State<ApiState>, Json(body): Json<MaintenanceRequest>) -> ApiResult {
    if !state.admin.set_maintenance(&body.password, body.enabled) {
        return Err(denied());
    }
    Ok(Json(json!({ "maintenance": body.enabled })))
}

async fn change_password(State(state): State<ApiState>, Json(body): Json<ChangePasswordRequest>) -> ApiResult {
    state
        .admin
        .change_password(&body.current, &body.new_password)
        .map_err(guard_failure)?;
    Ok(Json(json!({ "changed": true })))
}

/// PUT /admin/wordlist – replace the whole wordlist; a rejected document leaves the
/// current list in force.
async fn reload_wordlist(State(state): State<ApiState>, headers: HeaderMap, body: String) -> ApiResult {
    state
        .admin
        .try_authenticate(header_password(&headers)?)
        .map_err(auth_failure)?;
    let terms = state
        .admin
        .reload_wordlist(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(json!({ "terms": terms })))
}

async fn reload_sanctions(State(state): State<ApiState>, headers: HeaderMap, body: String) -> ApiResult {
    state
        .admin
        .try_authenticate(header_password(&headers)?)
        .map_err(auth_failure)?;
    state
        .admin
        .reload_sanction_config(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    Ok(Json(json!({ "reloaded": true })))
}

async fn violation_state(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(machine): Path<String>,
) -> ApiResult {
    state
        .admin
        .try_authenticate(header_password(&headers)?)
        .map_err(auth_failure)?;
    let snapshot = state
        .admin
        .violation_state(&machine)
        .await
        .map_err(guard_failure)?;
    Ok(Json(json!({ "machine_id": machine, "state": snapshot })))
}

async fn incidents(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<IncidentQuery>,
) -> ApiResult {
    state
        .admin
        .try_authenticate(header_password(&headers)?)
        .map_err(auth_failure)?;
    let limit = query.limit.unwrap_or(DEFAULT_INCIDENT_LIMIT).min(1000);
    let recent = state
        .admin
        .recent_incidents(limit)
        .map_err(guard_failure)?;
    Ok(Json(json!({ "incidents": recent })))
}
