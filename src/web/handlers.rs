//! HTTP request handlers.

use super::AppState;
use crate::db::{CheckResult, CheckStatus, DbError, IncidentUpdate, LogQuery, Site, User};
use crate::notify::TestAlert;
use crate::scheduler::SchedulerError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn db_error_response(e: DbError) -> Response {
    match e {
        DbError::NotFound => error_response(StatusCode::NOT_FOUND, "Not found"),
        DbError::Conflict(message) => error_response(StatusCode::CONFLICT, message),
        other => error_response(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

// ============================================================================
// Monitoring controls
// ============================================================================

pub async fn handle_monitoring_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": state.scheduler.status().await,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

pub async fn handle_monitoring_start(State(state): State<AppState>) -> impl IntoResponse {
    let message = if state.scheduler.start().await {
        "Monitoring scheduler started successfully"
    } else {
        "Monitoring scheduler is already running"
    };

    Json(json!({
        "message": message,
        "status": state.scheduler.status().await,
    }))
}

pub async fn handle_monitoring_stop(State(state): State<AppState>) -> impl IntoResponse {
    let message = if state.scheduler.stop().await {
        "Monitoring scheduler stopped successfully"
    } else {
        "Monitoring scheduler is not running"
    };

    Json(json!({
        "message": message,
        "status": state.scheduler.status().await,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    pub site_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckResponse {
    #[serde(flatten)]
    result: CheckResult,
    timestamp: DateTime<Utc>,
}

pub async fn handle_monitoring_check(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> Response {
    match state.scheduler.check_one(req.site_id).await {
        Ok(result) => Json(json!({
            "message": "Site check completed",
            "result": CheckResponse {
                result,
                timestamp: Utc::now(),
            },
        }))
        .into_response(),
        Err(SchedulerError::SiteNotFound(_)) => error_response(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => {
            tracing::error!("Manual site check failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to check site")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEmailRequest {
    pub test_type: TestAlert,
    pub email: String,
}

pub async fn handle_test_email(
    State(state): State<AppState>,
    Json(req): Json<TestEmailRequest>,
) -> Response {
    if req.email.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Email address is required");
    }

    let summary = state.notifier.send_test(req.test_type, req.email.trim()).await;
    let success = summary.delivered > 0;
    let message = match (success, req.test_type) {
        (true, TestAlert::SiteDown) => "Site down test email sent",
        (true, TestAlert::SiteUp) => "Site recovery test email sent",
        (false, _) => "Email sending failed - check server logs and mail relay configuration",
    };

    Json(json!({
        "success": success,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

// ============================================================================
// Status pages
// ============================================================================

pub async fn handle_status_page(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    match state.store.get_status_page(&slug, Utc::now()) {
        Ok(page) => Json(page).into_response(),
        Err(DbError::NotFound) => error_response(StatusCode::NOT_FOUND, "Status page not found"),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// Sites
// ============================================================================

pub async fn handle_get_sites(State(state): State<AppState>) -> Response {
    match state.store.get_sites() {
        Ok(sites) => Json(sites).into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSiteRequest {
    pub user_id: i64,
    pub name: String,
    pub url: String,
    #[serde(default = "default_check_interval")]
    pub check_interval: i64,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: i64,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub public_status_page: bool,
    #[serde(default)]
    pub status_page_slug: Option<String>,
}

fn default_check_interval() -> i64 {
    5
}

fn default_timeout() -> i64 {
    30
}

fn default_true() -> bool {
    true
}

pub async fn handle_create_site(
    State(state): State<AppState>,
    Json(req): Json<CreateSiteRequest>,
) -> Response {
    if !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
        return error_response(StatusCode::BAD_REQUEST, "URL must start with http:// or https://");
    }
    if req.check_interval < 0 {
        return error_response(StatusCode::BAD_REQUEST, "check_interval cannot be negative");
    }

    let mut site = Site {
        id: 0,
        user_id: req.user_id,
        name: req.name,
        url: req.url,
        check_interval: req.check_interval,
        timeout_seconds: req.timeout_seconds,
        notifications_enabled: req.notifications_enabled,
        description: req.description,
        public_status_page: req.public_status_page,
        status_page_slug: req.status_page_slug.filter(|slug| !slug.trim().is_empty()),
    };

    match state.store.add_site(&mut site) {
        Ok(_) => (StatusCode::CREATED, Json(site)).into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    pub limit: Option<i64>,
}

pub async fn handle_get_checks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ChecksQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    match state.store.get_checks(id, limit) {
        Ok(checks) => Json(checks).into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub site_id: Option<i64>,
    /// `up`, `down`, or `all`.
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn handle_get_logs(State(state): State<AppState>, Query(query): Query<LogsQuery>) -> Response {
    let status = match query.status.as_deref() {
        None | Some("all") => None,
        Some(s) => match s.parse::<CheckStatus>() {
            Ok(status) => Some(status),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        },
    };

    let filter = LogQuery {
        site_id: query.site_id,
        status,
        limit: query.limit.unwrap_or(50).clamp(1, 1000),
        offset: query.offset.unwrap_or(0).max(0),
    };

    match state.store.get_logs(&filter) {
        Ok(logs) => Json(json!({ "logs": logs })).into_response(),
        Err(e) => db_error_response(e),
    }
}

// ============================================================================
// Incidents and users
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    pub site_id: Option<i64>,
}

pub async fn handle_get_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> Response {
    match state.store.get_incidents(query.site_id) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_update_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<IncidentUpdate>,
) -> Response {
    if let Some(title) = &update.title {
        if title.trim().is_empty() || title.chars().count() > 255 {
            return error_response(StatusCode::BAD_REQUEST, "Title must be 1-255 characters");
        }
    }

    match state.store.update_incident(id, &update, Utc::now()) {
        Ok(incident) => Json(json!({ "incident": incident })).into_response(),
        Err(DbError::NotFound) => error_response(StatusCode::NOT_FOUND, "Incident not found"),
        Err(e) => db_error_response(e),
    }
}

pub async fn handle_get_users(State(state): State<AppState>) -> Response {
    match state.store.get_users() {
        Ok(users) => Json(users).into_response(),
        Err(e) => db_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn handle_create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    let status = req.status.unwrap_or_else(|| "active".to_string());
    if !["active", "inactive", "pending"].contains(&status.as_str()) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid user status");
    }

    let mut user = User {
        id: 0,
        username: req.username,
        email: req.email,
        status,
    };

    match state.store.add_user(&mut user) {
        Ok(_) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) => db_error_response(e),
    }
}
