//! Database model types.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Up,
    Down,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Up => "up",
            CheckStatus::Down => "down",
        }
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(CheckStatus::Up),
            "down" => Ok(CheckStatus::Down),
            other => Err(format!("unknown check status: {}", other)),
        }
    }
}

/// Lifecycle state of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Identified => "identified",
            IncidentStatus::Monitoring => "monitoring",
            IncidentStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for IncidentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "investigating" => Ok(IncidentStatus::Investigating),
            "identified" => Ok(IncidentStatus::Identified),
            "monitoring" => Ok(IncidentStatus::Monitoring),
            "resolved" => Ok(IncidentStatus::Resolved),
            other => Err(format!("unknown incident status: {}", other)),
        }
    }
}

macro_rules! text_enum_sql {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum_sql!(CheckStatus);
text_enum_sql!(IncidentStatus);

/// A site owner who may receive notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// One of `active`, `inactive`, `pending`.
    pub status: String,
}

/// A monitored site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub url: String,
    /// Minutes between checks.
    pub check_interval: i64,
    pub timeout_seconds: i64,
    pub notifications_enabled: bool,
    pub description: Option<String>,
    /// Whether `status_page_slug` is served publicly.
    #[serde(default)]
    pub public_status_page: bool,
    pub status_page_slug: Option<String>,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            id: 0,
            user_id: 0,
            name: String::new(),
            url: String::new(),
            check_interval: 5,
            timeout_seconds: 30,
            notifications_enabled: true,
            description: None,
            public_status_page: false,
            status_page_slug: None,
        }
    }
}

/// The normalized outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: CheckStatus,
    /// Milliseconds from request start to terminal outcome.
    pub response_time: Option<i64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl CheckResult {
    pub fn up(response_time: i64, status_code: u16) -> Self {
        Self {
            status: CheckStatus::Up,
            response_time: Some(response_time),
            status_code: Some(status_code),
            error_message: None,
        }
    }

    pub fn down(response_time: Option<i64>, status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Down,
            response_time,
            status_code,
            error_message: Some(error.into()),
        }
    }
}

/// A persisted check result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRecord {
    pub id: i64,
    pub site_id: i64,
    #[serde(flatten)]
    pub result: CheckResult,
    pub checked_at: DateTime<Utc>,
}

/// A tracked downtime episode.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: i64,
    pub site_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: IncidentStatus,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields needed to open an incident.
#[derive(Debug, Clone)]
pub struct NewIncident {
    pub site_id: i64,
    pub title: String,
    pub description: String,
    pub started_at: DateTime<Utc>,
}

/// Someone to notify about a site's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recipient {
    pub username: String,
    pub email: String,
}

/// Partial edit of an incident. `None` fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<IncidentStatus>,
}

/// Filters for the check log.
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub site_id: Option<i64>,
    pub status: Option<CheckStatus>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self {
            site_id: None,
            status: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// A check joined with the site it belongs to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckLogEntry {
    #[serde(flatten)]
    pub check: CheckRecord,
    pub site_name: String,
    pub site_url: String,
}

/// Public view of a site.
#[derive(Debug, Clone, Serialize)]
pub struct StatusPageSite {
    pub name: String,
    pub url: String,
    pub description: Option<String>,
}

/// Everything a public status page shows for one site.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPage {
    pub site: StatusPageSite,
    /// `up`, `down`, or `unknown` before the first check.
    pub current_status: String,
    /// Share of `up` checks over the last 30 days, two decimals.
    pub uptime_percentage: f64,
    /// Mean response time over the last 30 days, whole milliseconds.
    pub avg_response_time: i64,
    pub last_check: Option<DateTime<Utc>>,
    /// Newest first, at most 24.
    pub recent_checks: Vec<CheckRecord>,
    /// Newest first, at most 10.
    pub incidents: Vec<Incident>,
}
