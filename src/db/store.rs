//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

mod embedded {
    refinery::embed_migrations!("migrations");
}

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("connection lock poisoned")]
    Poisoned,
}

/// The persistence operations the monitoring core depends on.
///
/// Implementations must be safe to call from concurrent probe tasks.
pub trait CheckStore: Send + Sync {
    /// Sites with a positive check interval, ordered by id.
    fn list_monitorable_sites(&self) -> Result<Vec<Site>, DbError>;

    fn get_site(&self, id: i64) -> Result<Site, DbError>;

    /// Append a check result to the site's history.
    fn record_check(
        &self,
        site_id: i64,
        result: &CheckResult,
        checked_at: DateTime<Utc>,
    ) -> Result<CheckRecord, DbError>;

    fn last_check_time(&self, site_id: i64) -> Result<Option<DateTime<Utc>>, DbError>;

    /// The two most recent checks, newest first.
    fn last_two_checks(&self, site_id: i64) -> Result<Vec<CheckRecord>, DbError>;

    /// Timestamp of the earliest check in the unbroken run of `down` results
    /// recorded immediately before check `before_id`.
    fn down_run_started_at(
        &self,
        site_id: i64,
        before_id: i64,
    ) -> Result<Option<DateTime<Utc>>, DbError>;

    fn open_incident_exists(&self, site_id: i64) -> Result<bool, DbError>;

    /// Open an incident. Returns `false` when the site already has an open one.
    fn insert_incident(&self, incident: &NewIncident) -> Result<bool, DbError>;

    /// Resolve every open incident for the site, returning how many changed.
    fn resolve_open_incidents(&self, site_id: i64, at: DateTime<Utc>) -> Result<usize, DbError>;

    /// Active users owning the site, when it has notifications enabled.
    fn notification_recipients(&self, site_id: i64) -> Result<Vec<Recipient>, DbError>;
}

const SITE_COLUMNS: &str = "id, user_id, name, url, check_interval, timeout_seconds, \
    notifications_enabled, description, public_status_page, status_page_slug";

const CHECK_COLUMNS: &str =
    "id, site_id, status, response_time, status_code, error_message, checked_at";

const INCIDENT_COLUMNS: &str =
    "id, site_id, title, description, status, started_at, resolved_at, updated_at";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Create a store backed by a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(mut conn: Connection) -> Result<Self, DbError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Users ---

    /// Add a new user and return its ID.
    pub fn add_user(&self, user: &mut User) -> Result<i64, DbError> {
        if user.status.is_empty() {
            user.status = "active".to_string();
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (username, email, status) VALUES (?1, ?2, ?3)",
            params![user.username, user.email, user.status],
        )
        .map_err(|e| conflict_or(e, "username or email already registered"))?;
        user.id = conn.last_insert_rowid();
        Ok(user.id)
    }

    pub fn get_users(&self) -> Result<Vec<User>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, username, email, status FROM users ORDER BY id")?;
        let users = stmt
            .query_map([], |row| {
                Ok(User {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    status: row.get(3)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(users)
    }

    // --- Sites ---

    /// Add a new site and return its ID.
    pub fn add_site(&self, site: &mut Site) -> Result<i64, DbError> {
        if site.timeout_seconds <= 0 {
            site.timeout_seconds = 30;
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sites (user_id, name, url, check_interval, timeout_seconds, notifications_enabled,
                                description, public_status_page, status_page_slug)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                site.user_id,
                site.name,
                site.url,
                site.check_interval,
                site.timeout_seconds,
                site.notifications_enabled,
                site.description,
                site.public_status_page,
                site.status_page_slug,
            ],
        )
        .map_err(|e| conflict_or(e, "status page slug already in use"))?;
        site.id = conn.last_insert_rowid();
        Ok(site.id)
    }

    /// Get all sites, including those with monitoring disabled.
    pub fn get_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {SITE_COLUMNS} FROM sites ORDER BY id"))?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    // --- Checks ---

    /// Most recent checks for a site, newest first.
    pub fn get_checks(&self, site_id: i64, limit: i64) -> Result<Vec<CheckRecord>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHECK_COLUMNS} FROM site_checks WHERE site_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        let checks = stmt
            .query_map(params![site_id, limit], check_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Checks across sites joined with their site, newest first.
    pub fn get_logs(&self, query: &LogQuery) -> Result<Vec<CheckLogEntry>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT sc.id, sc.site_id, sc.status, sc.response_time, sc.status_code,
                    sc.error_message, sc.checked_at, s.name, s.url
             FROM site_checks sc
             JOIN sites s ON s.id = sc.site_id
             WHERE (?1 IS NULL OR sc.site_id = ?1) AND (?2 IS NULL OR sc.status = ?2)
             ORDER BY sc.checked_at DESC, sc.id DESC
             LIMIT ?3 OFFSET ?4",
        )?;
        let logs = stmt
            .query_map(
                params![query.site_id, query.status, query.limit, query.offset],
                |row| {
                    Ok(CheckLogEntry {
                        check: check_from_row(row)?,
                        site_name: row.get(7)?,
                        site_url: row.get(8)?,
                    })
                },
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(logs)
    }

    // --- Status pages ---

    /// Public status summary for the site published under `slug`.
    ///
    /// Uptime and average response time cover the 30 days before `now`.
    pub fn get_status_page(&self, slug: &str, now: DateTime<Utc>) -> Result<StatusPage, DbError> {
        let site = {
            let conn = self.conn()?;
            conn.query_row(
                &format!(
                    "SELECT {SITE_COLUMNS} FROM sites
                     WHERE status_page_slug = ?1 AND public_status_page = 1"
                ),
                params![slug],
                site_from_row,
            )
            .optional()?
            .ok_or(DbError::NotFound)?
        };

        let recent_checks = self.get_checks(site.id, 24)?;

        let conn = self.conn()?;
        let window_start = format_db_time(now - chrono::Duration::days(30));
        let (total, up, avg): (i64, i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN status = 'up' THEN 1 ELSE 0 END), 0),
                    AVG(response_time)
             FROM site_checks
             WHERE site_id = ?1 AND checked_at >= ?2",
            params![site.id, window_start],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE site_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 10"
        ))?;
        let incidents = stmt
            .query_map(params![site.id], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;

        let uptime_percentage = if total > 0 {
            (up as f64 * 100.0 / total as f64 * 100.0).round() / 100.0
        } else {
            0.0
        };

        Ok(StatusPage {
            current_status: recent_checks
                .first()
                .map(|c| c.result.status.as_str())
                .unwrap_or("unknown")
                .to_string(),
            last_check: recent_checks.first().map(|c| c.checked_at),
            uptime_percentage,
            avg_response_time: avg.unwrap_or(0.0).round() as i64,
            recent_checks,
            incidents,
            site: StatusPageSite {
                name: site.name,
                url: site.url,
                description: site.description,
            },
        })
    }

    // --- Incidents ---

    pub fn get_incident(&self, id: i64) -> Result<Incident, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = ?1"),
            params![id],
            incident_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Apply a partial edit to an incident.
    ///
    /// Moving to `resolved` stamps `resolved_at`; moving back to an open
    /// status clears it. Reopening fails with `Conflict` when the site already
    /// has another open incident.
    pub fn update_incident(
        &self,
        id: i64,
        update: &IncidentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Incident, DbError> {
        let existing = self.get_incident(id)?;
        if update.title.is_none() && update.description.is_none() && update.status.is_none() {
            return Ok(existing);
        }

        let status = update.status.unwrap_or(existing.status);
        let resolved_at = match status {
            IncidentStatus::Resolved if existing.status != IncidentStatus::Resolved => Some(now),
            IncidentStatus::Resolved => existing.resolved_at,
            _ => None,
        };

        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE incidents
                 SET title = ?1, description = ?2, status = ?3, resolved_at = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    update.title.as_deref().unwrap_or(&existing.title),
                    update.description.as_deref().or(existing.description.as_deref()),
                    status,
                    resolved_at.map(format_db_time),
                    format_db_time(now),
                    id,
                ],
            )
            .map_err(|e| conflict_or(e, "site already has an open incident"))?;
        }

        self.get_incident(id)
    }

    /// Get incidents, newest first, optionally for a single site.
    pub fn get_incidents(&self, site_id: Option<i64>) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INCIDENT_COLUMNS} FROM incidents
             WHERE ?1 IS NULL OR site_id = ?1 ORDER BY id DESC"
        ))?;
        let incidents = stmt
            .query_map(params![site_id], incident_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }
}

impl CheckStore for Store {
    fn list_monitorable_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE check_interval > 0 ORDER BY id"
        ))?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    fn get_site(&self, id: i64) -> Result<Site, DbError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {SITE_COLUMNS} FROM sites WHERE id = ?1"),
            params![id],
            site_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    fn record_check(
        &self,
        site_id: i64,
        result: &CheckResult,
        checked_at: DateTime<Utc>,
    ) -> Result<CheckRecord, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO site_checks (site_id, status, response_time, status_code, error_message, checked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                site_id,
                result.status,
                result.response_time,
                result.status_code,
                result.error_message,
                format_db_time(checked_at),
            ],
        )?;

        Ok(CheckRecord {
            id: conn.last_insert_rowid(),
            site_id,
            result: result.clone(),
            checked_at,
        })
    }

    fn last_check_time(&self, site_id: i64) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn()?;
        let last = conn
            .query_row(
                "SELECT checked_at FROM site_checks WHERE site_id = ?1 ORDER BY id DESC LIMIT 1",
                params![site_id],
                |row| time_column(row, 0),
            )
            .optional()?;
        Ok(last)
    }

    fn last_two_checks(&self, site_id: i64) -> Result<Vec<CheckRecord>, DbError> {
        self.get_checks(site_id, 2)
    }

    fn down_run_started_at(
        &self,
        site_id: i64,
        before_id: i64,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let conn = self.conn()?;
        let started: Option<String> = conn.query_row(
            "SELECT checked_at FROM site_checks
             WHERE site_id = ?1 AND status = 'down' AND id < ?2
               AND id > COALESCE(
                   (SELECT MAX(id) FROM site_checks WHERE site_id = ?1 AND status = 'up' AND id < ?2),
                   0)
             ORDER BY id ASC LIMIT 1",
            params![site_id, before_id],
            |row| row.get(0),
        )
        .optional()?;

        Ok(started.and_then(|s| parse_db_time(&s)))
    }

    fn open_incident_exists(&self, site_id: i64) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM incidents WHERE site_id = ?1 AND status != 'resolved')",
            params![site_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn insert_incident(&self, incident: &NewIncident) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM incidents WHERE site_id = ?1 AND status != 'resolved')",
            params![incident.site_id],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }

        // The partial unique index rejects a second open incident even if
        // another writer slipped in first.
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO incidents (site_id, title, description, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                incident.site_id,
                incident.title,
                incident.description,
                IncidentStatus::Investigating,
                format_db_time(incident.started_at),
            ],
        )?;

        tx.commit()?;
        Ok(inserted == 1)
    }

    fn resolve_open_incidents(&self, site_id: i64, at: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE incidents SET status = ?1, resolved_at = ?2
             WHERE site_id = ?3 AND status != 'resolved'",
            params![IncidentStatus::Resolved, format_db_time(at), site_id],
        )?;
        Ok(changed)
    }

    fn notification_recipients(&self, site_id: i64) -> Result<Vec<Recipient>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT u.username, u.email
             FROM users u
             JOIN sites s ON s.user_id = u.id
             WHERE s.id = ?1 AND s.notifications_enabled = 1 AND u.status = 'active'",
        )?;
        let recipients = stmt
            .query_map(params![site_id], |row| {
                Ok(Recipient {
                    username: row.get(0)?,
                    email: row.get(1)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(recipients)
    }
}

fn site_from_row(row: &Row<'_>) -> SqlResult<Site> {
    Ok(Site {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        check_interval: row.get(4)?,
        timeout_seconds: row.get(5)?,
        notifications_enabled: row.get(6)?,
        description: row.get(7)?,
        public_status_page: row.get(8)?,
        status_page_slug: row.get(9)?,
    })
}

fn check_from_row(row: &Row<'_>) -> SqlResult<CheckRecord> {
    Ok(CheckRecord {
        id: row.get(0)?,
        site_id: row.get(1)?,
        result: CheckResult {
            status: row.get(2)?,
            response_time: row.get(3)?,
            status_code: row.get(4)?,
            error_message: row.get(5)?,
        },
        checked_at: time_column(row, 6)?,
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let resolved_at: Option<String> = row.get(6)?;
    let updated_at: Option<String> = row.get(7)?;
    Ok(Incident {
        id: row.get(0)?,
        site_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        started_at: time_column(row, 5)?,
        resolved_at: resolved_at.as_deref().and_then(parse_db_time),
        updated_at: updated_at.as_deref().and_then(parse_db_time),
    })
}

/// Map a unique-constraint violation to `Conflict`, anything else to `Sqlite`.
fn conflict_or(e: rusqlite::Error, message: &str) -> DbError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DbError::Conflict(message.to_string())
        }
        _ => DbError::Sqlite(e),
    }
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_db_time(&s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unreadable timestamp: {}", s).into(),
        )
    })
}

/// Format a timestamp so that text ordering matches time ordering.
fn format_db_time(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S%.9f").to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::NamedTempFile;

    fn seed_site(store: &Store, notifications_enabled: bool) -> Site {
        let mut user = User {
            id: 0,
            username: "ops".to_string(),
            email: "ops@example.com".to_string(),
            status: String::new(),
        };
        store.add_user(&mut user).unwrap();

        let mut site = Site {
            user_id: user.id,
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            check_interval: 1,
            timeout_seconds: 5,
            notifications_enabled,
            ..Default::default()
        };
        store.add_site(&mut site).unwrap();
        site
    }

    fn new_incident(site_id: i64) -> NewIncident {
        NewIncident {
            site_id,
            title: "Site Down: Example".to_string(),
            description: "Connection refused".to_string(),
            started_at: Utc::now(),
        }
    }

    #[test]
    fn test_site_persists_across_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        let site_id = {
            let store = Store::new(tmp.path()).unwrap();
            seed_site(&store, true).id
        };

        let store = Store::new(tmp.path()).unwrap();
        let site = store.get_site(site_id).unwrap();
        assert_eq!(site.name, "Example");
        assert_eq!(site.check_interval, 1);
        assert!(site.notifications_enabled);
        assert!(matches!(store.get_site(site_id + 100), Err(DbError::NotFound)));
    }

    #[test]
    fn test_monitorable_sites_skip_disabled_interval() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        let mut paused = Site {
            user_id: site.user_id,
            name: "Paused".to_string(),
            url: "https://paused.example.com".to_string(),
            check_interval: 0,
            ..Default::default()
        };
        store.add_site(&mut paused).unwrap();

        let sites = store.list_monitorable_sites().unwrap();
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].id, site.id);
        assert_eq!(store.get_sites().unwrap().len(), 2);
    }

    #[test]
    fn test_record_and_read_checks() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        let t0 = Utc::now();

        assert!(store.last_check_time(site.id).unwrap().is_none());

        store
            .record_check(site.id, &CheckResult::down(None, None, "Connection refused"), t0)
            .unwrap();
        store
            .record_check(site.id, &CheckResult::up(42, 200), t0 + Duration::seconds(60))
            .unwrap();

        let last_two = store.last_two_checks(site.id).unwrap();
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].result.status, CheckStatus::Up);
        assert_eq!(last_two[0].result.status_code, Some(200));
        assert_eq!(last_two[1].result.error_message.as_deref(), Some("Connection refused"));
        assert_eq!(
            store.last_check_time(site.id).unwrap(),
            Some(t0 + Duration::seconds(60))
        );
    }

    #[test]
    fn test_down_run_stops_at_previous_up() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        let t0 = Utc::now();
        let down = CheckResult::down(None, None, "Connection refused");

        store.record_check(site.id, &down, t0).unwrap();
        store.record_check(site.id, &CheckResult::up(10, 200), t0 + Duration::seconds(10)).unwrap();
        store.record_check(site.id, &down, t0 + Duration::seconds(20)).unwrap();
        store.record_check(site.id, &down, t0 + Duration::seconds(30)).unwrap();
        let up = store
            .record_check(site.id, &CheckResult::up(10, 200), t0 + Duration::seconds(40))
            .unwrap();

        let started = store.down_run_started_at(site.id, up.id).unwrap();
        assert_eq!(started, Some(t0 + Duration::seconds(20)));
    }

    #[test]
    fn test_only_one_open_incident_per_site() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);

        assert!(store.insert_incident(&new_incident(site.id)).unwrap());
        assert!(!store.insert_incident(&new_incident(site.id)).unwrap());
        assert!(store.open_incident_exists(site.id).unwrap());

        // The index itself rejects a duplicate that bypasses the check.
        let conn = store.conn().unwrap();
        let result = conn.execute(
            "INSERT INTO incidents (site_id, title, status, started_at) VALUES (?1, 'dup', 'identified', '2024-01-01 00:00:00')",
            params![site.id],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_reopens_slot() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);

        assert_eq!(store.resolve_open_incidents(site.id, Utc::now()).unwrap(), 0);
        store.insert_incident(&new_incident(site.id)).unwrap();
        assert_eq!(store.resolve_open_incidents(site.id, Utc::now()).unwrap(), 1);
        assert!(!store.open_incident_exists(site.id).unwrap());

        assert!(store.insert_incident(&new_incident(site.id)).unwrap());
        let incidents = store.get_incidents(Some(site.id)).unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].status, IncidentStatus::Investigating);
        assert_eq!(incidents[1].status, IncidentStatus::Resolved);
        assert!(incidents[1].resolved_at.is_some());
    }

    #[test]
    fn test_recipients_respect_flags() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        let quiet = {
            let mut s = Site {
                user_id: site.user_id,
                name: "Quiet".to_string(),
                url: "https://quiet.example.com".to_string(),
                notifications_enabled: false,
                ..Default::default()
            };
            store.add_site(&mut s).unwrap();
            s
        };

        let recipients = store.notification_recipients(site.id).unwrap();
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].email, "ops@example.com");
        assert!(store.notification_recipients(quiet.id).unwrap().is_empty());

        store
            .conn()
            .unwrap()
            .execute("UPDATE users SET status = 'inactive'", [])
            .unwrap();
        assert!(store.notification_recipients(site.id).unwrap().is_empty());
    }

    fn publish(store: &Store, site_id: i64, slug: &str) {
        store
            .conn()
            .unwrap()
            .execute(
                "UPDATE sites SET public_status_page = 1, status_page_slug = ?1,
                        description = 'Main storefront'
                 WHERE id = ?2",
                params![slug, site_id],
            )
            .unwrap();
    }

    #[test]
    fn test_status_page_summary() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        publish(&store, site.id, "example");
        let now = Utc::now();

        // Outside the 30-day window; only counts toward recent checks.
        store
            .record_check(site.id, &CheckResult::down(None, None, "Connection refused"), now - Duration::days(31))
            .unwrap();
        store.record_check(site.id, &CheckResult::up(100, 200), now - Duration::minutes(3)).unwrap();
        store.record_check(site.id, &CheckResult::up(201, 200), now - Duration::minutes(2)).unwrap();
        store
            .record_check(site.id, &CheckResult::down(Some(300), Some(500), "HTTP 500 Internal Server Error"), now - Duration::minutes(1))
            .unwrap();
        store.insert_incident(&new_incident(site.id)).unwrap();

        let page = store.get_status_page("example", now).unwrap();
        assert_eq!(page.site.name, "Example");
        assert_eq!(page.site.description.as_deref(), Some("Main storefront"));
        assert_eq!(page.current_status, "down");
        assert_eq!(page.uptime_percentage, 66.67);
        assert_eq!(page.avg_response_time, 200);
        assert_eq!(page.last_check, Some(now - Duration::minutes(1)));
        assert_eq!(page.recent_checks.len(), 4);
        assert_eq!(page.incidents.len(), 1);
    }

    #[test]
    fn test_status_page_requires_publication() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        assert!(matches!(store.get_status_page("example", Utc::now()), Err(DbError::NotFound)));

        publish(&store, site.id, "example");
        let page = store.get_status_page("example", Utc::now()).unwrap();
        assert_eq!(page.current_status, "unknown");
        assert_eq!(page.uptime_percentage, 0.0);
        assert_eq!(page.avg_response_time, 0);
        assert!(page.last_check.is_none());

        let mut twin = Site {
            user_id: site.user_id,
            name: "Twin".to_string(),
            url: "https://twin.example.com".to_string(),
            status_page_slug: Some("example".to_string()),
            ..Default::default()
        };
        assert!(matches!(store.add_site(&mut twin), Err(DbError::Conflict(_))));
    }

    #[test]
    fn test_logs_filter_and_page() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        let t0 = Utc::now();
        for i in 0..5 {
            let result = if i % 2 == 0 {
                CheckResult::up(10, 200)
            } else {
                CheckResult::down(None, None, "Connection reset")
            };
            store.record_check(site.id, &result, t0 + Duration::seconds(i)).unwrap();
        }

        let all = store.get_logs(&LogQuery::default()).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].site_name, "Example");
        assert_eq!(all[0].check.checked_at, t0 + Duration::seconds(4));

        let down = store
            .get_logs(&LogQuery {
                status: Some(CheckStatus::Down),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(down.len(), 2);
        assert!(down.iter().all(|l| l.check.result.status == CheckStatus::Down));

        let page = store
            .get_logs(&LogQuery {
                site_id: Some(site.id),
                limit: 2,
                offset: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].check.checked_at, t0 + Duration::seconds(2));

        let other = store
            .get_logs(&LogQuery {
                site_id: Some(site.id + 1),
                ..Default::default()
            })
            .unwrap();
        assert!(other.is_empty());
    }

    #[test]
    fn test_update_incident_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let site = seed_site(&store, true);
        store.insert_incident(&new_incident(site.id)).unwrap();
        let id = store.get_incidents(Some(site.id)).unwrap()[0].id;
        let now = Utc::now();

        let edited = store
            .update_incident(
                id,
                &IncidentUpdate {
                    status: Some(IncidentStatus::Identified),
                    description: Some("Upstream DNS outage".to_string()),
                    ..Default::default()
                },
                now,
            )
            .unwrap();
        assert_eq!(edited.status, IncidentStatus::Identified);
        assert_eq!(edited.title, "Site Down: Example");
        assert_eq!(edited.description.as_deref(), Some("Upstream DNS outage"));
        assert!(edited.resolved_at.is_none());
        assert_eq!(edited.updated_at, Some(now));

        let resolved = store
            .update_incident(
                id,
                &IncidentUpdate {
                    status: Some(IncidentStatus::Resolved),
                    ..Default::default()
                },
                now + Duration::minutes(5),
            )
            .unwrap();
        assert_eq!(resolved.resolved_at, Some(now + Duration::minutes(5)));
        assert!(!store.open_incident_exists(site.id).unwrap());

        // A new outage opens a second incident; reopening the old one collides.
        assert!(store.insert_incident(&new_incident(site.id)).unwrap());
        let reopen = IncidentUpdate {
            status: Some(IncidentStatus::Investigating),
            ..Default::default()
        };
        assert!(matches!(
            store.update_incident(id, &reopen, now),
            Err(DbError::Conflict(_))
        ));

        assert!(matches!(
            store.update_incident(id + 100, &reopen, now),
            Err(DbError::NotFound)
        ));
    }
}
