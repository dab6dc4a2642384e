//! Configuration module for sitewatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Mail relay settings. Absent means notifications are logged only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    pub relay_url: String,
    pub from: String,
    pub token: Option<String>,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the admin API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "sitewatch.db")
    pub db_path: String,
    /// Cadence of scheduler passes (default: 60s)
    pub tick_interval: Duration,
    /// Concurrent probes per pass (default: 8)
    pub max_concurrent_checks: usize,
    /// Start the scheduler at boot (default: true)
    pub autostart: bool,
    pub mail: Option<MailConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "sitewatch.db".to_string(),
            tick_interval: Duration::from_secs(60),
            max_concurrent_checks: 8,
            autostart: true,
            mail: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SITEWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `SITEWATCH_DB_PATH`: Database file path (default: "sitewatch.db")
    /// - `SITEWATCH_TICK_SECONDS`: Seconds between passes (default: 60)
    /// - `SITEWATCH_MAX_CONCURRENT_CHECKS`: Probe fan-out per pass (default: 8)
    /// - `SITEWATCH_AUTOSTART`: `false`/`0` disables autostart
    /// - `SITEWATCH_MAIL_RELAY_URL`: Mail relay endpoint (unset: no email)
    /// - `SITEWATCH_MAIL_FROM`: Sender address (default: "sitewatch@localhost")
    /// - `SITEWATCH_MAIL_TOKEN`: Bearer token for the relay
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("SITEWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("SITEWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Some(secs) = lookup("SITEWATCH_TICK_SECONDS").and_then(|s| s.parse::<u64>().ok()) {
            cfg.tick_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(n) = lookup("SITEWATCH_MAX_CONCURRENT_CHECKS").and_then(|s| s.parse::<usize>().ok()) {
            cfg.max_concurrent_checks = n.max(1);
        }

        if let Some(flag) = lookup("SITEWATCH_AUTOSTART") {
            cfg.autostart = !matches!(flag.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off");
        }

        if let Some(relay_url) = lookup("SITEWATCH_MAIL_RELAY_URL").filter(|s| !s.trim().is_empty()) {
            cfg.mail = Some(MailConfig {
                relay_url,
                from: lookup("SITEWATCH_MAIL_FROM").unwrap_or_else(|| "sitewatch@localhost".to_string()),
                token: lookup("SITEWATCH_MAIL_TOKEN").filter(|s| !s.is_empty()),
            });
        }

        cfg
    }
}
