//! Alert email rendering.

use askama::Template;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EventKind, StatusEvent};

/// A fully rendered email ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Template)]
#[template(path = "site_down.html")]
struct SiteDownEmail<'a> {
    site_name: &'a str,
    site_url: &'a str,
    timestamp: String,
    error_message: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "site_up.html")]
struct SiteUpEmail<'a> {
    site_name: &'a str,
    site_url: &'a str,
    timestamp: String,
    downtime: String,
}

/// Render the alert for `event` addressed to `to`.
pub fn render_alert(event: &StatusEvent, to: &str) -> Result<EmailMessage, askama::Error> {
    let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string();

    let (subject, html, text) = match &event.kind {
        EventKind::Down { error_message } => {
            let html = SiteDownEmail {
                site_name: &event.site_name,
                site_url: &event.site_url,
                timestamp,
                error_message: error_message.as_deref(),
            }
            .render()?;
            let mut text = format!(
                "{} status change: DOWN\nURL: {}",
                event.site_name, event.site_url
            );
            if let Some(error) = error_message {
                text.push_str(&format!("\nError: {}", error));
            }
            (format!("🚨 {} is DOWN", event.site_name), html, text)
        }
        EventKind::Up { downtime_seconds } => {
            let downtime = downtime_seconds
                .map(format_downtime)
                .unwrap_or_else(|| "Unknown duration".to_string());
            let text = format!(
                "{} status change: UP\nURL: {}\nDowntime: {}",
                event.site_name, event.site_url, downtime
            );
            let html = SiteUpEmail {
                site_name: &event.site_name,
                site_url: &event.site_url,
                timestamp,
                downtime,
            }
            .render()?;
            (format!("🎉 {} is back UP", event.site_name), html, text)
        }
    };

    Ok(EmailMessage {
        to: to.to_string(),
        subject,
        html,
        text,
    })
}

/// Sample alerts an operator can send to check mail delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestAlert {
    SiteDown,
    SiteUp,
}

/// Render a sample alert for a placeholder site, marked as a test.
pub fn render_test_alert(
    kind: TestAlert,
    to: &str,
    at: DateTime<Utc>,
) -> Result<EmailMessage, askama::Error> {
    let (kind, subject, text) = match kind {
        TestAlert::SiteDown => (
            EventKind::Down {
                error_message: Some("Connection timeout - This is a test alert".to_string()),
            },
            "🚨 TEST: Site Down Alert",
            "This is a test site down notification from sitewatch.",
        ),
        TestAlert::SiteUp => (
            EventKind::Up {
                downtime_seconds: Some(300),
            },
            "🎉 TEST: Site Recovery Alert",
            "This is a test site recovery notification from sitewatch.",
        ),
    };

    let event = StatusEvent {
        site_id: 0,
        site_name: "Test Website".to_string(),
        site_url: "https://example.com".to_string(),
        timestamp: at,
        kind,
    };

    let mut message = render_alert(&event, to)?;
    message.subject = subject.to_string();
    message.text = text.to_string();
    Ok(message)
}

/// Format seconds as `{h}h {m}m {s}s`, dropping leading zero units.
pub fn format_downtime(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
