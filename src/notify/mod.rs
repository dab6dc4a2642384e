//! Status-change notifications.
//!
//! The dispatcher resolves recipients through the store, renders one email
//! per recipient and hands it to a `MailTransport`. Nothing here ever fails
//! the caller: every problem is logged and counted.

mod email;
mod relay;

pub use email::*;
pub use relay::*;

use crate::db::CheckStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Outbound mail delivery.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Deliver one message. Returns `false` on any failure.
    async fn send(&self, message: &EmailMessage) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Down { error_message: Option<String> },
    Up { downtime_seconds: Option<i64> },
}

/// A site status change worth telling someone about.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub site_id: i64,
    pub site_name: String,
    pub site_url: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// What happened to one event's fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
}

pub struct NotificationDispatcher {
    store: Arc<dyn CheckStore>,
    transport: Option<Arc<dyn MailTransport>>,
}

impl NotificationDispatcher {
    /// A `None` transport makes every dispatch a logged no-op.
    pub fn new(store: Arc<dyn CheckStore>, transport: Option<Arc<dyn MailTransport>>) -> Self {
        if transport.is_none() {
            tracing::warn!("Mail transport not configured; notifications will be logged only");
        }
        Self { store, transport }
    }

    pub async fn notify(&self, event: &StatusEvent) -> DispatchSummary {
        match &event.kind {
            EventKind::Down { .. } => tracing::info!("Notification: {} is DOWN", event.site_name),
            EventKind::Up { .. } => tracing::info!("Notification: {} is back UP", event.site_name),
        }

        let mut summary = DispatchSummary::default();

        let Some(transport) = &self.transport else {
            tracing::info!("Skipping email for {}: no mail transport", event.site_name);
            return summary;
        };

        let recipients = match self.store.notification_recipients(event.site_id) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!("Failed to load recipients for {}: {}", event.site_name, e);
                return summary;
            }
        };

        for recipient in recipients {
            summary.attempted += 1;

            let message = match render_alert(event, &recipient.email) {
                Ok(m) => m,
                Err(e) => {
                    tracing::error!("Failed to render alert for {}: {}", recipient.email, e);
                    continue;
                }
            };

            if transport.send(&message).await {
                summary.delivered += 1;
            } else {
                tracing::error!(
                    "Failed to deliver '{}' to {}",
                    message.subject,
                    recipient.email
                );
            }
        }

        summary
    }

    /// Send a sample alert straight to `to`, bypassing recipient lookup.
    pub async fn send_test(&self, kind: TestAlert, to: &str) -> DispatchSummary {
        let mut summary = DispatchSummary::default();

        let Some(transport) = &self.transport else {
            tracing::warn!("Test email to {} not sent: no mail transport", to);
            return summary;
        };

        summary.attempted = 1;
        match render_test_alert(kind, to, Utc::now()) {
            Ok(message) => {
                if transport.send(&message).await {
                    summary.delivered = 1;
                }
            }
            Err(e) => tracing::error!("Failed to render test email: {}", e),
        }

        summary
    }
}
