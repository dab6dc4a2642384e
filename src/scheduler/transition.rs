//! Status transition detection from persisted check history.

use crate::db::{CheckStatus, CheckStore, DbError};

use serde::Serialize;
use std::sync::Arc;

/// The result of comparing a site's two most recent checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub site_id: i64,
    pub is_status_change: bool,
    pub previous_status: Option<CheckStatus>,
    /// Whole seconds the site was down, set only on a down→up change.
    pub downtime_seconds: Option<i64>,
}

impl StatusChange {
    fn unchanged(site_id: i64) -> Self {
        Self {
            site_id,
            is_status_change: false,
            previous_status: None,
            downtime_seconds: None,
        }
    }

    pub fn is_recovery(&self) -> bool {
        self.is_status_change && self.previous_status == Some(CheckStatus::Down)
    }
}

pub struct TransitionDetector {
    store: Arc<dyn CheckStore>,
}

impl TransitionDetector {
    pub fn new(store: Arc<dyn CheckStore>) -> Self {
        Self { store }
    }

    pub fn detect(&self, site_id: i64, current: CheckStatus) -> Result<StatusChange, DbError> {
        let recent = self.store.last_two_checks(site_id)?;
        let (latest, previous) = match recent.as_slice() {
            [latest, previous, ..] => (latest, previous),
            _ => return Ok(StatusChange::unchanged(site_id)),
        };

        let is_status_change = latest.result.status != previous.result.status;
        let previous_status = Some(previous.result.status);

        let mut downtime_seconds = None;
        if is_status_change && current == CheckStatus::Up && previous.result.status == CheckStatus::Down {
            match self.store.down_run_started_at(site_id, latest.id)? {
                Some(started) => {
                    let millis = (latest.checked_at - started).num_milliseconds();
                    downtime_seconds = Some((millis as f64 / 1000.0).round() as i64);
                }
                None => {
                    tracing::warn!("Site {} recovered but no down run was found", site_id);
                }
            }
        }

        Ok(StatusChange {
            site_id,
            is_status_change,
            previous_status,
            downtime_seconds,
        })
    }
}
