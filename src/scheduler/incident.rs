//! Incident bookkeeping driven by status transitions.

use crate::db::{CheckStore, DbError, NewIncident, Site};

use chrono::{DateTime, Utc};
use std::sync::Arc;

const DEFAULT_DESCRIPTION: &str = "Site is not responding";

/// Opens an incident when a site goes down and resolves it on recovery.
pub struct IncidentManager {
    store: Arc<dyn CheckStore>,
}

impl IncidentManager {
    pub fn new(store: Arc<dyn CheckStore>) -> Self {
        Self { store }
    }

    /// Open an `investigating` incident unless one is already open.
    ///
    /// Returns whether a new incident was created.
    pub fn on_down(
        &self,
        site: &Site,
        error_message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        if self.store.open_incident_exists(site.id)? {
            tracing::debug!("Incident already open for {}", site.name);
            return Ok(false);
        }

        let incident = NewIncident {
            site_id: site.id,
            title: format!("Site Down: {}", site.name),
            description: error_message.unwrap_or(DEFAULT_DESCRIPTION).to_string(),
            started_at: at,
        };

        let created = self.store.insert_incident(&incident)?;
        if created {
            tracing::info!("Opened incident for {}", site.name);
        }
        Ok(created)
    }

    /// Resolve every open incident for the site.
    pub fn on_recovered(&self, site: &Site, at: DateTime<Utc>) -> Result<usize, DbError> {
        let resolved = self.store.resolve_open_incidents(site.id, at)?;
        if resolved > 0 {
            tracing::info!("Resolved {} incident(s) for {}", resolved, site.name);
        }
        Ok(resolved)
    }
}
