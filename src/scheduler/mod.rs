//! Scheduler module: periodic check passes over all monitored sites.
//!
//! A pass lists the monitorable sites, probes every site whose interval has
//! elapsed, records the result and routes status transitions to incident
//! tracking and notifications. Passes never overlap: the periodic timer
//! skips a tick while another pass holds the pass permit.

mod incident;
mod transition;

pub use incident::*;
pub use transition::*;

use crate::db::{CheckResult, CheckStatus, CheckStore, DbError, Site};
use crate::notify::{EventKind, NotificationDispatcher, StatusEvent};
use crate::probe::HealthProbe;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;

/// Scheduler error types.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("site {0} not found")]
    SiteNotFound(i64),
    #[error("store error: {0}")]
    Store(#[from] DbError),
}

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fixed cadence of check passes, independent of site intervals.
    pub tick_interval: Duration,
    /// Upper bound on concurrent probes within one pass.
    pub max_concurrent_checks: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_concurrent_checks: 8,
        }
    }
}

/// Snapshot of the scheduler's run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub active_intervals: usize,
}

/// Counts from one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub sites: usize,
    pub checked: usize,
    pub failed: usize,
}

#[derive(Default)]
struct RunState {
    running: bool,
    timers: HashMap<&'static str, broadcast::Sender<()>>,
}

/// Whether a site with the given interval is due at `now`.
pub fn is_due(last_checked: Option<DateTime<Utc>>, interval_minutes: i64, now: DateTime<Utc>) -> bool {
    match last_checked {
        None => true,
        Some(last) => now - last >= ChronoDuration::minutes(interval_minutes),
    }
}

/// Probe → record → detect → incident/notify for a single site.
struct SiteChecker {
    store: Arc<dyn CheckStore>,
    probe: Arc<dyn HealthProbe>,
    detector: TransitionDetector,
    incidents: IncidentManager,
    notifier: Arc<NotificationDispatcher>,
}

impl SiteChecker {
    fn is_due(&self, site: &Site, now: DateTime<Utc>) -> Result<bool, DbError> {
        let last = self.store.last_check_time(site.id)?;
        Ok(is_due(last, site.check_interval, now))
    }

    /// Check one site and record the result stamped `at`.
    ///
    /// Only a failure to record is returned; later stages log their own errors.
    async fn check_site(&self, site: &Site, at: DateTime<Utc>) -> Result<CheckResult, SchedulerError> {
        tracing::info!("Checking {} ({})", site.name, site.url);

        let timeout = site.timeout_seconds.max(1) as u64;
        let result = self.probe.probe(&site.url, timeout).await;

        self.store.record_check(site.id, &result, at)?;

        if site.notifications_enabled {
            match self.detector.detect(site.id, result.status) {
                Ok(change) if change.is_status_change => {
                    self.handle_status_change(site, &result, &change, at).await;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Failed to detect status change for {}: {}", site.name, e);
                }
            }
        }

        match result.response_time {
            Some(ms) => tracing::info!("{}: {} ({}ms)", site.name, result.status.as_str().to_uppercase(), ms),
            None => tracing::info!("{}: {}", site.name, result.status.as_str().to_uppercase()),
        }

        Ok(result)
    }

    async fn handle_status_change(
        &self,
        site: &Site,
        result: &CheckResult,
        change: &StatusChange,
        at: DateTime<Utc>,
    ) {
        let kind = match result.status {
            CheckStatus::Down => {
                tracing::warn!("ALERT: {} is DOWN", site.name);
                if let Err(e) = self.incidents.on_down(site, result.error_message.as_deref(), at) {
                    tracing::error!("Failed to open incident for {}: {}", site.name, e);
                }
                EventKind::Down {
                    error_message: result.error_message.clone(),
                }
            }
            CheckStatus::Up if change.is_recovery() => {
                tracing::info!("RECOVERY: {} is back UP", site.name);
                if let Err(e) = self.incidents.on_recovered(site, at) {
                    tracing::error!("Failed to resolve incidents for {}: {}", site.name, e);
                }
                EventKind::Up {
                    downtime_seconds: change.downtime_seconds,
                }
            }
            CheckStatus::Up => return,
        };

        let event = StatusEvent {
            site_id: site.id,
            site_name: site.name.clone(),
            site_url: site.url.clone(),
            timestamp: at,
            kind,
        };
        self.notifier.notify(&event).await;
    }
}

/// Run one pass over every monitorable site.
async fn run_pass(checker: Arc<SiteChecker>, max_concurrent: usize, now: DateTime<Utc>) -> PassSummary {
    let mut summary = PassSummary::default();

    let sites = match checker.store.list_monitorable_sites() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to list sites to monitor: {}", e);
            return summary;
        }
    };
    summary.sites = sites.len();
    tracing::info!("Found {} sites to monitor", sites.len());

    let limiter = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for site in sites {
        match checker.is_due(&site, now) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                tracing::error!("Failed to read last check for {}: {}", site.name, e);
                summary.failed += 1;
                continue;
            }
        }

        let permit = match limiter.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };
        let checker = checker.clone();

        tasks.spawn(async move {
            let _permit = permit;

            // Spread probes out a little within the pass.
            let jitter = rand::random::<u64>() % 100;
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            // Checks are stamped with the pass time so due-ness is measured tick to tick.
            checker
                .check_site(&site, now)
                .await
                .map_err(|e| (site.name.clone(), e))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(_)) => summary.checked += 1,
            Ok(Err((name, e))) => {
                tracing::error!("Error checking site {}: {}", name, e);
                summary.failed += 1;
            }
            Err(e) => {
                tracing::error!("Site check task failed: {}", e);
                summary.failed += 1;
            }
        }
    }

    summary
}

/// The monitoring scheduler.
///
/// Constructed once by the hosting application and shared behind an `Arc`.
pub struct MonitoringScheduler {
    checker: Arc<SiteChecker>,
    config: SchedulerConfig,
    lifecycle: Mutex<()>,
    state: RwLock<RunState>,
    pass_permit: Arc<Semaphore>,
}

impl MonitoringScheduler {
    pub fn new(
        store: Arc<dyn CheckStore>,
        probe: Arc<dyn HealthProbe>,
        notifier: Arc<NotificationDispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        let checker = SiteChecker {
            detector: TransitionDetector::new(store.clone()),
            incidents: IncidentManager::new(store.clone()),
            store,
            probe,
            notifier,
        };

        Self {
            checker: Arc::new(checker),
            config,
            lifecycle: Mutex::new(()),
            state: RwLock::new(RunState::default()),
            pass_permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Start monitoring: run one pass now, then one per tick.
    ///
    /// Returns `false` if the scheduler was already running.
    pub async fn start(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;

        if self.state.read().await.running {
            tracing::info!("Monitoring scheduler is already running");
            return false;
        }

        tracing::info!("Starting monitoring scheduler...");
        self.state.write().await.running = true;

        let summary = self.run_pass_now().await;
        tracing::info!(
            "Initial pass: {} checked, {} failed, {} sites",
            summary.checked,
            summary.failed,
            summary.sites
        );

        let timer = self.spawn_timer();
        self.state.write().await.timers.insert("main", timer);

        tracing::info!("Monitoring scheduler started");
        true
    }

    /// Stop the periodic timer. An in-flight pass is allowed to finish.
    ///
    /// Returns `false` if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let mut state = self.state.write().await;

        if !state.running && state.timers.is_empty() {
            tracing::info!("Monitoring scheduler is not running");
            return false;
        }

        tracing::info!("Stopping monitoring scheduler...");
        for (name, stop_tx) in state.timers.drain() {
            let _ = stop_tx.send(());
            tracing::debug!("Cancelled timer {}", name);
        }
        state.running = false;

        tracing::info!("Monitoring scheduler stopped");
        true
    }

    pub async fn status(&self) -> SchedulerStatus {
        let state = self.state.read().await;
        SchedulerStatus {
            is_running: state.running,
            active_intervals: state.timers.len(),
        }
    }

    /// Check a site right now, ignoring its interval.
    ///
    /// Waits for any pass in flight so that check history stays ordered by
    /// time as well as by insertion.
    pub async fn check_one(&self, site_id: i64) -> Result<CheckResult, SchedulerError> {
        let site = match self.checker.store.get_site(site_id) {
            Ok(site) => site,
            Err(DbError::NotFound) => return Err(SchedulerError::SiteNotFound(site_id)),
            Err(e) => return Err(e.into()),
        };

        // The permit is never closed.
        let _permit = self.pass_permit.acquire().await.ok();
        self.checker.check_site(&site, Utc::now()).await
    }

    /// Run a full pass stamped with the time the permit was granted.
    async fn run_pass_now(&self) -> PassSummary {
        let _permit = match self.pass_permit.acquire().await {
            Ok(p) => p,
            Err(_) => return PassSummary::default(),
        };
        run_pass(self.checker.clone(), self.config.max_concurrent_checks, Utc::now()).await
    }

    /// Run a full pass as of `now`, waiting for any pass already in flight.
    #[cfg(test)]
    pub async fn run_pass_at(&self, now: DateTime<Utc>) -> PassSummary {
        let _permit = match self.pass_permit.acquire().await {
            Ok(p) => p,
            Err(_) => return PassSummary::default(),
        };
        run_pass(self.checker.clone(), self.config.max_concurrent_checks, now).await
    }

    fn spawn_timer(&self) -> broadcast::Sender<()> {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);

        let checker = self.checker.clone();
        let pass_permit = self.pass_permit.clone();
        let tick = self.config.tick_interval;
        let max_concurrent = self.config.max_concurrent_checks;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        let _permit = match pass_permit.clone().try_acquire_owned() {
                            Ok(p) => p,
                            Err(_) => {
                                tracing::warn!("Skipping scheduled pass: previous pass still running");
                                continue;
                            }
                        };

                        // A stop that landed while the tick was pending wins.
                        if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                            break;
                        }

                        let summary = run_pass(checker.clone(), max_concurrent, Utc::now()).await;
                        tracing::debug!(
                            "Pass complete: {} checked, {} failed",
                            summary.checked,
                            summary.failed
                        );
                    }
                }
            }

            tracing::debug!("Scheduler timer exited");
        });

        stop_tx
    }
}
