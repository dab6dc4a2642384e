//! Web server module.

mod handlers;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::notify::NotificationDispatcher;
use crate::scheduler::MonitoringScheduler;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub scheduler: Arc<MonitoringScheduler>,
    pub notifier: Arc<NotificationDispatcher>,
}

/// Admin API server for sitewatch.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(
        config: ServerConfig,
        store: Arc<Store>,
        scheduler: Arc<MonitoringScheduler>,
        notifier: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            state: AppState {
                config,
                store,
                scheduler,
                notifier,
            },
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            // Scheduler controls
            .route("/api/monitoring/status", get(handlers::handle_monitoring_status))
            .route("/api/monitoring/start", post(handlers::handle_monitoring_start))
            .route("/api/monitoring/stop", post(handlers::handle_monitoring_stop))
            .route("/api/monitoring/check", post(handlers::handle_monitoring_check))
            .route("/api/test/email", post(handlers::handle_test_email))
            // Sites, checks, incidents
            .route(
                "/api/sites",
                get(handlers::handle_get_sites).post(handlers::handle_create_site),
            )
            .route("/api/sites/{id}/checks", get(handlers::handle_get_checks))
            .route("/api/logs", get(handlers::handle_get_logs))
            .route("/api/incidents", get(handlers::handle_get_incidents))
            .route("/api/incidents/{id}", put(handlers::handle_update_incident))
            .route(
                "/api/users",
                get(handlers::handle_get_users).post(handlers::handle_create_user),
            )
            // Public status pages
            .route("/api/status/{slug}", get(handlers::handle_status_page))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Admin API listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}
