//! Sitewatch - self-hosted uptime monitoring service.

mod config;
mod db;
mod notify;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::{CheckStore, Store};
use notify::{MailTransport, NotificationDispatcher, RelayTransport};
use probe::{HealthProbe, HttpProbe};
use scheduler::{MonitoringScheduler, SchedulerConfig};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("sitewatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting sitewatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");
    let check_store: Arc<dyn CheckStore> = store.clone();

    let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new()?);

    let transport: Option<Arc<dyn MailTransport>> = match &cfg.mail {
        Some(mail) => {
            tracing::info!("Email notifications via {}", mail.relay_url);
            Some(Arc::new(RelayTransport::new(&mail.relay_url, &mail.from, mail.token.clone())?))
        }
        None => None,
    };
    let notifier = Arc::new(NotificationDispatcher::new(check_store.clone(), transport));

    let scheduler = Arc::new(MonitoringScheduler::new(
        check_store,
        probe,
        notifier.clone(),
        SchedulerConfig {
            tick_interval: cfg.tick_interval,
            max_concurrent_checks: cfg.max_concurrent_checks,
        },
    ));

    if cfg.autostart {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.start().await;
        });
    } else {
        tracing::info!("Autostart disabled; POST /api/monitoring/start to begin monitoring");
    }

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone(), notifier);
    server.start(shutdown_signal()).await?;

    scheduler.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
