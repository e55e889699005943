//! Checkwatch
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - CHECKWATCH_CONSUL_ADDR: Consul HTTP address (default: 127.0.0.1:8500)
//! - CHECKWATCH_CONSUL_TOKEN: ACL token sent with every Consul request
//! - CHECKWATCH_BACKEND_TIMEOUT_SECS: Timeout for Consul requests (default: 5)
//! - CHECKWATCH_NOTIFY_TIMEOUT_SECS: Timeout for one notification (default: 10)
//! - CHECKWATCH_LOCK_TTL_SECS: Run lock session TTL, 10 to 86400 (default: 10)
//! - CHECKWATCH_INTERVAL_SECS: Repeat every N seconds instead of running once
//! - RUST_LOG: Log level (default: info)
//!
//! Several watchers may run against the same cluster; each health state is
//! alerted on by exactly one of them.

use std::sync::Arc;

use checkwatch::alerts::HealthWatcher;
use checkwatch::backend::{Backend, ConsulClient};
use checkwatch::config::AlertingConfig;
use checkwatch::notify::NotificationRouter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type BoxError = Box<dyn std::error::Error>;

async fn run_once(watcher: &HealthWatcher, router: &NotificationRouter) -> Result<(), BoxError> {
    let alerts = watcher.run().await?;
    if alerts.is_empty() {
        tracing::info!("No new alerts");
        return Ok(());
    }

    let outcomes = router.route(alerts).await?.join().await;
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    tracing::info!(
        delivered = outcomes.len() - failed,
        failed,
        "Notification pass complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "checkwatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AlertingConfig::from_env();

    tracing::info!("Checkwatch configuration:");
    tracing::info!("  Consul: {}", config.consul_url());
    tracing::info!("  ACL token: {}", if config.consul_token.is_some() { "set" } else { "none" });
    tracing::info!("  Lock TTL: {} seconds", config.lock_ttl.as_secs());
    match config.interval {
        Some(interval) => tracing::info!("  Interval: {} seconds", interval.as_secs()),
        None => tracing::info!("  Interval: single run"),
    }

    let backend: Arc<dyn Backend> = Arc::new(ConsulClient::new(&config)?);
    let watcher = HealthWatcher::new(Arc::clone(&backend), &config);
    let router = NotificationRouter::new(backend, &config)?;

    let Some(period) = config.interval else {
        return run_once(&watcher, &router).await;
    };

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_once(&watcher, &router).await {
                    tracing::error!(error = %e, "Alerting pass failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                return Ok(());
            }
        }
    }
}
