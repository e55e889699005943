//! Checkwatch: Consul health-check alerting
//!
//! Watches the health state of a Consul cluster, detects checks whose status
//! changed since the previous run, and notifies the teams subscribed to them.
//!
//! # Features
//!
//! - **Transition Detection**: Only new degradations and recoveries are reported
//! - **Blacklists**: Nodes, services and checks can be muted, with `*` wildcards
//! - **Tag Routing**: Catalog service tags select channels and destinations
//! - **Run Coordination**: Watchers on several hosts alert once per health state
//! - **Channels**: Hipchat, Slack, Mailgun, SMTP, PagerDuty, InfluxDB, status pages
//!   and JSON log files
//!
//! # Example
//!
//! ```no_run
//! use checkwatch::alerts::HealthWatcher;
//! use checkwatch::backend::{Backend, ConsulClient};
//! use checkwatch::config::AlertingConfig;
//! use checkwatch::notify::NotificationRouter;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AlertingConfig::from_env();
//! let backend: Arc<dyn Backend> = Arc::new(ConsulClient::new(&config)?);
//!
//! let alerts = HealthWatcher::new(Arc::clone(&backend), &config).run().await?;
//! let router = NotificationRouter::new(backend, &config)?;
//! let outcomes = router.route(alerts).await?.join().await;
//! println!("Delivered {} notifications", outcomes.len());
//! # Ok(())
//! # }
//! ```

pub mod alerts;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod health;
pub mod notify;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use alerts::{AlertEvent, HealthWatcher, WatchError};
pub use backend::{Backend, BackendError, ConsulClient, InMemoryBackend};
pub use config::AlertingConfig;
pub use health::{HealthRecord, HealthStatus, Snapshot};
pub use notify::{Channel, NotificationRouter};
