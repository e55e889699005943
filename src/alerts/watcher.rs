//! One alerting run: fetch, coordinate, filter, detect, persist, tag

use std::sync::Arc;

use crate::backend::{Backend, BackendError};
use crate::cluster::{CoordinatorError, RunCoordinator};
use crate::config::{AlertingConfig, KvKeys};
use crate::health::{
    load_system_tags, Blacklist, BlacklistError, RecordError, Snapshot, TagError, TagResolver,
};

use super::detector::detect;
use super::event::AlertEvent;

/// Produces the alerts for the current health state
pub struct HealthWatcher {
    backend: Arc<dyn Backend>,
    keys: KvKeys,
    coordinator: RunCoordinator,
}

impl HealthWatcher {
    pub fn new(backend: Arc<dyn Backend>, config: &AlertingConfig) -> Self {
        let coordinator =
            RunCoordinator::new(Arc::clone(&backend), config.keys.clone(), config.lock_ttl);
        Self {
            backend,
            keys: config.keys.clone(),
            coordinator,
        }
    }

    /// Run one pass.
    ///
    /// Returns an empty list when another watcher owns this health state. Once
    /// the prior snapshot has been read, the current snapshot replaces it
    /// whether or not the rest of the pass succeeds.
    pub async fn run(&self) -> Result<Vec<AlertEvent>, WatchError> {
        tracing::info!("Fetching current health state");
        let current_raw = self.backend.health_state().await?;
        let payload =
            serde_json::to_vec(&current_raw).map_err(|e| WatchError::Encoding(e.to_string()))?;

        let lease = match self.coordinator.try_acquire(&payload).await? {
            Some(lease) => lease,
            None => return Ok(Vec::new()),
        };

        let prior_bytes = self.backend.kv_get(&self.keys.prior).await?;

        let result = self.evaluate(&current_raw, prior_bytes.as_deref()).await;

        if let Err(e) = self.backend.kv_put(&self.keys.prior, &payload).await {
            tracing::error!(key = %self.keys.prior, error = %e, "Failed to persist prior snapshot");
            if result.is_ok() {
                return Err(e.into());
            }
        }

        let alerts = result?;
        tracing::info!(
            fingerprint = %lease.fingerprint,
            lock = %lease.key,
            session = %lease.session,
            alerts = alerts.len(),
            "Alert detection complete"
        );
        Ok(alerts)
    }

    async fn evaluate(
        &self,
        current_raw: &serde_json::Value,
        prior_bytes: Option<&[u8]>,
    ) -> Result<Vec<AlertEvent>, WatchError> {
        let system_tags = load_system_tags(&*self.backend, &self.keys.health_check_tags).await?;

        tracing::info!("Obtaining blacklists");
        let blacklist = Blacklist::load(&*self.backend, &self.keys).await?;

        let prior_raw = parse_prior(prior_bytes)?;
        let prior = blacklist.filter(Snapshot::from_raw(&prior_raw)?);
        let current = blacklist.filter(Snapshot::from_raw(current_raw)?);

        if prior.is_empty() {
            tracing::warn!(key = %self.keys.prior, "No prior health state, reporting degraded checks only");
        }

        let alerts = detect(&current, &prior);
        if alerts.is_empty() {
            return Ok(Vec::new());
        }

        tracing::info!(alerts = alerts.len(), "Obtaining tags for new alerts");
        let mut resolver = TagResolver::new(&*self.backend, system_tags);
        let mut events = Vec::with_capacity(alerts.len());
        for mut record in alerts {
            resolver.resolve(&mut record).await?;
            events.push(AlertEvent::new(record));
        }

        Ok(events)
    }
}

fn parse_prior(bytes: Option<&[u8]>) -> Result<serde_json::Value, WatchError> {
    match bytes {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
            serde_json::from_slice(bytes).map_err(|e| WatchError::PriorSnapshot(e.to_string()))
        }
        _ => Ok(serde_json::Value::Null),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Coordination error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Blacklist error: {0}")]
    Blacklist(#[from] BlacklistError),

    #[error("Tag error: {0}")]
    Tags(#[from] TagError),

    #[error("Health record error: {0}")]
    Record(#[from] RecordError),

    #[error("Unreadable prior snapshot: {0}")]
    PriorSnapshot(String),

    #[error("Failed to encode health state: {0}")]
    Encoding(String),
}
