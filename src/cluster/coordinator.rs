//! Run coordination across collaborating watchers
//!
//! Every watcher that sees the same health state computes the same
//! fingerprint and races for a lock keyed by it. The lock belongs to a session
//! with a short TTL, so it disappears on its own once the session expires;
//! it is never released explicitly, which keeps late arrivals for the same
//! state from processing it again within the TTL.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Backend, BackendError};
use crate::config::KvKeys;

/// Content fingerprint of a whole health payload
pub fn fingerprint(payload: &[u8]) -> String {
    format!("{:x}", md5::compute(payload))
}

/// Proof that this watcher owns the run for a fingerprint
#[derive(Debug, Clone)]
pub struct RunLease {
    pub fingerprint: String,
    pub key: String,
    pub session: String,
}

/// Distributed mutual exclusion for runs
pub struct RunCoordinator {
    backend: Arc<dyn Backend>,
    keys: KvKeys,
    ttl: Duration,
}

impl RunCoordinator {
    pub fn new(backend: Arc<dyn Backend>, keys: KvKeys, ttl: Duration) -> Self {
        Self { backend, keys, ttl }
    }

    /// Try to claim the run for `payload`.
    ///
    /// Returns `None` when another watcher already holds the lock for the same
    /// fingerprint; that is an expected outcome, not an error.
    pub async fn try_acquire(&self, payload: &[u8]) -> Result<Option<RunLease>, CoordinatorError> {
        let fingerprint = fingerprint(payload);
        let key = self.keys.lock(&fingerprint);

        let session = self.backend.create_session(self.ttl).await?;
        let acquired = self.backend.acquire_lock(&key, &session).await?;

        if acquired {
            tracing::debug!(fingerprint = %fingerprint, session = %session, "Acquired run lock");
            Ok(Some(RunLease {
                fingerprint,
                key,
                session,
            }))
        } else {
            tracing::info!(
                fingerprint = %fingerprint,
                "Another watcher is processing this health state"
            );
            if let Err(e) = self.backend.destroy_session(&session).await {
                tracing::warn!(session = %session, error = %e, "Failed to destroy unused session");
            }
            Ok(None)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
