//! Coordination backend access
//!
//! The alerting pipeline reads health state, catalog metadata and key/value
//! configuration from the backend, and writes back the prior snapshot and
//! run-coordination locks. [`ConsulClient`] talks to a live Consul agent;
//! [`InMemoryBackend`] keeps everything in process.

pub mod consul;
pub mod memory;

pub use consul::ConsulClient;
pub use memory::InMemoryBackend;

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Trait for coordination backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Current health entries for every check, as a raw JSON array
    async fn health_state(&self) -> Result<serde_json::Value, BackendError>;

    /// Catalog entry for a node, `None` when the node is unknown
    async fn node_catalog(&self, node: &str) -> Result<Option<serde_json::Value>, BackendError>;

    /// Read a raw key, `None` when absent
    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Write a raw key, replacing any previous value
    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Create a session whose locks are deleted when it expires
    async fn create_session(&self, ttl: Duration) -> Result<String, BackendError>;

    /// Destroy a session, releasing its locks
    async fn destroy_session(&self, session: &str) -> Result<(), BackendError>;

    /// Try to acquire `key` for `session`; false when another session holds it
    async fn acquire_lock(&self, key: &str, session: &str) -> Result<bool, BackendError>;
}

/// Read a key and decode it as JSON
pub async fn get_json<T: DeserializeOwned>(
    backend: &dyn Backend,
    key: &str,
) -> Result<Option<T>, BackendError> {
    match backend.kv_get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BackendError::Deserialization(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend returned status {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}
