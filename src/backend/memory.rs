//! In-process backend
//!
//! Keeps health state, catalogs, keys and sessions in memory. Locks follow
//! the Consul session semantics the run coordinator relies on: a lock is
//! held by a live session and disappears once that session expires.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;

use super::{Backend, BackendError};

/// In-memory backend
pub struct InMemoryBackend {
    health: RwLock<serde_json::Value>,
    catalogs: DashMap<String, serde_json::Value>,
    kv: DashMap<String, Vec<u8>>,
    /// Session ID -> expiry
    sessions: DashMap<String, Instant>,
    /// Lock key -> holding session
    locks: DashMap<String, String>,
    next_session: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            health: RwLock::new(serde_json::Value::Array(Vec::new())),
            catalogs: DashMap::new(),
            kv: DashMap::new(),
            sessions: DashMap::new(),
            locks: DashMap::new(),
            next_session: AtomicU64::new(1),
        }
    }

    /// Replace the current health state
    pub fn set_health(&self, entries: serde_json::Value) {
        *self.health.write() = entries;
    }

    /// Register the catalog entry for a node
    pub fn set_catalog(&self, node: &str, catalog: serde_json::Value) {
        self.catalogs.insert(node.to_string(), catalog);
    }

    pub fn put_raw(&self, key: &str, value: Vec<u8>) {
        self.kv.insert(key.to_string(), value);
    }

    pub fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        // Serializing plain data types into a Vec cannot fail
        if let Ok(bytes) = serde_json::to_vec(value) {
            self.put_raw(key, bytes);
        }
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.get(key).map(|v| v.clone())
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.kv.remove(key).map(|(_, v)| v)
    }

    /// Whether `key` is currently held by a live session
    pub fn is_locked(&self, key: &str) -> bool {
        let now = Instant::now();
        self.locks
            .get(key)
            .map(|holder| self.session_alive(holder.value(), now))
            .unwrap_or(false)
    }

    /// Number of sessions not yet pruned
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of lock keys not yet pruned
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Drop expired sessions and the lock keys they held
    fn prune_expired(&self, now: Instant) {
        self.sessions.retain(|_, expiry| *expiry > now);
        self.locks.retain(|_, holder| self.sessions.contains_key(holder.as_str()));
    }

    fn session_alive(&self, session: &str, now: Instant) -> bool {
        self.sessions
            .get(session)
            .map(|expiry| *expiry > now)
            .unwrap_or(false)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn health_state(&self) -> Result<serde_json::Value, BackendError> {
        Ok(self.health.read().clone())
    }

    async fn node_catalog(&self, node: &str) -> Result<Option<serde_json::Value>, BackendError> {
        Ok(self.catalogs.get(node).map(|c| c.clone()))
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.get_raw(key))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.put_raw(key, value.to_vec());
        Ok(())
    }

    async fn create_session(&self, ttl: Duration) -> Result<String, BackendError> {
        let now = Instant::now();
        self.prune_expired(now);

        let id = format!(
            "session-{}",
            self.next_session.fetch_add(1, Ordering::SeqCst)
        );
        self.sessions.insert(id.clone(), now + ttl);
        Ok(id)
    }

    async fn destroy_session(&self, session: &str) -> Result<(), BackendError> {
        self.sessions.remove(session);
        self.locks.retain(|_, holder| holder.as_str() != session);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, session: &str) -> Result<bool, BackendError> {
        let now = Instant::now();
        if !self.session_alive(session, now) {
            return Ok(false);
        }

        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get() == session {
                    Ok(true)
                } else if self.session_alive(entry.get(), now) {
                    Ok(false)
                } else {
                    // Previous holder expired, the key was deleted with it
                    entry.insert(session.to_string());
                    Ok(true)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(session.to_string());
                Ok(true)
            }
        }
    }
}
