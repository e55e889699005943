//! Blacklist filtering
//!
//! Records are excluded by node name, service name or check ID before the
//! current and prior snapshots are compared. A `*` entry excludes every record
//! that has a value for that dimension.

use std::collections::HashSet;

use crate::backend::{get_json, Backend, BackendError};
use crate::config::KvKeys;

use super::record::{HealthRecord, Snapshot};

/// Blacklist entry matching every value
pub const WILDCARD: &str = "*";

/// Excluded nodes, services and checks
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    nodes: HashSet<String>,
    services: HashSet<String>,
    checks: HashSet<String>,
}

impl Blacklist {
    pub fn new<N, S, C>(nodes: N, services: S, checks: C) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            nodes: nodes.into_iter().map(Into::into).collect(),
            services: services.into_iter().map(Into::into).collect(),
            checks: checks.into_iter().map(Into::into).collect(),
        }
    }

    /// Load the three lists from the backend.
    ///
    /// A single missing list is treated as empty. If none of them exist the
    /// configuration is absent and loading fails.
    pub async fn load(backend: &dyn Backend, keys: &KvKeys) -> Result<Self, BlacklistError> {
        let nodes = Self::load_list(backend, &keys.blacklist_nodes).await?;
        let services = Self::load_list(backend, &keys.blacklist_services).await?;
        let checks = Self::load_list(backend, &keys.blacklist_checks).await?;

        if nodes.is_none() && services.is_none() && checks.is_none() {
            return Err(BlacklistError::Missing);
        }

        let blacklist = Self::new(
            nodes.unwrap_or_default(),
            services.unwrap_or_default(),
            checks.unwrap_or_default(),
        );

        tracing::debug!(
            nodes = blacklist.nodes.len(),
            services = blacklist.services.len(),
            checks = blacklist.checks.len(),
            "Loaded blacklists"
        );

        Ok(blacklist)
    }

    async fn load_list(
        backend: &dyn Backend,
        key: &str,
    ) -> Result<Option<Vec<String>>, BlacklistError> {
        let list = get_json::<Option<Vec<String>>>(backend, key)
            .await
            .map_err(|e| match e {
                BackendError::Deserialization(reason) => BlacklistError::Malformed {
                    key: key.to_string(),
                    reason,
                },
                other => BlacklistError::Backend(other),
            })?;

        if list.is_none() {
            tracing::warn!(key = %key, "Could not obtain blacklist");
        }

        // A stored `null` counts as an empty list, not as a missing one
        Ok(list.map(Option::unwrap_or_default))
    }

    /// Whether the record is excluded
    pub fn excludes(&self, record: &HealthRecord) -> bool {
        Self::matches(&self.services, record.service_name())
            || Self::matches(&self.checks, record.check_id())
            || Self::matches(&self.nodes, record.node())
    }

    /// A wildcard excludes every record, including those with an empty value
    fn matches(list: &HashSet<String>, value: &str) -> bool {
        list.contains(WILDCARD) || (!value.is_empty() && list.contains(value))
    }

    /// Keep the records not excluded, in their original order
    pub fn filter(&self, snapshot: Snapshot) -> Snapshot {
        let before = snapshot.len();
        let filtered: Snapshot = snapshot
            .into_records()
            .into_iter()
            .filter(|record| !self.excludes(record))
            .collect();

        tracing::debug!(
            kept = filtered.len(),
            dropped = before - filtered.len(),
            "Filtered snapshot against blacklists"
        );

        filtered
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlacklistError {
    #[error("No blacklist configuration found")]
    Missing,

    #[error("Malformed blacklist {key}: {reason}")]
    Malformed { key: String, reason: String },

    #[error("Backend error: {0}")]
    Backend(BackendError),
}
