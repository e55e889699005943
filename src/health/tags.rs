//! Notification tag derivation
//!
//! Service checks take the tags their service is registered with in the node
//! catalog. System checks (no service bound) take the configured default tag
//! list. Every tag is lower-cased so it can be matched against channel
//! destination keys case-insensitively.

use std::collections::{BTreeSet, HashMap};

use crate::backend::{get_json, Backend, BackendError};

use super::record::HealthRecord;

/// Parse a tag source; `null` yields no tags, anything but a list of strings is an error
pub fn parse_tag_list(value: &serde_json::Value) -> Result<BTreeSet<String>, TagError> {
    match value {
        serde_json::Value::Null => Ok(BTreeSet::new()),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_lowercase)
                    .ok_or_else(|| TagError::NotAString(item.to_string()))
            })
            .collect(),
        other => Err(TagError::NotIterable(other.to_string())),
    }
}

/// Derive the tags for one record.
///
/// `catalog` is the node catalog entry (`{"Services": {<id>: {"Tags": [..]}}}`);
/// the service is looked up by ID first, then by name.
pub fn derive_tags(
    record: &HealthRecord,
    catalog: Option<&serde_json::Value>,
    system_tags: &BTreeSet<String>,
) -> Result<BTreeSet<String>, TagError> {
    if !record.is_service_check() {
        return Ok(system_tags.clone());
    }

    let services = match catalog.and_then(|c| c.get("Services")) {
        Some(services) => services,
        None => return Ok(BTreeSet::new()),
    };

    let service = [record.service_id(), record.service_name()]
        .into_iter()
        .filter(|key| !key.is_empty())
        .find_map(|key| services.get(key));

    match service.and_then(|s| s.get("Tags")) {
        Some(tags) => parse_tag_list(tags),
        None => Ok(BTreeSet::new()),
    }
}

/// Load the default tags for system checks; an absent key means no tags
pub async fn load_system_tags(
    backend: &dyn Backend,
    key: &str,
) -> Result<BTreeSet<String>, TagError> {
    match get_json::<serde_json::Value>(backend, key).await? {
        Some(value) => parse_tag_list(&value),
        None => {
            tracing::warn!(key = %key, "Could not obtain system check tags");
            Ok(BTreeSet::new())
        }
    }
}

/// Attaches tags to records, fetching each node catalog at most once
pub struct TagResolver<'a> {
    backend: &'a dyn Backend,
    system_tags: BTreeSet<String>,
    catalogs: HashMap<String, Option<serde_json::Value>>,
}

impl<'a> TagResolver<'a> {
    pub fn new(backend: &'a dyn Backend, system_tags: BTreeSet<String>) -> Self {
        Self {
            backend,
            system_tags,
            catalogs: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, record: &mut HealthRecord) -> Result<(), TagError> {
        let catalog = if record.is_service_check() {
            if !self.catalogs.contains_key(record.node()) {
                let catalog = self.backend.node_catalog(record.node()).await?;
                self.catalogs.insert(record.node().to_string(), catalog);
            }
            self.catalogs.get(record.node()).and_then(Option::as_ref)
        } else {
            None
        };

        let tags = derive_tags(record, catalog, &self.system_tags)?;
        record.attach_tags(tags);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("Tag source is not a list: {0}")]
    NotIterable(String),

    #[error("Tag is not a string: {0}")]
    NotAString(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
