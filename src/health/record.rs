//! Health record and snapshot types

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};

/// Status reported for a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    /// Also covers any status string the backend reports that we do not model
    #[default]
    #[serde(other)]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed check at one point in time.
///
/// Equality and hashing only consider the identity fields
/// (`Node`, `CheckID`, `Name`, `ServiceID`, `ServiceName`), so the same check
/// is recognized across snapshots even when its status or output changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    node: String,
    #[serde(rename = "CheckID", default, deserialize_with = "null_as_default")]
    check_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    status: HealthStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    notes: String,
    #[serde(default, deserialize_with = "null_as_default")]
    output: String,
    #[serde(rename = "ServiceID", default, deserialize_with = "null_as_default")]
    service_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    service_name: String,
    /// Derived after detection, never read from the payload
    #[serde(skip)]
    tags: BTreeSet<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl HealthRecord {
    pub fn new(
        node: impl Into<String>,
        check_id: impl Into<String>,
        name: impl Into<String>,
        status: HealthStatus,
    ) -> Self {
        Self {
            node: node.into(),
            check_id: check_id.into(),
            name: name.into(),
            status,
            notes: String::new(),
            output: String::new(),
            service_id: String::new(),
            service_name: String::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Bind the check to a service
    pub fn with_service(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.service_id = id.into();
        self.service_name = name.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Checks without a service are system checks (serf health, disk, ...)
    pub fn is_service_check(&self) -> bool {
        !self.service_id.is_empty() || !self.service_name.is_empty()
    }

    /// Attach the notification tags resolved for this check
    pub fn attach_tags(&mut self, tags: BTreeSet<String>) {
        self.tags = tags;
    }

    fn identity(&self) -> (&str, &str, &str, &str, &str) {
        (
            &self.node,
            &self.check_id,
            &self.name,
            &self.service_id,
            &self.service_name,
        )
    }
}

impl PartialEq for HealthRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for HealthRecord {}

impl Hash for HealthRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

/// Every health record observed at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: Vec<HealthRecord>,
}

impl Snapshot {
    pub fn new(records: Vec<HealthRecord>) -> Self {
        Self { records }
    }

    /// Parse a raw backend payload (a JSON array of health entries).
    /// `null` is treated as an empty snapshot.
    pub fn from_raw(raw: &serde_json::Value) -> Result<Self, RecordError> {
        let entries = match raw {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Array(entries) => entries,
            other => return Err(RecordError::NotAList(json_kind(other))),
        };

        let records = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                HealthRecord::deserialize(entry).map_err(|e| RecordError::Entry {
                    index,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { records })
    }

    pub fn records(&self) -> &[HealthRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<HealthRecord> {
        self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HealthRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<HealthRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = HealthRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
    .to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Health payload must be a list, got {0}")]
    NotAList(String),

    #[error("Malformed health entry at index {index}: {reason}")]
    Entry { index: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(record: &HealthRecord) -> u64 {
        let mut hasher = DefaultHasher::new();
        record.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_identity_ignores_volatile_fields() {
        let passing = HealthRecord::new("foobar", "service:redis", "redis check", HealthStatus::Passing)
            .with_service("redis", "redis");
        let mut critical = HealthRecord::new("foobar", "service:redis", "redis check", HealthStatus::Critical)
            .with_service("redis", "redis")
            .with_output("connection refused")
            .with_notes("paged");
        critical.attach_tags(BTreeSet::from(["devops".to_string()]));

        assert_eq!(passing, critical);
        assert_eq!(hash_of(&passing), hash_of(&critical));
    }

    #[test]
    fn test_identity_fields_distinguish() {
        let base = HealthRecord::new("foobar", "service:redis", "redis check", HealthStatus::Passing);
        let other_node = HealthRecord::new("barfoo", "service:redis", "redis check", HealthStatus::Passing);
        let with_service = base.clone().with_service("redis", "redis");

        assert_ne!(base, other_node);
        assert_ne!(base, with_service);
    }

    #[test]
    fn test_parse_snapshot() {
        let raw = serde_json::json!([
            {
                "Node": "foobar",
                "CheckID": "serfHealth",
                "Name": "Serf Health Status",
                "Status": "passing",
                "Notes": "",
                "Output": "Agent alive and reachable",
                "ServiceID": "",
                "ServiceName": "",
                "ServiceTags": [],
                "CreateIndex": 10
            },
            {
                "Node": "foobar",
                "CheckID": "service:redis",
                "Name": "Service 'redis' check",
                "Status": "maintenance",
                "ServiceID": null,
                "ServiceName": "redis"
            }
        ]);

        let snapshot = Snapshot::from_raw(&raw).unwrap();
        assert_eq!(snapshot.len(), 2);

        let serf = &snapshot.records()[0];
        assert_eq!(serf.status(), HealthStatus::Passing);
        assert_eq!(serf.output(), "Agent alive and reachable");
        assert!(!serf.is_service_check());

        let redis = &snapshot.records()[1];
        assert_eq!(redis.status(), HealthStatus::Unknown);
        assert_eq!(redis.service_id(), "");
        assert!(redis.is_service_check());
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(Snapshot::from_raw(&serde_json::Value::Null).unwrap().is_empty());

        let err = Snapshot::from_raw(&serde_json::json!({"Node": "foobar"})).unwrap_err();
        assert!(matches!(err, RecordError::NotAList(kind) if kind == "object"));

        // An identity field that is not a string cannot be hashed
        let err = Snapshot::from_raw(&serde_json::json!([{"Node": {"id": 1}}])).unwrap_err();
        assert!(matches!(err, RecordError::Entry { index: 0, .. }));
    }
}
