use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::config::destination_keys;
use super::{Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::health::HealthStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonLogConfig {
    /// Tag -> log file path
    pub files: BTreeMap<String, PathBuf>,
}

/// One appended log line
#[derive(Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub node: String,
    pub check_id: String,
    pub name: String,
    pub status: HealthStatus,
    pub service_id: String,
    pub service_name: String,
    pub output: String,
    pub notes: String,
    pub tags: BTreeSet<String>,
    pub message: String,
}

impl LogEntry {
    pub fn new(event: &AlertEvent, timestamp: DateTime<Utc>) -> Self {
        let record = event.record();
        Self {
            timestamp,
            node: record.node().to_string(),
            check_id: record.check_id().to_string(),
            name: record.name().to_string(),
            status: record.status(),
            service_id: record.service_id().to_string(),
            service_name: record.service_name().to_string(),
            output: record.output().to_string(),
            notes: record.notes().to_string(),
            tags: event.tags().clone(),
            message: event.message().to_string(),
        }
    }
}

/// Appends alerts as JSON lines to local files
pub struct JsonLogDispatcher {
    config: JsonLogConfig,
    write_lock: Mutex<()>,
}

impl JsonLogDispatcher {
    pub fn new(config: JsonLogConfig) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Dispatcher for JsonLogDispatcher {
    fn channel(&self) -> Channel {
        Channel::JsonLog
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.files)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let path = self
            .config
            .files
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;

        let mut line = serde_json::to_string(&LogEntry::new(event, Utc::now()))
            .map_err(|e| NotifyError::Serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(DeliveryStatus::Appended)
    }
}
