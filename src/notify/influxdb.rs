//! Time-series export in line protocol

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::config::{destination_keys, Target};
use super::{http_status, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::health::HealthStatus;

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxDbConfig {
    /// Write endpoint, e.g. `http://influx:8086/write`
    pub url: String,
    pub series: String,
    /// Tag -> database name
    pub databases: BTreeMap<String, Target>,
}

pub fn status_code(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Passing => 0,
        HealthStatus::Warning => 1,
        HealthStatus::Critical => 2,
        HealthStatus::Unknown => 3,
    }
}

fn escape_tag(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ' ' | '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn escape_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Render one point for `event`
pub fn line_protocol(series: &str, event: &AlertEvent, at: DateTime<Utc>) -> String {
    let record = event.record();
    let mut line = format!(
        "{},node={},check={}",
        escape_tag(series),
        escape_tag(record.node()),
        escape_tag(record.check_id())
    );
    if !record.service_name().is_empty() {
        line.push_str(",service=");
        line.push_str(&escape_tag(record.service_name()));
    }

    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_millis() * 1_000_000);
    line.push_str(&format!(
        " status=\"{}\",code={}i,output=\"{}\" {}",
        record.status(),
        status_code(record.status()),
        escape_field(record.output()),
        nanos
    ));
    line
}

pub struct InfluxDbDispatcher {
    config: InfluxDbConfig,
    http_client: reqwest::Client,
}

impl InfluxDbDispatcher {
    pub fn new(config: InfluxDbConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl Dispatcher for InfluxDbDispatcher {
    fn channel(&self) -> Channel {
        Channel::InfluxDb
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.databases)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let database = self
            .config
            .databases
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;

        let line = line_protocol(&self.config.series, event, Utc::now());
        let response = self
            .http_client
            .post(&self.config.url)
            .query(&[("db", database.as_ref())])
            .body(line)
            .send()
            .await?;

        http_status(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthRecord;
    use crate::test_support::{spawn_server, tagged_event};
    use axum::{
        extract::{Query, State},
        http::StatusCode,
        routing::post,
        Router,
    };
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_line_protocol() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = tagged_event(HealthStatus::Critical, &["influxdb"]);
        assert_eq!(
            line_protocol("consul_checks", &event, at),
            "consul_checks,node=foobar,check=service:redis,service=redis \
             status=\"critical\",code=2i,output=\"PONG\" 1700000000000000000"
        );
    }

    #[test]
    fn test_line_protocol_escaping() {
        let at = Utc.timestamp_opt(0, 0).unwrap();
        let record = HealthRecord::new("db 1", "disk,root", "Disk", HealthStatus::Warning)
            .with_output("usage \"high\" at C:\\");
        let line = line_protocol("checks", &AlertEvent::new(record), at);
        assert_eq!(
            line,
            "checks,node=db\\ 1,check=disk\\,root status=\"warning\",code=1i,output=\"usage \\\"high\\\" at C:\\\\\" 0"
        );
    }

    #[tokio::test]
    async fn test_influxdb_delivery() {
        type Captured = Arc<Mutex<Vec<(HashMap<String, String>, String)>>>;
        let captured: Captured = Arc::default();
        let router = Router::new()
            .route(
                "/write",
                post(
                    |State(captured): State<Captured>,
                     Query(params): Query<HashMap<String, String>>,
                     body: String| async move {
                        captured.lock().push((params, body));
                        StatusCode::NO_CONTENT
                    },
                ),
            )
            .with_state(Arc::clone(&captured));
        let addr = spawn_server(router).await;

        let config = InfluxDbConfig {
            url: format!("http://{}/write", addr),
            series: "consul_checks".to_string(),
            databases: BTreeMap::from([("devops".to_string(), Target("health".to_string()))]),
        };
        let dispatcher = InfluxDbDispatcher::new(config, reqwest::Client::new());
        let event = tagged_event(HealthStatus::Passing, &["influxdb", "devops"]);

        assert_eq!(
            dispatcher.deliver(&event, "devops").await.unwrap(),
            DeliveryStatus::Http(204)
        );
        let (params, body) = captured.lock()[0].clone();
        assert_eq!(params["db"], "health");
        assert!(body.starts_with("consul_checks,node=foobar"));
        assert!(body.contains("code=0i"));
    }
}
